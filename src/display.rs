//! Colored terminal output for the monitor client.

use std::io::{self, Write};

use chrono::Local;
use owo_colors::OwoColorize;

use crate::config::ServiceConfig;
use crate::job::Severity;

/// Local timestamp in the same format as job log lines.
fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Splits a relayed line into job name and rendered entry.
///
/// Audit lines carry no job name.
#[must_use]
pub fn split_relay_line(line: &str) -> (Option<&str>, &str) {
    match line.split_once('\t') {
        Some((job, rest)) if rest.contains('\t') => (Some(job), rest),
        _ => (None, line),
    }
}

/// Bracketed severity tag, padded so columns line up.
#[must_use]
pub fn severity_tag(severity: Severity) -> String {
    format!("{:<7}", format!("[{severity}]"))
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

/// Print a pushed log line.
pub fn print_log_line(line: &str, severity: Severity) {
    let tag = severity_tag(severity);
    let tag = match severity {
        Severity::Info => tag.blue().to_string(),
        Severity::Warning => tag.yellow().bold().to_string(),
        Severity::Error => tag.red().bold().to_string(),
    };

    match split_relay_line(line) {
        (Some(job), entry) => {
            let entry = entry.replacen('\t', " ", 1);
            println!("{tag} {} {entry}", job.cyan());
        }
        (None, text) => {
            // multi-line audit text, indented under the tag
            let mut lines = text.lines();
            if let Some(first) = lines.next() {
                println!("{tag} {} {first}", timestamp().dimmed());
            }
            for rest in lines {
                println!("{:<7} {rest}", "");
            }
        }
    }
    let _ = io::stdout().flush();
}

/// Print a configuration snapshot.
pub fn print_config(config: &ServiceConfig) {
    println!("{} {}", timestamp().dimmed(), "[CONFIG]".magenta().bold());
    for (label, value) in config_rows(config) {
        println!("  {:<20} {value}", label.dimmed());
    }
    let _ = io::stdout().flush();
}

/// Label/value pairs for the operator-facing options.
#[must_use]
pub fn config_rows(config: &ServiceConfig) -> Vec<(&'static str, String)> {
    vec![
        ("Input directory", config.input_dir.display().to_string()),
        ("Input filter", config.input_filter.clone()),
        ("Output directory", config.output_dir.display().to_string()),
        ("Working directory", config.working_dir.display().to_string()),
        ("Worker threads", config.pool_size().to_string()),
        ("Job logging", on_off(config.write_job_log_files).to_string()),
        ("Keep source files", on_off(config.keep_source_files).to_string()),
    ]
}

/// Print successful registration.
pub fn print_registered(client_name: &str, socket: &str) {
    println!(
        "{} {} Registered as {} on {}",
        timestamp().dimmed(),
        "[MONITOR]".green().bold(),
        client_name.cyan(),
        socket.dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print that the service closed the session.
pub fn print_disconnected() {
    println!(
        "{} {} Service closed the connection",
        timestamp().dimmed(),
        "[MONITOR]".yellow().bold()
    );
    let _ = io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_relay_line_with_job() {
        let (job, entry) = split_relay_line("order.ps\t2026-01-29 10:00:00\tJob started.");
        assert_eq!(job, Some("order.ps"));
        assert_eq!(entry, "2026-01-29 10:00:00\tJob started.");
    }

    #[test]
    fn test_split_relay_line_audit() {
        let text = "Configuration updated by desk.\n - Input directory: /in";
        assert_eq!(split_relay_line(text), (None, text));
    }

    #[test]
    fn test_severity_tag_is_padded() {
        assert_eq!(severity_tag(Severity::Info), "[INFO] ");
        assert_eq!(severity_tag(Severity::Warning), "[WARN] ");
        assert_eq!(severity_tag(Severity::Error), "[ERROR]");
    }

    #[test]
    fn test_config_rows() {
        let config = ServiceConfig {
            keep_source_files: true,
            worker_threads: 0,
            ..Default::default()
        };
        let rows = config_rows(&config);
        assert_eq!(rows.len(), 7);
        assert!(rows.contains(&("Keep source files", "enabled".to_string())));
        assert!(rows.contains(&("Job logging", "disabled".to_string())));
        assert!(rows.contains(&("Worker threads", "1".to_string())));
    }
}
