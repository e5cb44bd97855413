//! PDF Distiller - merges spooled PostScript jobs into PDFs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pdf_distiller::config::{ConfigError, ConfigLoader, ServiceConfig, TomlConfigStore};
use pdf_distiller::control::{ControlClient, ControlError, ServerMessage};
use pdf_distiller::convert::GhostscriptConverter;
use pdf_distiller::display;
use pdf_distiller::service::{DistillingService, ServiceError};

#[derive(Parser)]
#[command(
    name = "pdf-distiller",
    about = "Watches a spool directory and merges PostScript jobs into PDFs",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (default: ./pdf-distiller.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service in the foreground until Ctrl-C.
    Serve,
    /// Print live job log lines and configuration changes.
    Monitor {
        /// Control socket (default: from the config file)
        #[arg(short, long)]
        socket: Option<PathBuf>,
        /// Name shown to other operators.
        #[arg(short, long, default_value = "monitor")]
        name: String,
    },
    /// Change the configuration of a running service.
    SetConfig {
        /// Control socket (default: from the config file)
        #[arg(short, long)]
        socket: Option<PathBuf>,
        /// Name shown in the audit line.
        #[arg(short, long, default_value = "set-config")]
        name: String,
        /// How long to wait for each reply, in milliseconds.
        #[arg(long, default_value_t = 4000)]
        timeout_ms: u64,
        #[command(flatten)]
        changes: ConfigChanges,
    },
}

/// Options a `set-config` call may change; unset ones keep their value.
#[derive(Args, Debug, Default)]
struct ConfigChanges {
    #[arg(long)]
    input_dir: Option<PathBuf>,
    #[arg(long)]
    input_filter: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    working_dir: Option<PathBuf>,
    #[arg(long)]
    worker_threads: Option<usize>,
    #[arg(long)]
    write_job_log_files: Option<bool>,
    #[arg(long)]
    keep_source_files: Option<bool>,
}

impl ConfigChanges {
    fn apply(self, config: &mut ServiceConfig) {
        if let Some(v) = self.input_dir {
            config.input_dir = v;
        }
        if let Some(v) = self.input_filter {
            config.input_filter = v;
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.working_dir {
            config.working_dir = v;
        }
        if let Some(v) = self.worker_threads {
            config.worker_threads = v;
        }
        if let Some(v) = self.write_job_log_files {
            config.write_job_log_files = v;
        }
        if let Some(v) = self.keep_source_files {
            config.keep_source_files = v;
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("Failed to wait for Ctrl-C: {0}")]
    Signal(#[source] std::io::Error),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn loader(config: Option<PathBuf>) -> ConfigLoader {
    config.map_or_else(ConfigLoader::new, ConfigLoader::with_path)
}

async fn serve(loader: &ConfigLoader) -> Result<(), CliError> {
    let config = loader.load()?;
    let store = Arc::new(TomlConfigStore::new(loader.save_path()));
    tracing::info!(path = %store.path().display(), "Configuration changes are saved to");
    let converter = Arc::new(GhostscriptConverter::from_config(config.converter.as_deref()));
    tracing::info!(converter = %converter.binary().display(), "Using converter");

    let mut service = DistillingService::new(config, store, converter);
    service.start()?;

    tokio::signal::ctrl_c().await.map_err(CliError::Signal)?;
    service.stop();

    let active = service.active_count();
    if active > 0 {
        tracing::info!(active, "Waiting for running jobs");
    }
    service.wait_for_idle().await;
    Ok(())
}

async fn monitor(socket: PathBuf, name: &str) -> Result<(), CliError> {
    let mut client = ControlClient::connect(&socket).await?;
    let config = client.register(name).await?;
    display::print_registered(name, &socket.display().to_string());
    display::print_config(&config);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.map_err(CliError::Signal)?;
                return Ok(());
            }
            message = client.next_message() => match message? {
                Some(ServerMessage::LogLine { line, severity }) => display::print_log_line(&line, severity),
                Some(ServerMessage::Config { config }) => display::print_config(&config),
                Some(ServerMessage::Response(response)) => {
                    tracing::debug!(?response, "Unexpected response");
                }
                None => {
                    display::print_disconnected();
                    return Ok(());
                }
            },
        }
    }
}

async fn set_config(
    socket: PathBuf,
    name: &str,
    timeout: Duration,
    changes: ConfigChanges,
) -> Result<(), CliError> {
    let mut client = ControlClient::connect(&socket).await?.with_timeout(timeout);
    let mut config = client.register(name).await?;
    changes.apply(&mut config);
    client.set_config(&config).await?;
    display::print_config(&config);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let loader = loader(cli.config);

    // clients take the socket from the config file unless given
    let socket_or_default = |socket: Option<PathBuf>| -> Result<PathBuf, CliError> {
        match socket {
            Some(socket) => Ok(socket),
            None => Ok(loader.load()?.control_socket),
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(&loader).await,
        Commands::Monitor { socket, name } => match socket_or_default(socket) {
            Ok(socket) => monitor(socket, &name).await,
            Err(e) => Err(e),
        },
        Commands::SetConfig {
            socket,
            name,
            timeout_ms,
            changes,
        } => match socket_or_default(socket) {
            Ok(socket) => {
                set_config(socket, &name, Duration::from_millis(timeout_ms), changes).await
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Fatal error");
        eprintln!("pdf-distiller: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_changes_only_touch_given_options() {
        let mut config = ServiceConfig::default();
        let changes = ConfigChanges {
            output_dir: Some(PathBuf::from("/spool/out")),
            keep_source_files: Some(true),
            ..Default::default()
        };
        changes.apply(&mut config);

        assert_eq!(config.output_dir, PathBuf::from("/spool/out"));
        assert!(config.keep_source_files);
        assert_eq!(config.input_dir, ServiceConfig::default().input_dir);
        assert_eq!(config.worker_threads, 4);
    }

    #[test]
    fn test_cli_parses_set_config_flags() {
        let cli = Cli::parse_from([
            "pdf-distiller",
            "set-config",
            "--socket",
            "/tmp/x.sock",
            "--write-job-log-files",
            "true",
            "--worker-threads",
            "2",
        ]);
        let Commands::SetConfig {
            socket,
            timeout_ms,
            changes,
            ..
        } = cli.command
        else {
            panic!("expected set-config");
        };
        assert_eq!(socket, Some(PathBuf::from("/tmp/x.sock")));
        assert_eq!(timeout_ms, 4000);
        assert_eq!(changes.write_job_log_files, Some(true));
        assert_eq!(changes.worker_threads, Some(2));
    }
}
