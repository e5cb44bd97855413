//! Paths derived from a job's file name.

use std::path::{Path, PathBuf};

use crate::config::ServiceConfig;

/// Every file a job reads, writes or removes, derived from the work file name
/// and the configuration snapshot taken when the job started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Work file as it appeared in the input directory.
    pub input: PathBuf,
    /// Work file after the move into the working directory.
    pub working: PathBuf,
    /// Generated marks file, merged last.
    pub marks: PathBuf,
    /// Converter target, renamed once conversion ends.
    pub temp_output: PathBuf,
    /// Published PDF.
    pub output: PathBuf,
    /// Optional sidecar job log.
    pub job_log: PathBuf,
}

impl JobPaths {
    #[must_use]
    pub fn new(input: &Path, file_name: &str, config: &ServiceConfig) -> Self {
        let (stem, extension) = split_name(file_name);
        let marks_name = match extension {
            Some(ext) => format!("{stem}_pdfmarks.{ext}"),
            None => format!("{stem}_pdfmarks"),
        };

        Self {
            input: input.to_path_buf(),
            working: config.working_dir.join(file_name),
            marks: config.working_dir.join(marks_name),
            temp_output: config.output_dir.join(format!("{stem}.pdf.tmp")),
            output: config.output_dir.join(format!("{stem}.pdf")),
            job_log: config.output_dir.join(format!("{stem}_log.txt")),
        }
    }
}

/// Splits at the last dot; a leading dot does not start an extension.
fn split_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], Some(&file_name[idx + 1..])),
        _ => (file_name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServiceConfig {
        ServiceConfig {
            working_dir: PathBuf::from("/work"),
            output_dir: PathBuf::from("/out"),
            ..Default::default()
        }
    }

    #[test]
    fn test_paths_for_ps_file() {
        let paths = JobPaths::new(Path::new("/in/order-42.ps"), "order-42.ps", &config());
        assert_eq!(paths.input, PathBuf::from("/in/order-42.ps"));
        assert_eq!(paths.working, PathBuf::from("/work/order-42.ps"));
        assert_eq!(paths.marks, PathBuf::from("/work/order-42_pdfmarks.ps"));
        assert_eq!(paths.temp_output, PathBuf::from("/out/order-42.pdf.tmp"));
        assert_eq!(paths.output, PathBuf::from("/out/order-42.pdf"));
        assert_eq!(paths.job_log, PathBuf::from("/out/order-42_log.txt"));
    }

    #[test]
    fn test_paths_without_extension() {
        let paths = JobPaths::new(Path::new("/in/job"), "job", &config());
        assert_eq!(paths.marks, PathBuf::from("/work/job_pdfmarks"));
        assert_eq!(paths.output, PathBuf::from("/out/job.pdf"));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("a.b.ps"), ("a.b", Some("ps")));
        assert_eq!(split_name(".hidden"), (".hidden", None));
    }
}
