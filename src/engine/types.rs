use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::LogType;
use crate::failure::FailureKind;

/// One unit of work: a single (file, log type) match within a part.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub log_type: LogType,
    pub part_path: PathBuf,
    pub prefix: String,
    pub is_zip: bool,
    /// Archive entry name for zip parts, part-relative path otherwise.
    pub rel_path: String,
}

/// Outcome of one file task. Partial line counts survive a failure.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub log_type: LogType,
    pub path: String,
    pub failure: FailureKind,
    pub error: Option<String>,
    pub lines_processed: u64,
    pub file_size: u64,
    pub elapsed: Duration,
}

impl FileResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_success()
    }
}

/// Folded per-log-type statistics; the first failure wins.
#[derive(Debug, Clone)]
pub struct TypeResult {
    pub files_processed: u64,
    pub lines_processed: u64,
    pub failure: FailureKind,
    pub error: Option<String>,
    pub first_failed_file: Option<String>,
}

impl Default for TypeResult {
    fn default() -> Self {
        Self {
            files_processed: 0,
            lines_processed: 0,
            failure: FailureKind::Success,
            error: None,
            first_failed_file: None,
        }
    }
}

impl TypeResult {
    pub fn fold(&mut self, file: &FileResult) {
        self.lines_processed += file.lines_processed;
        if file.is_success() {
            self.files_processed += 1;
        } else if self.failure.is_success() {
            self.failure = file.failure;
            self.error = file.error.clone();
            self.first_failed_file = Some(file.path.clone());
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_success()
    }
}

/// Terminal aggregate of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub failure: FailureKind,
    pub error: Option<String>,
    pub per_type: BTreeMap<LogType, TypeResult>,
    /// Names of the consumers engaged by this run, in selection order.
    pub loaded_consumers: Vec<String>,
    /// Subset of `loaded_consumers` that received at least one record.
    pub consumers_with_data: Vec<String>,
    pub files_processed: u64,
    pub lines_processed: u64,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.failure.is_success()
    }

    pub(crate) fn failed(
        failure: FailureKind,
        error: impl Into<String>,
        loaded_consumers: Vec<String>,
    ) -> Self {
        Self {
            failure,
            error: Some(error.into()),
            per_type: BTreeMap::new(),
            loaded_consumers,
            consumers_with_data: Vec::new(),
            files_processed: 0,
            lines_processed: 0,
            elapsed: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_result(failure: FailureKind, lines: u64, path: &str) -> FileResult {
        FileResult {
            log_type: LogType::new("server"),
            path: path.to_string(),
            failure,
            error: if failure.is_success() {
                None
            } else {
                Some(format!("{} on {}", failure, path))
            },
            lines_processed: lines,
            file_size: 0,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_type_result_first_failure_wins() {
        let mut folded = TypeResult::default();
        folded.fold(&file_result(FailureKind::Success, 10, "a.log"));
        folded.fold(&file_result(FailureKind::LineTooLong, 3, "b.log"));
        folded.fold(&file_result(FailureKind::Unclassified, 0, "c.log"));

        assert_eq!(folded.files_processed, 1);
        assert_eq!(folded.lines_processed, 13);
        assert_eq!(folded.failure, FailureKind::LineTooLong);
        assert_eq!(folded.first_failed_file.as_deref(), Some("b.log"));
    }

    #[test]
    fn test_type_result_partial_lines_survive_failure() {
        let mut folded = TypeResult::default();
        folded.fold(&file_result(FailureKind::Unclassified, 7, "a.log"));
        assert_eq!(folded.files_processed, 0);
        assert_eq!(folded.lines_processed, 7);
        assert!(!folded.is_success());
    }
}
