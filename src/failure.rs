use serde::Serialize;
use std::fmt;

/// Outcome classification for a file task or a whole run.
///
/// Every file-level error is folded into exactly one of these kinds at the
/// task boundary; nothing escapes to the orchestrator as a raw error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Success,
    IncorrectConfiguration,
    Cancelled,
    OutOfMemory,
    LineTooLong,
    OutputResourceDisposed,
    Unclassified,
    NoRelevantLogsFound,
}

impl FailureKind {
    pub fn is_success(self) -> bool {
        matches!(self, FailureKind::Success)
    }

    /// True for kinds that abort a file and trigger run-wide cancellation.
    pub fn cancels_run(self) -> bool {
        matches!(
            self,
            FailureKind::OutOfMemory
                | FailureKind::LineTooLong
                | FailureKind::OutputResourceDisposed
                | FailureKind::Unclassified
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Success => "success",
            FailureKind::IncorrectConfiguration => "incorrect_configuration",
            FailureKind::Cancelled => "cancelled",
            FailureKind::OutOfMemory => "out_of_memory",
            FailureKind::LineTooLong => "line_too_long",
            FailureKind::OutputResourceDisposed => "output_resource_disposed",
            FailureKind::Unclassified => "unclassified",
            FailureKind::NoRelevantLogsFound => "no_relevant_logs_found",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, classifiable failure raised inside a file task.
///
/// Readers and consumers raise this directly for the kinds they can detect
/// (oversized line, torn-down output sink, resource exhaustion); anything
/// else downcasts to `Unclassified`.
#[derive(Debug)]
pub struct TaskError {
    kind: FailureKind,
    message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

/// Classify an error caught at the file-task boundary.
///
/// Context layers added with `anyhow::Context` do not hide the original
/// `TaskError`; anything without one is `Unclassified`.
pub fn classify(err: &anyhow::Error) -> FailureKind {
    err.downcast_ref::<TaskError>()
        .map(TaskError::kind)
        .unwrap_or(FailureKind::Unclassified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_task_error() {
        let err = anyhow::Error::new(TaskError::new(FailureKind::LineTooLong, "line exceeds cap"));
        assert_eq!(classify(&err), FailureKind::LineTooLong);
    }

    #[test]
    fn test_classify_survives_context() {
        let err = anyhow::Error::new(TaskError::new(
            FailureKind::OutputResourceDisposed,
            "writer gone",
        ))
        .context("consumer 'jsonl' failed on node1/server.log:42");
        assert_eq!(classify(&err), FailureKind::OutputResourceDisposed);
    }

    #[test]
    fn test_classify_unknown_error() {
        let err = anyhow::anyhow!("something else entirely");
        assert_eq!(classify(&err), FailureKind::Unclassified);
    }

    #[test]
    fn test_cancel_propagating_kinds() {
        assert!(FailureKind::LineTooLong.cancels_run());
        assert!(FailureKind::Unclassified.cancels_run());
        assert!(!FailureKind::Cancelled.cancels_run());
        assert!(!FailureKind::Success.cancels_run());
    }
}
