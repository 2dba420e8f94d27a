use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::logset::LogRecord;

/// One soft-failure report kept in the capped detail list.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub file_path: Option<String>,
    pub line_number: Option<u64>,
    pub reporter: String,
}

#[derive(Debug, Default)]
struct ClassState {
    total: u64,
    per_reporter: HashMap<String, u64>,
    details: Vec<Notification>,
}

/// Point-in-time copy of one class's counters and details.
#[derive(Debug, Clone, Default)]
pub struct NotificationSummary {
    pub total: u64,
    pub per_reporter: HashMap<String, u64>,
    pub details: Vec<Notification>,
}

/// Central, thread-safe record of soft failures that must not stop the run.
///
/// Counters are exact under any interleaving; the detail list stops growing
/// at the configured cap while totals keep counting. Errors and warnings use
/// independent locks so the two classes never contend with each other.
pub struct NotificationCollector {
    cap: usize,
    errors: Mutex<ClassState>,
    warnings: Mutex<ClassState>,
    missed_lines: Mutex<Vec<String>>,
}

impl NotificationCollector {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            errors: Mutex::new(ClassState::default()),
            warnings: Mutex::new(ClassState::default()),
            missed_lines: Mutex::new(Vec::new()),
        }
    }

    /// Lock with poison recovery: a report from a panicking worker still
    /// leaves the counters usable for the final summary.
    fn lock_class<'a>(mutex: &'a Mutex<ClassState>) -> MutexGuard<'a, ClassState> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn report(&self, mutex: &Mutex<ClassState>, notification: Notification) {
        let mut state = Self::lock_class(mutex);
        state.total += 1;
        *state
            .per_reporter
            .entry(notification.reporter.clone())
            .or_insert(0) += 1;
        if state.details.len() < self.cap {
            state.details.push(notification);
        }
    }

    pub fn report_error(
        &self,
        message: impl Into<String>,
        file_path: Option<&str>,
        line_number: Option<u64>,
        reporter: &str,
    ) {
        self.report(
            &self.errors,
            Notification {
                message: message.into(),
                file_path: file_path.map(str::to_string),
                line_number,
                reporter: reporter.to_string(),
            },
        );
    }

    pub fn report_warning(
        &self,
        message: impl Into<String>,
        file_path: Option<&str>,
        line_number: Option<u64>,
        reporter: &str,
    ) {
        self.report(
            &self.warnings,
            Notification {
                message: message.into(),
                file_path: file_path.map(str::to_string),
                line_number,
                reporter: reporter.to_string(),
            },
        );
    }

    /// Error variant that derives file/line from the record and keeps the
    /// raw line on the missed-lines side list for postmortem use.
    pub fn report_record_error(&self, record: &LogRecord, message: impl Into<String>, reporter: &str) {
        self.report_error(
            message,
            Some(record.file.normalized_path.as_str()),
            Some(record.line_number),
            reporter,
        );

        let serialized = json!({
            "file": record.file.normalized_path,
            "line": record.line_number,
            "content": record.content,
        })
        .to_string();
        let mut missed = match self.missed_lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        missed.push(serialized);
    }

    pub fn error_total(&self) -> u64 {
        Self::lock_class(&self.errors).total
    }

    pub fn warning_total(&self) -> u64 {
        Self::lock_class(&self.warnings).total
    }

    pub fn errors(&self) -> NotificationSummary {
        let state = Self::lock_class(&self.errors);
        NotificationSummary {
            total: state.total,
            per_reporter: state.per_reporter.clone(),
            details: state.details.clone(),
        }
    }

    pub fn warnings(&self) -> NotificationSummary {
        let state = Self::lock_class(&self.warnings);
        NotificationSummary {
            total: state.total,
            per_reporter: state.per_reporter.clone(),
            details: state.details.clone(),
        }
    }

    pub fn missed_lines(&self) -> Vec<String> {
        match self.missed_lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
