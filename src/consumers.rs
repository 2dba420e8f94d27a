use anyhow::Result;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::catalog::LogType;
use crate::failure::{FailureKind, TaskError};
use crate::logset::LogRecord;

/// A pluggable component turning log records of specific types into typed
/// output.
///
/// Consumers may receive records concurrently from different files of the
/// same type; the engine guarantees a fixed per-type dispatch order but no
/// serialization across files, so a consumer protects its own shared
/// mutable state (single-writer-at-a-time is the consumer's obligation).
/// `on_complete` is invoked exactly once per run, with the run's
/// known-failed flag, so best-effort state can still be flushed.
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;
    fn consumed_log_types(&self) -> Vec<LogType>;
    fn process(&self, record: &Arc<LogRecord>, log_type: &LogType) -> Result<()>;
    fn on_complete(&self, run_failed: bool) -> Result<()>;
}

fn lock_state<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
struct CountState {
    per_type: BTreeMap<LogType, u64>,
    records: Vec<(String, u64, String)>,
    completion: Option<bool>,
}

/// Counts records per log type and keeps the observed sequence, mostly for
/// summaries and tests.
pub struct LineCountConsumer {
    name: String,
    types: Vec<LogType>,
    state: Mutex<CountState>,
}

impl LineCountConsumer {
    pub fn new(name: impl Into<String>, types: Vec<LogType>) -> Self {
        Self {
            name: name.into(),
            types,
            state: Mutex::new(CountState::default()),
        }
    }

    pub fn counts(&self) -> BTreeMap<LogType, u64> {
        lock_state(&self.state).per_type.clone()
    }

    /// Observed `(normalized_path, line_number, content)` triples in arrival
    /// order.
    pub fn records(&self) -> Vec<(String, u64, String)> {
        lock_state(&self.state).records.clone()
    }

    /// `Some(run_failed)` once the completion signal has arrived.
    pub fn completion(&self) -> Option<bool> {
        lock_state(&self.state).completion
    }
}

impl Consumer for LineCountConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumed_log_types(&self) -> Vec<LogType> {
        self.types.clone()
    }

    fn process(&self, record: &Arc<LogRecord>, log_type: &LogType) -> Result<()> {
        let mut state = lock_state(&self.state);
        *state.per_type.entry(log_type.clone()).or_insert(0) += 1;
        state.records.push((
            record.file.normalized_path.clone(),
            record.line_number,
            record.content.clone(),
        ));
        Ok(())
    }

    fn on_complete(&self, run_failed: bool) -> Result<()> {
        lock_state(&self.state).completion = Some(run_failed);
        Ok(())
    }
}

/// Serializes every record as one JSON line to a shared writer.
///
/// A write failure tears the writer down; later calls fail with
/// `OutputResourceDisposed` so the engine can attribute them to the earlier
/// teardown instead of treating them as fresh faults.
pub struct JsonlExportConsumer {
    name: String,
    types: Vec<LogType>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl JsonlExportConsumer {
    pub fn new(
        name: impl Into<String>,
        types: Vec<LogType>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            name: name.into(),
            types,
            writer: Mutex::new(Some(writer)),
        }
    }
}

impl Consumer for JsonlExportConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumed_log_types(&self) -> Vec<LogType> {
        self.types.clone()
    }

    fn process(&self, record: &Arc<LogRecord>, log_type: &LogType) -> Result<()> {
        let mut guard = lock_state(&self.writer);
        let writer = match guard.as_mut() {
            Some(writer) => writer,
            None => {
                return Err(TaskError::new(
                    FailureKind::OutputResourceDisposed,
                    format!(
                        "output writer of consumer '{}' was torn down by an earlier failure",
                        self.name
                    ),
                )
                .into())
            }
        };

        let line = json!({
            "type": log_type.as_str(),
            "file": record.file.normalized_path,
            "worker": record.file.worker_id,
            "line": record.line_number,
            "content": record.content,
        });
        if let Err(e) = writeln!(writer, "{}", line) {
            *guard = None;
            return Err(anyhow::Error::new(e)
                .context(format!("writing record from consumer '{}'", self.name)));
        }
        Ok(())
    }

    fn on_complete(&self, _run_failed: bool) -> Result<()> {
        if let Some(writer) = lock_state(&self.writer).as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
