//! The orchestrator: validates the consumer selection, generates one task
//! per (file, log type) match, runs the tasks on a fixed worker pool, folds
//! the results per log type, and signals every consumer on completion.

use anyhow::Result;
use crossbeam_channel::{bounded, unbounded};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::catalog::{LogType, LogTypeCatalog, LogTypeDescriptor};
use crate::config::EngineConfig;
use crate::consumers::Consumer;
use crate::failure::FailureKind;
use crate::logset::{normalize_path, LogSetPart};
use crate::notify::NotificationCollector;
use crate::pool::ArchivePool;

use super::types::{FileResult, FileTask, RunResult, TypeResult};
use super::worker::{worker_thread, WorkerContext};

/// One engine instance: a log-type catalog, a set of registered consumers,
/// and the tunables for a run. Each call to [`ProcessingEngine::run`]
/// processes one finite, already-decomposed log set.
pub struct ProcessingEngine {
    config: EngineConfig,
    catalog: LogTypeCatalog,
    consumers: Vec<Arc<dyn Consumer>>,
    notifications: Arc<NotificationCollector>,
}

impl ProcessingEngine {
    pub fn new(config: EngineConfig) -> Self {
        let notifications = Arc::new(NotificationCollector::new(config.notification_cap));
        Self {
            config,
            catalog: LogTypeCatalog::new(),
            consumers: Vec::new(),
            notifications,
        }
    }

    pub fn register_log_type(&mut self, descriptor: LogTypeDescriptor) {
        self.catalog.register(descriptor);
    }

    /// Registration order fixes the per-type dispatch order.
    pub fn register_consumer(&mut self, consumer: Arc<dyn Consumer>) {
        self.consumers.push(consumer);
    }

    pub fn notifications(&self) -> Arc<NotificationCollector> {
        Arc::clone(&self.notifications)
    }

    /// Process one log set with the named consumers. Always terminates with
    /// a structured outcome: even an orchestrator bug is converted into a
    /// synthetic failing result rather than escaping as an error.
    pub fn run(&self, parts: &[LogSetPart], selected: &[String]) -> RunResult {
        let started = Instant::now();
        let mut result = match self.run_inner(parts, selected) {
            Ok(result) => result,
            Err(e) => RunResult::failed(
                FailureKind::Unclassified,
                format!("internal engine failure: {:#}", e),
                selected.to_vec(),
            ),
        };
        result.elapsed = started.elapsed();
        result
    }

    fn run_inner(&self, parts: &[LogSetPart], selected: &[String]) -> Result<RunResult> {
        // Validate the selection before any file is touched.
        let mut chosen: Vec<Arc<dyn Consumer>> = Vec::new();
        for name in selected {
            let consumer = match self.consumers.iter().find(|c| c.name() == name) {
                Some(consumer) => consumer,
                None => {
                    let known = self
                        .consumers
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Ok(RunResult::failed(
                        FailureKind::IncorrectConfiguration,
                        format!(
                            "unknown consumer '{}' requested; registered consumers: [{}]",
                            name, known
                        ),
                        Vec::new(),
                    ));
                }
            };
            if !chosen.iter().any(|c| c.name() == consumer.name()) {
                chosen.push(Arc::clone(consumer));
            }
        }
        let loaded: Vec<String> = chosen.iter().map(|c| c.name().to_string()).collect();
        if chosen.is_empty() {
            return Ok(RunResult::failed(
                FailureKind::IncorrectConfiguration,
                "no consumers selected",
                Vec::new(),
            ));
        }

        // Required log types: the union of what the chosen consumers want.
        let mut subscriptions: HashMap<LogType, Vec<usize>> = HashMap::new();
        for (idx, consumer) in chosen.iter().enumerate() {
            for log_type in consumer.consumed_log_types() {
                let subscribers = subscriptions.entry(log_type).or_default();
                if !subscribers.contains(&idx) {
                    subscribers.push(idx);
                }
            }
        }
        let mut required: Vec<LogType> = subscriptions.keys().cloned().collect();
        required.sort();

        for log_type in &required {
            if self.catalog.get(log_type).is_none() {
                return Ok(RunResult::failed(
                    FailureKind::IncorrectConfiguration,
                    format!("no reader registered for log type '{}'", log_type),
                    loaded,
                ));
            }
        }

        // Generate one task per surviving (file, log type) pair.
        let mut tasks: Vec<FileTask> = Vec::new();
        for part in parts {
            for log_type in &required {
                if let Some(descriptor) = self.catalog.get(log_type) {
                    for rel_path in &part.file_paths {
                        let candidate = normalize_path(&part.prefix, rel_path);
                        if descriptor.belongs_to_type(&candidate) {
                            tasks.push(FileTask {
                                log_type: log_type.clone(),
                                part_path: part.path.clone(),
                                prefix: part.prefix.clone(),
                                is_zip: part.is_zip,
                                rel_path: rel_path.clone(),
                            });
                        }
                    }
                }
            }
        }

        if tasks.is_empty() {
            let type_names = required
                .iter()
                .map(LogType::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            let result = RunResult::failed(
                FailureKind::NoRelevantLogsFound,
                format!(
                    "no files in the log set matched the log types [{}] required by consumers [{}]",
                    type_names,
                    loaded.join(", ")
                ),
                loaded,
            );
            self.notify_consumers(&chosen, true);
            return Ok(result);
        }

        // Run under bounded concurrency: a fixed worker pool over a bounded
        // queue. The run owns its pool and cancellation flag.
        let pool = ArchivePool::new();
        let cancelled = AtomicBool::new(false);
        let delivered: Vec<AtomicBool> = chosen.iter().map(|_| AtomicBool::new(false)).collect();
        let threads = self.config.effective_threads().min(tasks.len()).max(1);

        let (task_tx, task_rx) = bounded::<FileTask>(self.config.queue_bound);
        let (result_tx, result_rx) = unbounded::<FileResult>();

        let ctx = WorkerContext {
            catalog: &self.catalog,
            consumers: &chosen,
            subscriptions: &subscriptions,
            delivered: &delivered,
            pool: &pool,
            cancelled: &cancelled,
        };

        let mut results: Vec<FileResult> = Vec::with_capacity(tasks.len());
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(threads);
            for _ in 0..threads {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let ctx = &ctx;
                handles.push(scope.spawn(move || worker_thread(ctx, task_rx, result_tx)));
            }
            drop(task_rx);
            drop(result_tx);

            for task in tasks {
                if task_tx.send(task).is_err() {
                    break;
                }
            }
            drop(task_tx);

            // The orchestrator waits for every generated task before
            // aggregating; no pipelining between generation and aggregation.
            for result in result_rx.iter() {
                results.push(result);
            }

            for (idx, handle) in handles.into_iter().enumerate() {
                handle
                    .join()
                    .unwrap_or_else(|e| panic!("worker thread {} panicked: {:?}", idx, e));
            }
        });

        // Aggregate: commutative fold, first failure wins per type and for
        // the run as a whole (by arrival order).
        let mut per_type: BTreeMap<LogType, TypeResult> = BTreeMap::new();
        let mut first_failure: Option<(FailureKind, String)> = None;
        let mut lines_processed = 0;
        for result in &results {
            per_type
                .entry(result.log_type.clone())
                .or_default()
                .fold(result);
            lines_processed += result.lines_processed;
            if !result.is_success() && first_failure.is_none() {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| result.failure.to_string());
                first_failure = Some((result.failure, message));
            }
        }
        let files_processed = per_type.values().map(|t| t.files_processed).sum();

        let run_failed = first_failure.is_some();
        self.notify_consumers(&chosen, run_failed);

        let consumers_with_data = chosen
            .iter()
            .zip(&delivered)
            .filter(|(_, flag)| flag.load(Ordering::Relaxed))
            .map(|(c, _)| c.name().to_string())
            .collect();

        let (failure, error) = match first_failure {
            Some((kind, message)) => (kind, Some(message)),
            None => (FailureKind::Success, None),
        };
        Ok(RunResult {
            failure,
            error,
            per_type,
            loaded_consumers: loaded,
            consumers_with_data,
            files_processed,
            lines_processed,
            elapsed: std::time::Duration::ZERO,
        })
        // Teardown: pool, cancellation flag, and channels drop here; the
        // pool warns about (but does not fail on) leaked handles.
    }

    /// Completion signal: exactly once per engaged consumer, with the run's
    /// known-failed flag, regardless of outcome.
    fn notify_consumers(&self, chosen: &[Arc<dyn Consumer>], run_failed: bool) {
        for consumer in chosen {
            if let Err(e) = consumer.on_complete(run_failed) {
                let message = format!(
                    "completion signal for consumer '{}' failed: {:#}",
                    consumer.name(),
                    e
                );
                self.notifications
                    .report_error(&message, None, None, consumer.name());
                eprintln!("Warning: {}", message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LogTypeDescriptor;
    use crate::consumers::LineCountConsumer;
    use crate::readers::LineReaderFactory;
    use std::fs;

    fn test_engine(threads: usize) -> ProcessingEngine {
        let mut engine = ProcessingEngine::new(EngineConfig {
            threads,
            ..Default::default()
        });
        engine.register_log_type(LogTypeDescriptor::with_suffix(
            LogType::new("server"),
            ".log",
            Arc::new(LineReaderFactory::new(64 * 1024)),
        ));
        engine
    }

    #[test]
    fn test_unknown_consumer_is_configuration_error() {
        let mut engine = test_engine(1);
        engine.register_consumer(Arc::new(LineCountConsumer::new(
            "counts",
            vec![LogType::new("server")],
        )));

        let result = engine.run(&[], &["nope".to_string()]);
        assert_eq!(result.failure, FailureKind::IncorrectConfiguration);
        assert_eq!(result.files_processed, 0);
    }

    #[test]
    fn test_empty_selection_is_configuration_error() {
        let engine = test_engine(1);
        let result = engine.run(&[], &[]);
        assert_eq!(result.failure, FailureKind::IncorrectConfiguration);
    }

    #[test]
    fn test_no_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a log\n").unwrap();

        let mut engine = test_engine(1);
        let counts = Arc::new(LineCountConsumer::new("counts", vec![LogType::new("server")]));
        engine.register_consumer(Arc::clone(&counts) as Arc<dyn Consumer>);

        let decomposition =
            crate::logset::LogSetDecomposition::from_root(dir.path()).unwrap();
        let result = engine.run(decomposition.parts(), &["counts".to_string()]);
        assert_eq!(result.failure, FailureKind::NoRelevantLogsFound);
        // The completion signal still arrives, flagged as failed.
        assert_eq!(counts.completion(), Some(true));
    }

    #[test]
    fn test_duplicate_selection_engages_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.log"), "one\n").unwrap();

        let mut engine = test_engine(1);
        let counts = Arc::new(LineCountConsumer::new("counts", vec![LogType::new("server")]));
        engine.register_consumer(Arc::clone(&counts) as Arc<dyn Consumer>);

        let decomposition =
            crate::logset::LogSetDecomposition::from_root(dir.path()).unwrap();
        let result = engine.run(
            decomposition.parts(),
            &["counts".to_string(), "counts".to_string()],
        );
        assert!(result.success());
        assert_eq!(result.loaded_consumers, vec!["counts"]);
        assert_eq!(counts.counts().get(&LogType::new("server")), Some(&1));
    }
}
