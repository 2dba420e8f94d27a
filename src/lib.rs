// Core library for the lograke log-bundle processing engine

pub mod catalog;
pub mod config;
pub mod consumers;
pub mod decompression;
pub mod engine;
pub mod failure;
pub mod logset;
pub mod notify;
pub mod pool;
pub mod readers;

pub use catalog::{LogType, LogTypeCatalog, LogTypeDescriptor};
pub use config::EngineConfig;
pub use consumers::{Consumer, JsonlExportConsumer, LineCountConsumer};
pub use engine::{FileResult, ProcessingEngine, RunResult, TypeResult};
pub use failure::{FailureKind, TaskError};
pub use logset::{FileDescriptor, LogRecord, LogSetDecomposition, LogSetPart};
pub use notify::{Notification, NotificationCollector, NotificationSummary};
pub use pool::{ArchivePool, PooledArchive};
pub use readers::{
    LineReader, LineReaderFactory, MultilineReader, MultilineReaderFactory, RawRecord,
    ReaderFactory, RecordReader,
};

/// Process one decomposed log set end to end and release the decomposition
/// resources (materialized nested archives) afterwards.
pub fn process_log_set(
    engine: &ProcessingEngine,
    decomposition: LogSetDecomposition,
    selected_consumers: &[String],
) -> RunResult {
    let result = engine.run(decomposition.parts(), selected_consumers);
    drop(decomposition);
    result
}
