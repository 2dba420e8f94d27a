//! Worker side of the engine: pulls file tasks off the shared queue,
//! streams each file's records through the subscribed consumers, and
//! converts every failure into a typed `FileResult` at the task boundary.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{LogType, LogTypeCatalog};
use crate::consumers::Consumer;
use crate::decompression::maybe_decompress;
use crate::failure::classify;
use crate::failure::FailureKind;
use crate::logset::{normalize_path, zip_datetime_to_utc, FileDescriptor, LogRecord};
use crate::pool::ArchivePool;

use super::types::{FileResult, FileTask};

/// Shared state a worker needs; borrows from the engine for the duration of
/// one scoped run.
pub(crate) struct WorkerContext<'a> {
    pub catalog: &'a LogTypeCatalog,
    pub consumers: &'a [Arc<dyn Consumer>],
    /// Log type -> indices into `consumers`, in selection order.
    pub subscriptions: &'a HashMap<LogType, Vec<usize>>,
    /// Per-consumer received-data flags, aligned with `consumers`.
    pub delivered: &'a [AtomicBool],
    pub pool: &'a ArchivePool,
    pub cancelled: &'a AtomicBool,
}

pub(crate) fn worker_thread(
    ctx: &WorkerContext<'_>,
    task_rx: Receiver<FileTask>,
    result_tx: Sender<FileResult>,
) {
    while let Ok(task) = task_rx.recv() {
        let result = process_task(ctx, &task);
        if result_tx.send(result).is_err() {
            break;
        }
    }
}

/// Run one file task to a structured result. No error escapes this
/// boundary; classified fatal kinds trigger run-wide cancellation.
pub(crate) fn process_task(ctx: &WorkerContext<'_>, task: &FileTask) -> FileResult {
    let started = Instant::now();
    let path = normalize_path(&task.prefix, &task.rel_path);

    // Cooperative, one-shot: checked once per file at task entry. Files
    // already streaming run to their own completion.
    if ctx.cancelled.load(Ordering::Relaxed) {
        return FileResult {
            log_type: task.log_type.clone(),
            path,
            failure: FailureKind::Cancelled,
            error: Some("run cancelled before this file was processed".to_string()),
            lines_processed: 0,
            file_size: 0,
            elapsed: started.elapsed(),
        };
    }

    let mut lines_processed = 0;
    let mut file_size = 0;
    match run_file(ctx, task, &mut lines_processed, &mut file_size) {
        Ok(()) => FileResult {
            log_type: task.log_type.clone(),
            path,
            failure: FailureKind::Success,
            error: None,
            lines_processed,
            file_size,
            elapsed: started.elapsed(),
        },
        Err(e) => {
            let failure = classify(&e);
            let active = active_consumer_names(ctx, &task.log_type);
            let error = format!(
                "processing '{}' (log type '{}', consumers [{}]) failed: {:#}",
                path, task.log_type, active, e
            );
            if failure.cancels_run() {
                ctx.cancelled.store(true, Ordering::Relaxed);
            }
            FileResult {
                log_type: task.log_type.clone(),
                path,
                failure,
                error: Some(error),
                lines_processed,
                file_size,
                elapsed: started.elapsed(),
            }
        }
    }
}

fn active_consumer_names(ctx: &WorkerContext<'_>, log_type: &LogType) -> String {
    ctx.subscriptions
        .get(log_type)
        .map(|indices| {
            indices
                .iter()
                .map(|&idx| ctx.consumers[idx].name())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn run_file(
    ctx: &WorkerContext<'_>,
    task: &FileTask,
    lines_processed: &mut u64,
    file_size: &mut u64,
) -> Result<()> {
    if task.is_zip {
        let mut handle = ctx.pool.checkout(&task.part_path)?;
        let archive = handle.archive();
        let mut entry = archive.by_name(&task.rel_path).with_context(|| {
            format!(
                "opening entry '{}' in archive '{}'",
                task.rel_path,
                task.part_path.display()
            )
        })?;
        *file_size = entry.size();
        // Archive wall time kept as-is; no offset is stored in the zip.
        let last_modified = zip_datetime_to_utc(entry.last_modified());
        let descriptor = Arc::new(FileDescriptor::new(&task.prefix, &task.rel_path, last_modified));

        let raw = maybe_decompress(&mut entry)
            .with_context(|| format!("reading entry '{}'", task.rel_path))?;
        let stream: Box<dyn BufRead + '_> = Box::new(BufReader::new(raw));
        stream_records(ctx, task, descriptor, stream, lines_processed)
    } else {
        let full_path = task.part_path.join(&task.rel_path);
        let metadata = std::fs::metadata(&full_path)
            .with_context(|| format!("reading metadata of '{}'", full_path.display()))?;
        *file_size = metadata.len();
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        let descriptor = Arc::new(FileDescriptor::new(&task.prefix, &task.rel_path, last_modified));

        let file = File::open(&full_path)
            .with_context(|| format!("opening '{}'", full_path.display()))?;
        let raw = maybe_decompress(file)
            .with_context(|| format!("reading '{}'", full_path.display()))?;
        let stream: Box<dyn BufRead + '_> = Box::new(BufReader::new(raw));
        stream_records(ctx, task, descriptor, stream, lines_processed)
    }
}

fn stream_records<'a>(
    ctx: &WorkerContext<'_>,
    task: &FileTask,
    descriptor: Arc<FileDescriptor>,
    stream: Box<dyn BufRead + 'a>,
    lines_processed: &mut u64,
) -> Result<()> {
    let type_descriptor = ctx
        .catalog
        .get(&task.log_type)
        .ok_or_else(|| anyhow!("no reader registered for log type '{}'", task.log_type))?;
    let mut reader = type_descriptor.make_reader(stream, &descriptor.normalized_path);

    let subscribers: &[usize] = ctx
        .subscriptions
        .get(&task.log_type)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    while let Some(item) = reader.next_record() {
        let raw = item.with_context(|| format!("reading '{}'", descriptor.normalized_path))?;
        if raw.content.trim().is_empty() {
            continue;
        }

        let record = Arc::new(LogRecord {
            content: raw.content,
            file: Arc::clone(&descriptor),
            line_number: raw.line_number,
        });

        // Fixed, deterministic dispatch order; a consumer failure aborts the
        // remaining consumers and remaining lines for this file only.
        for &idx in subscribers {
            let consumer = &ctx.consumers[idx];
            consumer.process(&record, &task.log_type).with_context(|| {
                format!(
                    "consumer '{}' failed on {}:{}",
                    consumer.name(),
                    descriptor.normalized_path,
                    record.line_number
                )
            })?;
            ctx.delivered[idx].store(true, Ordering::Relaxed);
        }
        *lines_processed += 1;
    }

    Ok(())
}
