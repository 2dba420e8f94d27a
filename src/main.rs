use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use serde_json::json;
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use lograke::{
    process_log_set, Consumer, EngineConfig, JsonlExportConsumer, LineCountConsumer,
    LineReaderFactory, LogSetDecomposition, LogType, LogTypeDescriptor, MultilineReaderFactory,
    ProcessingEngine,
};

#[derive(Parser)]
#[command(name = "lograke")]
#[command(about = "Concurrent processing engine for multi-node server log bundles")]
#[command(version)]
struct Cli {
    /// Log set to process: a directory tree or a zip archive, possibly
    /// containing one nested zip per cluster node.
    bundle: PathBuf,

    /// Consumers to run ("counts", "jsonl"); may be repeated.
    #[arg(short = 'c', long = "consumer", default_values_t = [String::from("counts")])]
    consumers: Vec<String>,

    /// Output file for the jsonl consumer (stdout when omitted).
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Worker thread count; 0 selects the CPU count.
    #[arg(long = "threads", default_value_t = 0)]
    threads: usize,

    /// Per-line byte ceiling.
    #[arg(long = "max-line-bytes", default_value_t = 1024 * 1024)]
    max_line_bytes: usize,

    /// Cap on stored notification details; totals keep counting past it.
    #[arg(long = "notify-cap", default_value_t = 500)]
    notify_cap: usize,

    /// Print the run summary as JSON.
    #[arg(short = 's', long = "stats")]
    stats: bool,
}

fn main() {
    match run() {
        Ok(success) => process::exit(if success { 0 } else { 1 }),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    }
}

fn run() -> Result<bool> {
    let cli = Cli::parse();

    let config = EngineConfig {
        threads: cli.threads,
        notification_cap: cli.notify_cap,
        max_line_bytes: cli.max_line_bytes,
        ..Default::default()
    };
    let max_line_bytes = config.max_line_bytes;
    let mut engine = ProcessingEngine::new(config);

    // Built-in catalog: plain server logs plus timestamp-grouped traces.
    let server = LogType::new("server");
    let trace = LogType::new("trace");
    engine.register_log_type(LogTypeDescriptor::with_suffix(
        server.clone(),
        ".log",
        Arc::new(LineReaderFactory::new(max_line_bytes)),
    ));
    let trace_start =
        Regex::new(r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}").context("trace start pattern")?;
    engine.register_log_type(LogTypeDescriptor::with_suffix(
        trace.clone(),
        ".trc",
        Arc::new(MultilineReaderFactory::new(trace_start, max_line_bytes)),
    ));

    let all_types = vec![server, trace];
    let counts = Arc::new(LineCountConsumer::new("counts", all_types.clone()));
    engine.register_consumer(Arc::clone(&counts) as Arc<dyn Consumer>);

    let jsonl_writer: Box<dyn std::io::Write + Send> = match &cli.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("creating output file '{}'", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    engine.register_consumer(Arc::new(JsonlExportConsumer::new(
        "jsonl",
        all_types,
        jsonl_writer,
    )));

    let decomposition = LogSetDecomposition::from_root(&cli.bundle)
        .with_context(|| format!("decomposing log set '{}'", cli.bundle.display()))?;
    let notifications = engine.notifications();
    let result = process_log_set(&engine, decomposition, &cli.consumers);

    if cli.stats {
        let per_type: serde_json::Map<String, serde_json::Value> = result
            .per_type
            .iter()
            .map(|(log_type, stats)| {
                (
                    log_type.to_string(),
                    json!({
                        "files_processed": stats.files_processed,
                        "lines_processed": stats.lines_processed,
                        "outcome": stats.failure,
                        "first_failed_file": stats.first_failed_file,
                    }),
                )
            })
            .collect();
        let summary = json!({
            "outcome": result.failure,
            "error": result.error,
            "files_processed": result.files_processed,
            "lines_processed": result.lines_processed,
            "elapsed_ms": result.elapsed.as_millis() as u64,
            "consumers": result.loaded_consumers,
            "consumers_with_data": result.consumers_with_data,
            "per_type": per_type,
            "soft_errors": notifications.error_total(),
            "soft_warnings": notifications.warning_total(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        eprintln!(
            "Processed {} file(s), {} line(s) in {} ms: {}",
            result.files_processed,
            result.lines_processed,
            result.elapsed.as_millis(),
            result.failure,
        );
        if let Some(error) = &result.error {
            eprintln!("Error: {}", error);
        }
    }

    Ok(result.success())
}
