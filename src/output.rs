use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ListResult, ProgressEvent, ProgressSink, RunReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_report_text(report: &RunReport) {
    println!("gtn-mirror summary");
    println!(
        "  manifests: {} processed, {} skipped",
        report.manifests_processed, report.manifests_failed
    );
    if report.folders_failed > 0 {
        println!("  folders failed: {}", report.folders_failed);
    }
    for (kind, count) in &report.items {
        println!("  {kind}: {count}");
    }
    let failed = report.failed_items();
    if failed > 0 {
        println!("  failed items: {failed}");
    }
    println!("  bytes: {}", report.total_bytes);
    if let Some(path) = &report.summary_path {
        println!("  summary: {path}");
    }
}

pub fn print_list_text(result: &ListResult) {
    for entry in &result.entries {
        let marker = if entry.valid { ' ' } else { '!' };
        println!("{marker} {}\t{}", entry.path, entry.url);
    }
    if result.manifests_failed > 0 {
        println!("{} manifest(s) could not be read", result.manifests_failed);
    }
}
