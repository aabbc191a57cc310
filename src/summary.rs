use std::fs::{self, File};

use camino::{Utf8Path, Utf8PathBuf};
use csv::{QuoteStyle, ReaderBuilder, Writer, WriterBuilder};
use serde::Serialize;

use crate::domain::TransferRecord;
use crate::error::MirrorError;
use crate::fs_util::write_bytes_atomic;

pub const SUMMARY_HEADER: [&str; 4] = ["Path", "URL", "Status", "File Size"];
pub const OVERALL_LABEL: &str = "Overall";
pub const DEFAULT_SUMMARY_NAME: &str = "download-summary.tsv";

// Rows are flushed as written, so an interrupted run keeps finished items.
#[derive(Debug)]
pub struct SummaryWriter {
    path: Utf8PathBuf,
    writer: Writer<File>,
    total: u64,
    rows: usize,
}

impl SummaryWriter {
    pub fn create(path: &Utf8Path) -> Result<Self, MirrorError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| MirrorError::Filesystem(format!("create {parent}: {err}")))?;
        }
        let file = File::create(path.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("create {path}: {err}")))?;
        let mut writer = tsv_writer(file);
        writer
            .write_record(SUMMARY_HEADER)
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            total: 0,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn append(&mut self, record: &TransferRecord) -> Result<(), MirrorError> {
        let size = record.size.to_string();
        let status = record.status_text();
        self.writer
            .write_record([
                clean(&record.path).as_str(),
                clean(&record.url).as_str(),
                clean(&status).as_str(),
                size.as_str(),
            ])
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        self.writer
            .flush()
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        self.total += record.size;
        self.rows += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<u64, MirrorError> {
        self.writer
            .flush()
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        drop(self.writer);

        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("read {}: {err}", self.path)))?;
        let (header, body) = content.split_once('\n').unwrap_or((content.as_str(), ""));
        let overall = format!("{OVERALL_LABEL}\t\t\t{}", self.total);
        let mut rewritten = String::with_capacity(content.len() + overall.len() + 1);
        rewritten.push_str(header);
        rewritten.push('\n');
        rewritten.push_str(&overall);
        rewritten.push('\n');
        rewritten.push_str(body);
        write_bytes_atomic(&self.path, rewritten.as_bytes())?;
        Ok(self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub path: String,
    pub url: String,
    pub status: String,
    pub size: u64,
}

pub fn read_summary(path: &Utf8Path) -> Result<Vec<SummaryRow>, MirrorError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(true)
        .from_path(path.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("read {path}: {err}")))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        let field = |index: usize| record.get(index).unwrap_or_default().to_string();
        let size = record
            .get(3)
            .unwrap_or_default()
            .trim()
            .parse::<u64>()
            .map_err(|err| MirrorError::Filesystem(format!("bad size in {path}: {err}")))?;
        rows.push(SummaryRow {
            path: field(0),
            url: field(1),
            status: field(2),
            size,
        });
    }
    Ok(rows)
}

fn tsv_writer(file: File) -> Writer<File> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .from_writer(file)
}

fn clean(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
