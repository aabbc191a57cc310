use camino::{Utf8Path, Utf8PathBuf};
use csv::ReaderBuilder;

use crate::error::MirrorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub dest: Utf8PathBuf,
    pub url: String,
}

pub fn load_transfer_list(path: &Utf8Path) -> Result<Vec<TransferRequest>, MirrorError> {
    let content = std::fs::read_to_string(path.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("read {path}: {err}")))?;
    parse_transfer_list(path, &content)
}

pub fn parse_transfer_list(
    path: &Utf8Path,
    content: &str,
) -> Result<Vec<TransferRequest>, MirrorError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .quoting(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let parse_error = |line: u64, message: String| MirrorError::TransferListParse {
        path: path.as_std_path().to_path_buf(),
        line,
        message,
    };

    let mut requests = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| {
            let line = err.position().map_or(0, |pos| pos.line());
            parse_error(line, err.to_string())
        })?;
        let line = record.position().map_or(0, |pos| pos.line());
        let fields = record
            .iter()
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .collect::<Vec<_>>();
        match fields.as_slice() {
            [] => continue,
            [dest, url] => requests.push(TransferRequest {
                dest: Utf8PathBuf::from(*dest),
                url: (*url).to_string(),
            }),
            other => {
                return Err(parse_error(
                    line,
                    format!("expected 2 tab-separated fields, found {}", other.len()),
                ));
            }
        }
    }
    Ok(requests)
}
