use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

pub const FORBIDDEN_NAME_CHARS: &[char] = &[
    '\\', '/', ':', '*', ',', '?', '"', '<', '>', '|', '%', '.', '#', '!', '@', '$', '&', '\'',
    '(', ')', '[', ']', '{', '}', ' ',
];

static URL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:https?|ftp)://[^\s'"<>]+"#).expect("URL token pattern is valid")
});

// Distinct inputs may collide.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if FORBIDDEN_NAME_CHARS.contains(&ch) {
                '-'
            } else {
                ch
            }
        })
        .collect()
}

pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Ftp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Ftp => write!(f, "ftp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    raw: String,
    url: Url,
    protocol: Protocol,
}

impl SourceUrl {
    pub fn parse(raw: &str) -> Result<Self, MirrorError> {
        let trimmed = raw.trim();
        // A bare URL is taken whole so literal spaces get percent-encoded; the
        // token search only applies behind a command prefix.
        let token = if starts_with_scheme(trimmed) {
            trimmed
        } else {
            URL_TOKEN
                .find(trimmed)
                .map(|found| found.as_str())
                .ok_or_else(|| MirrorError::InvalidUrl(raw.to_string()))?
        };
        let token = token.trim_end_matches(['"', '\'', ';', ')']);
        let token = strip_content_suffix(token);

        let url = Url::parse(token).map_err(|err| MirrorError::InvalidUrl(format!("{raw}: {err}")))?;
        let protocol = match url.scheme() {
            "http" | "https" => Protocol::Http,
            "ftp" => Protocol::Ftp,
            other => {
                return Err(MirrorError::InvalidUrl(format!(
                    "{raw}: unsupported scheme {other}"
                )));
            }
        };
        if url.host_str().is_none() {
            return Err(MirrorError::InvalidUrl(format!("{raw}: missing host")));
        }

        Ok(Self {
            raw: raw.to_string(),
            url,
            protocol,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn file_name(&self) -> String {
        let last = self
            .url
            .path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .unwrap_or_default();
        let decoded = percent_decode_str(last).decode_utf8_lossy();
        let name = decoded.trim();
        if name.is_empty() || name == "." || name == ".." {
            "download".to_string()
        } else {
            name.replace(['/', '\\'], "-")
        }
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl FromStr for SourceUrl {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

fn starts_with_scheme(value: &str) -> bool {
    ["http://", "https://", "ftp://"].iter().any(|scheme| {
        value
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

fn strip_content_suffix(url: &str) -> &str {
    let without_slash = url.trim_end_matches('/');
    match without_slash.strip_suffix("/content") {
        Some(rest)
            if rest
                .split_once("://")
                .is_some_and(|(_, tail)| tail.contains('/')) =>
        {
            rest
        }
        _ => url,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransferStatus {
    Downloaded,
    Uploaded,
    SkippedExists,
    SkippedRemoteExists,
    SkippedNotFound(String),
    SkippedListed,
    Error(String),
    UploadFailed(String),
}

impl TransferStatus {
    pub fn kind(&self) -> &'static str {
        match self {
            TransferStatus::Downloaded => "downloaded",
            TransferStatus::Uploaded => "uploaded",
            TransferStatus::SkippedExists => "skipped_exists",
            TransferStatus::SkippedRemoteExists => "skipped_remote_exists",
            TransferStatus::SkippedNotFound(_) => "skipped_not_found",
            TransferStatus::SkippedListed => "skipped_listed",
            TransferStatus::Error(_) => "error",
            TransferStatus::UploadFailed(_) => "upload_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TransferStatus::Error(_) | TransferStatus::UploadFailed(_)
        )
    }

    pub fn describe(&self, url: &str) -> String {
        match self {
            TransferStatus::Downloaded => "Downloaded".to_string(),
            TransferStatus::Uploaded => "Uploaded".to_string(),
            TransferStatus::SkippedExists => "Download skipped (File already exists)".to_string(),
            TransferStatus::SkippedRemoteExists => {
                "Upload skipped (File already exists remotely)".to_string()
            }
            TransferStatus::SkippedNotFound(code) => {
                format!("Download skipped (not found: {code})")
            }
            TransferStatus::SkippedListed => "Skipped (listed in skip list)".to_string(),
            TransferStatus::Error(message) => {
                format!("Error downloading file from {url}: {message}")
            }
            TransferStatus::UploadFailed(message) => format!("Error uploading file: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub path: String,
    pub url: String,
    pub status: TransferStatus,
    pub size: u64,
}

impl TransferRecord {
    pub fn status_text(&self) -> String {
        self.status.describe(&self.url)
    }
}
