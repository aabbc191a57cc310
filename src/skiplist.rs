use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;

use crate::domain::SourceUrl;
use crate::error::MirrorError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList {
    entries: HashSet<String>,
}

impl SkipList {
    pub fn load(path: &Utf8Path) -> Result<Self, MirrorError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("read skip list {path}: {err}")))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(normalize_entry)
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &SourceUrl, relative_path: &str) -> bool {
        !self.entries.is_empty()
            && (self.entries.contains(url.as_str())
                || self.entries.contains(url.raw().trim())
                || self.entries.contains(relative_path.trim_matches('/')))
    }
}

// URL entries go through the same normalization as manifest URLs.
fn normalize_entry(line: &str) -> String {
    match SourceUrl::parse(line) {
        Ok(url) => url.as_str().to_string(),
        Err(_) => line.trim_matches('/').to_string(),
    }
}
