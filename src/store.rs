use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::MirrorError;
use crate::summary::DEFAULT_SUMMARY_NAME;

#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
    staging_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_root: Utf8PathBuf, staging_root: Utf8PathBuf) -> Self {
        Self {
            output_root,
            staging_root,
        }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn staging_root(&self) -> &Utf8Path {
        &self.staging_root
    }

    pub fn staging_path(&self, folders: &[String], file_name: &str) -> Utf8PathBuf {
        join_all(&self.staging_root, folders).join(file_name)
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.output_root.join(DEFAULT_SUMMARY_NAME)
    }

    pub fn ensure_output_root(&self) -> Result<(), MirrorError> {
        fs::create_dir_all(self.output_root.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("create {}: {err}", self.output_root)))
    }

    pub fn ensure_staging_root(&self) -> Result<(), MirrorError> {
        fs::create_dir_all(self.staging_root.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("create {}: {err}", self.staging_root)))
    }

    pub fn prune_staging(&self) -> Result<usize, MirrorError> {
        if !self.staging_root.as_std_path().exists() {
            return Ok(0);
        }
        prune_empty_dirs(&self.staging_root, true)
    }
}

fn join_all(root: &Utf8Path, folders: &[String]) -> Utf8PathBuf {
    folders
        .iter()
        .fold(root.to_path_buf(), |path, folder| path.join(folder))
}

fn prune_empty_dirs(dir: &Utf8Path, keep: bool) -> Result<usize, MirrorError> {
    let mut removed = 0;
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        let file_type = entry
            .file_type()
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        if !file_type.is_dir() {
            continue;
        }
        let Ok(child) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        removed += prune_empty_dirs(&child, false)?;
    }
    if !keep {
        let is_empty = fs::read_dir(dir.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("read {dir}: {err}")))?
            .next()
            .is_none();
        if is_empty {
            fs::remove_dir(dir.as_std_path())
                .map_err(|err| MirrorError::Filesystem(format!("remove {dir}: {err}")))?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from("/out"), Utf8PathBuf::from("/stage"));
        let folders = vec!["GTN".to_string(), "Topic".to_string(), "Tutorial".to_string()];
        assert_eq!(
            store.staging_path(&folders, "a.txt"),
            Utf8PathBuf::from("/stage/GTN/Topic/Tutorial/a.txt")
        );
        assert!(store.summary_path().ends_with("download-summary.tsv"));
        assert_eq!(store.staging_root(), Utf8Path::new("/stage"));
    }

    #[test]
    fn prune_keeps_root_and_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("stage")).unwrap();
        let store = Store::new(Utf8PathBuf::from("/out"), root.clone());
        fs::create_dir_all(root.join("a/b/c").as_std_path()).unwrap();
        fs::create_dir_all(root.join("d").as_std_path()).unwrap();
        fs::write(root.join("d/keep.txt").as_std_path(), b"x").unwrap();

        assert_eq!(store.prune_staging().unwrap(), 3);
        assert!(root.as_std_path().exists());
        assert!(root.join("d/keep.txt").as_std_path().exists());
        assert!(!root.join("a").as_std_path().exists());
    }
}
