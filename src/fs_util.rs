use std::fs;
use std::io::Write;

use camino::Utf8Path;
use tempfile::Builder;

use crate::error::MirrorError;

pub fn ensure_dir(path: &Utf8Path) -> Result<(), MirrorError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("create {path}: {err}")))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MirrorError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    ensure_dir(parent)?;
    let mut temp = Builder::new()
        .prefix(".gtn-mirror")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| MirrorError::Filesystem(err.error.to_string()))?;
    Ok(())
}

pub fn remove_file_if_exists(path: &Utf8Path) -> Result<(), MirrorError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(MirrorError::Filesystem(format!("remove {path}: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("nested/file.txt")).unwrap();
        write_bytes_atomic(&path, b"one").unwrap();
        write_bytes_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"two");
        assert_eq!(fs::read_dir(temp.path().join("nested")).unwrap().count(), 1);
    }

    #[test]
    fn removing_missing_file_is_fine() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("absent")).unwrap();
        remove_file_if_exists(&path).unwrap();
    }
}
