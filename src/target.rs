use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::domain::{SourceUrl, TransferStatus, sanitize_filename};
use crate::error::MirrorError;
use crate::fs_util::{ensure_dir, remove_file_if_exists};
use crate::remote::{FileId, RemoteStore, UploadOutcome};
use crate::store::Store;
use crate::transfer::{SourceFetcher, TransferEngine, TransferOutcome};

pub trait MirrorTarget {
    type Folder: Clone;

    fn root(&self) -> Result<Self::Folder, MirrorError>;

    fn ensure_folder(&self, parent: &Self::Folder, name: &str) -> Result<Self::Folder, MirrorError>;

    fn folder_label(&self, folder: &Self::Folder) -> String;

    // Name the item is written under.
    fn file_name(&self, url: &SourceUrl) -> String {
        url.file_name()
    }

    // Never fails: problems end up in the outcome status.
    fn deliver(&self, folder: &Self::Folder, folders: &[String], url: &SourceUrl)
    -> TransferOutcome;
}

pub struct LocalTarget<'a, H: SourceFetcher, F: SourceFetcher> {
    store: &'a Store,
    engine: &'a TransferEngine<H, F>,
}

impl<'a, H: SourceFetcher, F: SourceFetcher> LocalTarget<'a, H, F> {
    pub fn new(store: &'a Store, engine: &'a TransferEngine<H, F>) -> Self {
        Self { store, engine }
    }
}

impl<H: SourceFetcher, F: SourceFetcher> MirrorTarget for LocalTarget<'_, H, F> {
    type Folder = Utf8PathBuf;

    fn root(&self) -> Result<Self::Folder, MirrorError> {
        self.store.ensure_output_root()?;
        Ok(self.store.output_root().to_path_buf())
    }

    fn ensure_folder(&self, parent: &Self::Folder, name: &str) -> Result<Self::Folder, MirrorError> {
        let path = parent.join(name);
        ensure_dir(&path)?;
        Ok(path)
    }

    fn folder_label(&self, folder: &Self::Folder) -> String {
        folder.to_string()
    }

    fn deliver(
        &self,
        folder: &Self::Folder,
        _folders: &[String],
        url: &SourceUrl,
    ) -> TransferOutcome {
        let dest = folder.join(self.file_name(url));
        self.engine.fetch(url, &dest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub id: FileId,
    pub path: String,
}

pub struct RemoteTarget<'a, S: RemoteStore, H: SourceFetcher, F: SourceFetcher> {
    remote: &'a S,
    root_id: FileId,
    store: &'a Store,
    engine: &'a TransferEngine<H, F>,
}

impl<'a, S: RemoteStore, H: SourceFetcher, F: SourceFetcher> RemoteTarget<'a, S, H, F> {
    pub fn new(
        remote: &'a S,
        root_id: FileId,
        store: &'a Store,
        engine: &'a TransferEngine<H, F>,
    ) -> Self {
        Self {
            remote,
            root_id,
            store,
            engine,
        }
    }
}

impl<S: RemoteStore, H: SourceFetcher, F: SourceFetcher> MirrorTarget
    for RemoteTarget<'_, S, H, F>
{
    type Folder = RemoteFolder;

    fn root(&self) -> Result<Self::Folder, MirrorError> {
        self.store.ensure_staging_root()?;
        Ok(RemoteFolder {
            id: self.root_id.clone(),
            path: String::new(),
        })
    }

    fn ensure_folder(&self, parent: &Self::Folder, name: &str) -> Result<Self::Folder, MirrorError> {
        let id = self.remote.create_directory(&parent.id, name)?;
        let path = if parent.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", parent.path)
        };
        Ok(RemoteFolder { id, path })
    }

    fn folder_label(&self, folder: &Self::Folder) -> String {
        folder.path.clone()
    }

    fn file_name(&self, url: &SourceUrl) -> String {
        sanitize_filename(&url.file_name())
    }

    fn deliver(
        &self,
        folder: &Self::Folder,
        folders: &[String],
        url: &SourceUrl,
    ) -> TransferOutcome {
        let dest_name = self.file_name(url);

        match self.remote.find_child(&folder.id, &dest_name) {
            Ok(Some(_)) => {
                info!(name = %dest_name, folder = %folder.path, "already present remotely");
                return TransferOutcome {
                    status: TransferStatus::SkippedRemoteExists,
                    size: 0,
                    attempts: 0,
                };
            }
            Ok(None) => {}
            Err(err) => {
                return TransferOutcome {
                    status: TransferStatus::UploadFailed(format!("listing {}: {err}", folder.path)),
                    size: 0,
                    attempts: 0,
                };
            }
        }

        let staged = self.store.staging_path(folders, &dest_name);
        let fetched = self.engine.fetch(url, &staged);
        if !matches!(
            fetched.status,
            TransferStatus::Downloaded | TransferStatus::SkippedExists
        ) {
            return fetched;
        }

        let status = match self.remote.upload_file(&folder.id, &staged, &dest_name) {
            Ok(outcome) => {
                if let Err(err) = remove_file_if_exists(&staged) {
                    warn!(path = %staged, error = %err, "failed to remove staged file");
                }
                match outcome {
                    UploadOutcome::Uploaded => TransferStatus::Uploaded,
                    UploadOutcome::AlreadyExists => TransferStatus::SkippedRemoteExists,
                }
            }
            Err(err) => {
                warn!(name = %dest_name, error = %err, "upload failed, keeping staged copy");
                TransferStatus::UploadFailed(err.to_string())
            }
        };
        let size = if status.is_failure() { 0 } else { fetched.size };
        TransferOutcome {
            status,
            size,
            attempts: fetched.attempts,
        }
    }
}
