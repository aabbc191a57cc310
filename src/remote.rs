use std::fmt;
use std::fs::File;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RemoteSettings;
use crate::error::MirrorError;
use crate::http::user_agent;

const AUTH_HEADER: &str = "X-Auth-Token";
const KEEPALIVE: Duration = Duration::from_secs(60);
// Slowest sustained upload rate still tolerated before a request is abandoned.
const MIN_UPLOAD_RATE: u64 = 256 * 1024;

// A single deadline covers the whole body, so it grows with the file size.
pub fn upload_deadline(size: u64, allowance: Duration) -> Duration {
    allowance + Duration::from_secs(size.div_ceil(MIN_UPLOAD_RATE))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    #[serde(rename = "fileId")]
    pub file_id: FileId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded,
    AlreadyExists,
}

// Every call is idempotent by name.
pub trait RemoteStore: Send + Sync {
    fn list_children(&self, parent: &FileId) -> Result<Vec<RemoteEntry>, MirrorError>;

    fn create_directory(&self, parent: &FileId, name: &str) -> Result<FileId, MirrorError>;

    fn upload_file(
        &self,
        parent: &FileId,
        local_path: &Utf8Path,
        dest_name: &str,
    ) -> Result<UploadOutcome, MirrorError>;

    fn find_child(&self, parent: &FileId, name: &str) -> Result<Option<FileId>, MirrorError> {
        Ok(self
            .list_children(parent)?
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.file_id))
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    children: Vec<RemoteEntry>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
    #[serde(rename = "isLast", default)]
    is_last: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    #[serde(rename = "fileId")]
    file_id: FileId,
}

#[derive(Clone)]
pub struct OnedataClient {
    client: Client,
    upload_timeout: Duration,
    base_url: String,
}

impl OnedataClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, MirrorError> {
        let token = settings.require_token()?;
        let base_url = settings.base_url()?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent())
                .map_err(|err| MirrorError::RemoteHttp(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(token)
            .map_err(|_| MirrorError::InvalidConfig("access token is not a valid header".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTH_HEADER, auth);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .tcp_keepalive(KEEPALIVE)
            .build()
            .map_err(|err| MirrorError::RemoteHttp(err.to_string()))?;

        Ok(Self {
            client,
            upload_timeout: settings.upload_timeout,
            base_url,
        })
    }

    fn children_url(&self, parent: &FileId) -> String {
        format!("{}/data/{}/children", self.base_url, parent.as_str())
    }

    fn fail(response: Response) -> MirrorError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "remote store request failed".to_string());
        MirrorError::RemoteStatus { status, message }
    }
}

impl fmt::Debug for OnedataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnedataClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// Name clashes come back as 400 with an `eexist` error body.
pub fn is_conflict(status: u16, body: &str) -> bool {
    status == StatusCode::CONFLICT.as_u16()
        || (status == StatusCode::BAD_REQUEST.as_u16() && body.to_ascii_lowercase().contains("eexist"))
}

impl RemoteStore for OnedataClient {
    fn list_children(&self, parent: &FileId) -> Result<Vec<RemoteEntry>, MirrorError> {
        let url = self.children_url(parent);
        let mut children = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut request = self.client.get(&url);
            if let Some(token) = &token {
                request = request.query(&[("token", token.as_str())]);
            }
            let response = request
                .send()
                .map_err(|err| MirrorError::RemoteHttp(err.to_string()))?;
            if !response.status().is_success() {
                return Err(Self::fail(response));
            }
            let page: ChildrenPage = response
                .json()
                .map_err(|err| MirrorError::RemoteHttp(err.to_string()))?;
            children.extend(page.children);
            match (page.is_last, page.next_page_token) {
                (Some(false), Some(next)) => token = Some(next),
                _ => break,
            }
        }
        Ok(children)
    }

    fn create_directory(&self, parent: &FileId, name: &str) -> Result<FileId, MirrorError> {
        let response = self
            .client
            .post(self.children_url(parent))
            .query(&[("name", name), ("type", "DIR")])
            .send()
            .map_err(|err| MirrorError::RemoteHttp(err.to_string()))?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            let created: CreatedFile = response
                .json()
                .map_err(|err| MirrorError::RemoteHttp(err.to_string()))?;
            info!(name, id = %created.file_id, "created remote directory");
            return Ok(created.file_id);
        }

        let body = response.text().unwrap_or_default();
        if !is_conflict(status, &body) {
            return Err(MirrorError::RemoteStatus {
                status,
                message: body,
            });
        }
        debug!(name, "remote directory exists, looking up id");
        self.find_child(parent, name)?
            .ok_or_else(|| MirrorError::RemoteStatus {
                status,
                message: format!("{name} reported as existing but not listed under {parent}"),
            })
    }

    fn upload_file(
        &self,
        parent: &FileId,
        local_path: &Utf8Path,
        dest_name: &str,
    ) -> Result<UploadOutcome, MirrorError> {
        let file = File::open(local_path.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("open {local_path}: {err}")))?;
        let size = file
            .metadata()
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?
            .len();
        let response = self
            .client
            .post(self.children_url(parent))
            .timeout(upload_deadline(size, self.upload_timeout))
            .query(&[("name", dest_name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::sized(file, size))
            .send()
            .map_err(|err| MirrorError::RemoteHttp(err.to_string()))?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            info!(name = dest_name, size, "uploaded file");
            return Ok(UploadOutcome::Uploaded);
        }
        let body = response.text().unwrap_or_default();
        if is_conflict(status, &body) {
            info!(name = dest_name, "file already exists remotely");
            return Ok(UploadOutcome::AlreadyExists);
        }
        Err(MirrorError::RemoteStatus {
            status,
            message: body,
        })
    }
}
