use std::io::Write;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::TransferSettings;
use crate::domain::SourceUrl;
use crate::error::MirrorError;
use crate::transfer::{FetchError, ProgressTracker, SourceFetcher, copy_chunks};

pub fn user_agent() -> String {
    format!("gtn-mirror/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    chunk_size: usize,
}

impl HttpFetcher {
    pub fn new(settings: &TransferSettings) -> Result<Self, MirrorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent())
                .map_err(|err| MirrorError::Transfer(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()
            .map_err(|err| MirrorError::Transfer(err.to_string()))?;
        Ok(Self {
            client,
            chunk_size: settings.chunk_size,
        })
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &SourceUrl,
        sink: &mut dyn Write,
        progress: &mut ProgressTracker,
    ) -> Result<u64, FetchError> {
        let mut response = self
            .client
            .get(url.url().clone())
            .send()
            .map_err(|err| classify_error(&err))?;
        let status = response.status().as_u16();
        debug!(url = %url, status, "http response");
        if matches!(status, 403 | 404) {
            return Err(FetchError::NotFound(format!("HTTP {status}")));
        }
        if !response.status().is_success() {
            return Err(FetchError::Status(status));
        }
        progress.set_expected(response.content_length());
        copy_chunks(&mut response, sink, self.chunk_size, progress)
    }
}

fn classify_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transport(format!("timed out: {err}"))
    } else if err.is_connect() {
        FetchError::Transport(format!("connection failed: {err}"))
    } else {
        FetchError::Transport(err.to_string())
    }
}
