use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TransferSettings;
use crate::domain::{Protocol, SourceUrl, TransferStatus};

const MIB: f64 = 1024.0 * 1024.0;
const REPORT_EVERY: u64 = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found ({0})")]
    NotFound(String),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("server refused the request: {0}")]
    Rejected(String),

    #[error("{0}")]
    Transport(String),

    #[error("truncated body: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("local write failed: {0}")]
    Io(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::NotFound(_) | FetchError::Rejected(_) | FetchError::Io(_) => false,
            FetchError::Status(status) => is_retryable_status(*status),
            FetchError::Transport(_) | FetchError::Truncated { .. } => true,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

pub trait SourceFetcher: Send + Sync {
    fn fetch(
        &self,
        url: &SourceUrl,
        sink: &mut dyn Write,
        progress: &mut ProgressTracker,
    ) -> Result<u64, FetchError>;
}

pub trait Sleeper: Send + Sync {
    fn pause(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn pause(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl From<&TransferSettings> for RetryPolicy {
    fn from(settings: &TransferSettings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            backoff: settings.backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    pub size: u64,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct ProgressTracker {
    label: String,
    received: u64,
    last_reported: u64,
    expected: Option<u64>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            received: 0,
            last_reported: 0,
            expected: None,
            started: Instant::now(),
        }
    }

    pub fn set_expected(&mut self, expected: Option<u64>) {
        self.expected = expected;
    }

    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn advance(&mut self, bytes: u64) {
        self.received += bytes;
        if self.received - self.last_reported >= REPORT_EVERY {
            self.last_reported = self.received;
            info!(
                file = %self.label,
                mb = format_args!("{:.1}", self.received as f64 / MIB),
                "transfer progress"
            );
        }
    }

    fn finish(&self) {
        info!(
            file = %self.label,
            mb = format_args!("{:.1}", self.received as f64 / MIB),
            secs = format_args!("{:.1}", self.started.elapsed().as_secs_f64()),
            "transfer complete"
        );
    }
}

pub(crate) fn copy_chunks(
    reader: &mut dyn Read,
    sink: &mut dyn Write,
    chunk_size: usize,
    progress: &mut ProgressTracker,
) -> Result<u64, FetchError> {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FetchError::Transport(err.to_string())),
        };
        sink.write_all(&buffer[..read])
            .map_err(|err| FetchError::Io(err.to_string()))?;
        total += read as u64;
        progress.advance(read as u64);
    }
    sink.flush().map_err(|err| FetchError::Io(err.to_string()))?;
    Ok(total)
}

// The destination only ever holds a complete body.
pub struct TransferEngine<H: SourceFetcher, F: SourceFetcher> {
    http: H,
    ftp: F,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl<H: SourceFetcher, F: SourceFetcher> TransferEngine<H, F> {
    pub fn new(http: H, ftp: F, policy: RetryPolicy) -> Self {
        Self {
            http,
            ftp,
            policy,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn fetch(&self, url: &SourceUrl, dest: &Utf8Path) -> TransferOutcome {
        if let Some(size) = existing_size(dest) {
            debug!(dest = %dest, size, "destination already populated");
            return TransferOutcome {
                status: TransferStatus::SkippedExists,
                size,
                attempts: 0,
            };
        }

        let Some(parent) = dest.parent().filter(|parent| !parent.as_str().is_empty()) else {
            return failed(format!("destination {dest} has no parent directory"), 0);
        };
        if let Err(err) = fs::create_dir_all(parent.as_std_path()) {
            return failed(format!("create {parent}: {err}"), 0);
        }

        let fetcher: &dyn SourceFetcher = match url.protocol() {
            Protocol::Ftp => &self.ftp,
            Protocol::Http => &self.http,
        };
        let max_retries = self.policy.max_retries.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(url = %url, attempt, "starting transfer");
            match self.attempt(fetcher, url, dest, parent) {
                Ok(size) => {
                    return TransferOutcome {
                        status: TransferStatus::Downloaded,
                        size,
                        attempts: attempt,
                    };
                }
                Err(FetchError::NotFound(code)) => {
                    info!(url = %url, %code, "source not found, skipping");
                    return TransferOutcome {
                        status: TransferStatus::SkippedNotFound(code),
                        size: 0,
                        attempts: attempt,
                    };
                }
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        url = %url,
                        attempt,
                        max_retries,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "transfer attempt failed, retrying"
                    );
                    self.sleeper.pause(delay);
                }
                Err(err) => {
                    warn!(url = %url, attempt, error = %err, "transfer failed");
                    return failed(err.to_string(), attempt);
                }
            }
        }
    }

    fn attempt(
        &self,
        fetcher: &dyn SourceFetcher,
        url: &SourceUrl,
        dest: &Utf8Path,
        parent: &Utf8Path,
    ) -> Result<u64, FetchError> {
        let file_name = dest.file_name().unwrap_or("download");
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| FetchError::Io(err.to_string()))?;

        let mut progress = ProgressTracker::new(file_name);
        let size = fetcher.fetch(url, temp.as_file_mut(), &mut progress)?;
        if let Some(expected) = progress.expected() {
            if expected != size {
                return Err(FetchError::Truncated {
                    expected,
                    received: size,
                });
            }
        }
        temp.as_file()
            .sync_all()
            .map_err(|err| FetchError::Io(err.to_string()))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| FetchError::Io(err.error.to_string()))?;
        progress.finish();
        Ok(size)
    }
}

fn failed(message: String, attempts: u32) -> TransferOutcome {
    TransferOutcome {
        status: TransferStatus::Error(message),
        size: 0,
        attempts,
    }
}

pub fn existing_size(path: &Utf8Path) -> Option<u64> {
    fs::metadata(path.as_std_path())
        .ok()
        .filter(|meta| meta.is_file() && meta.len() > 0)
        .map(|meta| meta.len())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<Vec<u8>, FetchError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Vec<u8>, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl SourceFetcher for ScriptedFetcher {
        fn fetch(
            &self,
            _url: &SourceUrl,
            sink: &mut dyn Write,
            progress: &mut ProgressTracker,
        ) -> Result<u64, FetchError> {
            *self.calls.lock().unwrap() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".to_string())));
            let body = next?;
            sink.write_all(&body).unwrap();
            progress.advance(body.len() as u64);
            Ok(body.len() as u64)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSleeper {
        delays: Arc<Mutex<Vec<Duration>>>,
    }

    impl Sleeper for RecordingSleeper {
        fn pause(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_secs(2),
        }
    }

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, root)
    }

    fn http_url() -> SourceUrl {
        SourceUrl::parse("https://example.org/files/data.txt").unwrap()
    }

    #[test]
    fn retries_until_success_with_growing_backoff() {
        let (_temp, root) = scratch();
        let dest = root.join("out/data.txt");
        let failures = 3;
        let mut script: Vec<Result<Vec<u8>, FetchError>> = (0..failures)
            .map(|i| Err(FetchError::Transport(format!("reset {i}"))))
            .collect();
        script.push(Ok(b"payload".to_vec()));
        let sleeper = RecordingSleeper::default();
        let engine = TransferEngine::new(
            ScriptedFetcher::new(script),
            ScriptedFetcher::default(),
            policy(failures + 1),
        )
        .with_sleeper(sleeper.clone());

        let outcome = engine.fetch(&http_url(), &dest);

        assert_eq!(outcome.status, TransferStatus::Downloaded);
        assert_eq!(outcome.attempts, failures + 1);
        assert_eq!(outcome.size, 7);
        assert_eq!(fs::read(dest.as_std_path()).unwrap(), b"payload");
        let delays = sleeper.delays.lock().unwrap().clone();
        assert_eq!(delays.len(), failures as usize);
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays[0], Duration::from_secs(2));
    }

    #[test]
    fn second_fetch_skips_network() {
        let (_temp, root) = scratch();
        let dest = root.join("data.txt");
        let engine = TransferEngine::new(
            ScriptedFetcher::new(vec![Ok(b"abc".to_vec()), Ok(b"abc".to_vec())]),
            ScriptedFetcher::default(),
            policy(1),
        );

        let first = engine.fetch(&http_url(), &dest);
        let second = engine.fetch(&http_url(), &dest);

        assert_eq!(first.status, TransferStatus::Downloaded);
        assert_eq!(second.status, TransferStatus::SkippedExists);
        assert_eq!(second.size, 3);
        assert_eq!(second.attempts, 0);
        assert_eq!(engine.http.calls(), 1);
    }

    #[test]
    fn not_found_is_terminal() {
        let (_temp, root) = scratch();
        let dest = root.join("missing.txt");
        let engine = TransferEngine::new(
            ScriptedFetcher::new(vec![Err(FetchError::NotFound("HTTP 404".to_string()))]),
            ScriptedFetcher::default(),
            policy(5),
        )
        .with_sleeper(RecordingSleeper::default());

        let outcome = engine.fetch(&http_url(), &dest);

        assert_matches!(outcome.status, TransferStatus::SkippedNotFound(ref code) if code == "HTTP 404");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.size, 0);
        assert!(!dest.as_std_path().exists());
    }

    #[test]
    fn exhausted_retries_leave_no_partial_file() {
        let (_temp, root) = scratch();
        let dest = root.join("data.txt");
        let engine = TransferEngine::new(
            ScriptedFetcher::new(vec![
                Err(FetchError::Truncated {
                    expected: 10,
                    received: 4,
                }),
                Err(FetchError::Status(503)),
            ]),
            ScriptedFetcher::default(),
            policy(2),
        )
        .with_sleeper(RecordingSleeper::default());

        let outcome = engine.fetch(&http_url(), &dest);

        assert_matches!(outcome.status, TransferStatus::Error(ref message) if message.contains("503"));
        assert_eq!(outcome.attempts, 2);
        assert!(!dest.as_std_path().exists());
        let leftovers = fs::read_dir(root.as_std_path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (_temp, root) = scratch();
        let engine = TransferEngine::new(
            ScriptedFetcher::new(vec![Err(FetchError::Status(410))]),
            ScriptedFetcher::default(),
            policy(4),
        );

        let outcome = engine.fetch(&http_url(), &root.join("gone.txt"));

        assert_matches!(outcome.status, TransferStatus::Error(_));
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn ftp_unavailable_file_is_skipped() {
        let (_temp, root) = scratch();
        let unavailable = suppaftp::FtpError::UnexpectedResponse(suppaftp::types::Response::new(
            suppaftp::Status::FileUnavailable,
            b"550 No such file".to_vec(),
        ));
        let sleeper = RecordingSleeper::default();
        let engine = TransferEngine::new(
            ScriptedFetcher::default(),
            ScriptedFetcher::new(vec![Err(crate::ftp::classify_error(unavailable))]),
            policy(3),
        )
        .with_sleeper(sleeper.clone());
        let url = SourceUrl::parse("ftp://ftp.example.org/pub/gone.fq").unwrap();
        let dest = root.join("gone.fq");

        let outcome = engine.fetch(&url, &dest);

        assert_eq!(
            outcome.status,
            TransferStatus::SkippedNotFound("FTP 550".to_string())
        );
        assert_eq!(outcome.size, 0);
        assert_eq!(engine.ftp.calls(), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
        assert!(!dest.as_std_path().exists());
    }

    #[test]
    fn ftp_urls_use_ftp_handler() {
        let (_temp, root) = scratch();
        let engine = TransferEngine::new(
            ScriptedFetcher::default(),
            ScriptedFetcher::new(vec![Ok(b"reads".to_vec())]),
            policy(1),
        );
        let url = SourceUrl::parse("ftp://ftp.example.org/pub/reads.fq").unwrap();

        let outcome = engine.fetch(&url, &root.join("reads.fq"));

        assert_eq!(outcome.status, TransferStatus::Downloaded);
        assert_eq!(engine.ftp.calls(), 1);
        assert_eq!(engine.http.calls(), 0);
    }

    #[test]
    fn empty_destination_is_refetched() {
        let (_temp, root) = scratch();
        let dest = root.join("data.txt");
        fs::write(dest.as_std_path(), b"").unwrap();
        let engine = TransferEngine::new(
            ScriptedFetcher::new(vec![Ok(b"fresh".to_vec())]),
            ScriptedFetcher::default(),
            policy(1),
        );

        let outcome = engine.fetch(&http_url(), &dest);

        assert_eq!(outcome.status, TransferStatus::Downloaded);
        assert_eq!(fs::read(dest.as_std_path()).unwrap(), b"fresh");
    }
}
