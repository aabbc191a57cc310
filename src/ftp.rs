use std::io::Write;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use percent_encoding::percent_decode_str;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};
use tracing::debug;

use crate::config::TransferSettings;
use crate::domain::SourceUrl;
use crate::transfer::{FetchError, ProgressTracker, SourceFetcher, copy_chunks};

const DEFAULT_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

#[derive(Debug, Clone)]
pub struct FtpFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    chunk_size: usize,
}

impl FtpFetcher {
    pub fn new(settings: &TransferSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout,
            read_timeout: settings.read_timeout,
            chunk_size: settings.chunk_size,
        }
    }

    fn connect(&self, url: &SourceUrl) -> Result<FtpStream, FetchError> {
        let host = url
            .url()
            .host_str()
            .ok_or_else(|| FetchError::Transport(format!("{url}: missing host")))?;
        let port = url.url().port().unwrap_or(DEFAULT_PORT);
        let addr = resolve(host, port)?;
        let mut ftp = FtpStream::connect_timeout(addr, self.connect_timeout)
            .map_err(|err| FetchError::Transport(format!("connect {host}:{port}: {err}")))?;
        ftp.get_ref()
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let (user, password) = match url.url().username() {
            "" => (ANONYMOUS_USER.to_string(), ANONYMOUS_PASSWORD.to_string()),
            user => (
                decode(user),
                url.url().password().map(decode).unwrap_or_default(),
            ),
        };
        ftp.login(&user, &password).map_err(classify_error)?;
        ftp.transfer_type(FileType::Binary)
            .map_err(classify_error)?;
        Ok(ftp)
    }
}

impl SourceFetcher for FtpFetcher {
    fn fetch(
        &self,
        url: &SourceUrl,
        sink: &mut dyn Write,
        progress: &mut ProgressTracker,
    ) -> Result<u64, FetchError> {
        let (directory, file_name) = split_remote_path(url.url().path());
        let mut ftp = self.connect(url)?;
        if !directory.is_empty() {
            ftp.cwd(&directory).map_err(classify_error)?;
        }
        // SIZE is optional on many servers.
        progress.set_expected(ftp.size(&file_name).ok().map(|size| size as u64));
        debug!(url = %url, expected = ?progress.expected(), "ftp retrieve");

        let mut stream = ftp.retr_as_stream(&file_name).map_err(classify_error)?;
        let copied = copy_chunks(&mut stream, sink, self.chunk_size, progress)?;
        ftp.finalize_retr_stream(stream).map_err(classify_error)?;
        if let Err(err) = ftp.quit() {
            debug!(url = %url, error = %err, "ftp quit failed");
        }
        Ok(copied)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, FetchError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|err| FetchError::Transport(format!("resolve {host}: {err}")))?
        .next()
        .ok_or_else(|| FetchError::Transport(format!("resolve {host}: no addresses")))
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn split_remote_path(path: &str) -> (String, String) {
    let decoded = decode(path);
    let trimmed = decoded.trim_start_matches('/');
    match trimmed.rsplit_once('/') {
        Some((directory, file)) => (format!("/{directory}"), file.to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

pub(crate) fn classify_error(err: FtpError) -> FetchError {
    match err {
        FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable => {
            FetchError::NotFound("FTP 550".to_string())
        }
        FtpError::UnexpectedResponse(response) if response.status == Status::NotLoggedIn => {
            FetchError::Rejected("FTP 530 not logged in".to_string())
        }
        other => FetchError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use suppaftp::types::Response;

    use super::*;

    fn reply(status: Status) -> FtpError {
        FtpError::UnexpectedResponse(Response::new(status, b"reply".to_vec()))
    }

    #[test]
    fn unavailable_file_is_not_found() {
        let err = classify_error(reply(Status::FileUnavailable));
        assert_matches!(err, FetchError::NotFound(ref code) if code == "FTP 550");
        assert!(!err.is_retryable());
    }

    #[test]
    fn refused_login_is_terminal() {
        let err = classify_error(reply(Status::NotLoggedIn));
        assert_matches!(err, FetchError::Rejected(_));
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_replies_are_retried() {
        let err = classify_error(reply(Status::NotAvailable));
        assert_matches!(err, FetchError::Transport(_));
        assert!(err.is_retryable());
    }

    #[test]
    fn splits_directory_and_file() {
        assert_eq!(
            split_remote_path("/vol1/fastq/SRR170/SRR17054502_1.fastq.gz"),
            (
                "/vol1/fastq/SRR170".to_string(),
                "SRR17054502_1.fastq.gz".to_string()
            )
        );
        assert_eq!(
            split_remote_path("/top.txt"),
            (String::new(), "top.txt".to_string())
        );
        assert_eq!(
            split_remote_path("/pub/with%20space.txt"),
            ("/pub".to_string(), "with space.txt".to_string())
        );
    }
}
