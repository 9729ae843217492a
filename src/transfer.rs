use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use sha2::{Digest, Sha256};

use crate::domain::StagedArtifact;
use crate::error::AtlasError;

pub const MAX_TRANSFER_ATTEMPTS: usize = 50;
pub const RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Cooperative cancellation for long transfers. A cancelled token makes the
/// current retry loop abort with a terminal error instead of retrying.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bounded retry with a fixed delay, applied uniformly to uploads and
/// downloads. Only errors marked retryable consume further attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_TRANSFER_ATTEMPTS,
            delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails terminally, is cancelled, or the
    /// attempt bound is reached.
    pub fn run<T, F>(&self, cancel: &CancelToken, url: &str, mut op: F) -> Result<T, AtlasError>
    where
        F: FnMut() -> Result<T, AtlasError>,
    {
        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(AtlasError::TransferCancelled);
            }
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(AtlasError::TransferExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                        });
                    }
                    if cancel.is_cancelled() {
                        return Err(AtlasError::TransferCancelled);
                    }
                    tracing::warn!(url, attempt, error = %err, "transfer attempt failed, retrying");
                    thread::sleep(self.delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn handle_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, AtlasError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "transfer request failed".to_string());
    Err(AtlasError::TransferStatus { status, message })
}

/// Streams `url` into `destination`. Partial files from failed attempts are
/// truncated on the next attempt, never appended. When the remote side
/// declares a `sha256:<hex>` checksum, the downloaded bytes are verified and
/// a mismatch consumes a retry attempt.
pub fn download_file(
    client: &Client,
    url: &str,
    params: &[(&str, &str)],
    destination: &Path,
    expected_checksum: Option<&str>,
    policy: &RetryPolicy,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> Result<(), AtlasError> {
    let start = Instant::now();
    policy.run(cancel, url, || {
        let response = client
            .get(url)
            .query(params)
            .send()
            .map_err(|err| AtlasError::TransferHttp(err.to_string()))?;
        let mut response = handle_status(response)?;

        let mut file =
            File::create(destination).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let written = std::io::copy(&mut response, &mut file)
            .map_err(|err| AtlasError::TransferHttp(err.to_string()))?;

        if let Some(expected) = expected_checksum {
            verify_checksum(destination, expected)?;
        }

        sink.event(ProgressEvent {
            message: format!("transfer.download bytes={written}"),
            elapsed: Some(start.elapsed()),
        });
        Ok(())
    })
}

/// Streams a staged artifact to `{bucket_url}/{key}` with the same retry
/// contract as downloads.
pub fn upload_file(
    client: &Client,
    bucket_url: &str,
    artifact: &StagedArtifact,
    params: &[(&str, &str)],
    policy: &RetryPolicy,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> Result<(), AtlasError> {
    let url = format!("{}/{}", bucket_url.trim_end_matches('/'), artifact.key);
    let start = Instant::now();
    policy.run(cancel, &url, || {
        let file = File::open(artifact.path.as_std_path())
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let response = client
            .put(&url)
            .query(params)
            .body(reqwest::blocking::Body::sized(file, artifact.size))
            .send()
            .map_err(|err| AtlasError::TransferHttp(err.to_string()))?;
        handle_status(response)?;
        sink.event(ProgressEvent {
            message: format!("transfer.upload key={} bytes={}", artifact.key, artifact.size),
            elapsed: Some(start.elapsed()),
        });
        Ok(())
    })
}

/// Checks a declared `sha256:<hex>` checksum against the file on disk.
/// Declarations in another scheme are skipped, not failed.
pub fn verify_checksum(path: &Path, declared: &str) -> Result<(), AtlasError> {
    let Some(expected) = declared.strip_prefix("sha256:") else {
        tracing::debug!(declared, "unsupported checksum scheme, skipping verification");
        return Ok(());
    };

    let mut file = File::open(path).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.to_lowercase() {
        return Err(AtlasError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
