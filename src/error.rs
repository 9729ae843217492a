use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AtlasError {
    #[error("invalid session name: {0}")]
    InvalidSessionName(String),

    #[error("unknown deposit state: state={state} submitted={submitted}")]
    UnknownDepositState { state: String, submitted: bool },

    #[error("missing config file reef-am.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no access token configured (set access_token in reef-am.json or ATLAS_ACCESS_TOKEN)")]
    MissingAccessToken,

    #[error("deposit request failed: {0}")]
    DepositHttp(String),

    #[error("deposit service returned status {status}: {message}")]
    DepositStatus { status: u16, message: String },

    #[error("no deposit found for session {0}")]
    SessionNotFound(String),

    #[error("more than one deposit found for session {0}")]
    AmbiguousSession(String),

    #[error("transfer request failed: {0}")]
    TransferHttp(String),

    #[error("transfer endpoint returned status {status}: {message}")]
    TransferStatus { status: u16, message: String },

    #[error("transfer of {url} failed after {attempts} attempts")]
    TransferExhausted { url: String, attempts: usize },

    #[error("transfer cancelled")]
    TransferCancelled,

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("reconciliation incomplete for {session}: no remote match for {missing_keys:?}")]
    ReconcileIncomplete {
        session: String,
        missing_keys: Vec<String>,
    },

    #[error("staged artifacts exceed the deposit size limit: {total_bytes} bytes")]
    DepositTooLarge { total_bytes: u64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("data integrity error: {0}")]
    Integrity(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl AtlasError {
    /// Errors worth another attempt inside the transfer retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AtlasError::TransferHttp(_)
                | AtlasError::ChecksumMismatch { .. }
                | AtlasError::TransferStatus {
                    status: 408 | 429 | 500 | 502 | 503 | 504,
                    ..
                }
        )
    }

    /// Errors that abort the whole run instead of one session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AtlasError::MissingConfig
                | AtlasError::ConfigRead(_)
                | AtlasError::ConfigParse(_)
                | AtlasError::MissingAccessToken
                | AtlasError::DepositStatus {
                    status: 401 | 403,
                    ..
                }
        )
    }
}

impl From<rusqlite::Error> for AtlasError {
    fn from(err: rusqlite::Error) -> Self {
        AtlasError::Database(err.to_string())
    }
}
