//! Error kinds shared by the fetch, store and orchestration layers.

use std::path::PathBuf;

use thiserror::Error;

/// Underlying reason a page request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchCause {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream error code {code}: {message}")]
    Upstream { code: String, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchCause {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Upstream { .. } | Self::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("fetch failed for {inst_id} {bar}: {cause}")]
    FetchFailed {
        inst_id: String,
        bar: String,
        cause: FetchCause,
    },
    #[error("corrupt record in {path} at line {line}: {reason}")]
    CorruptRecord {
        path: PathBuf,
        line: u64,
        reason: String,
    },
    #[error("insufficient history: need {required} rows, have {available}")]
    InsufficientHistory { required: usize, available: usize },
    #[error("write failed for {path}: {message}")]
    WriteFailed { path: PathBuf, message: String },
    #[error("ingestion cancelled after {pages_fetched} pages")]
    Cancelled { pages_fetched: u32 },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn is_retryable_fetch(&self) -> bool {
        matches!(self, Self::FetchFailed { cause, .. } if cause.is_retryable())
    }
}
