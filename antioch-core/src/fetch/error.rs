use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("descriptor has no url")]
    MissingUrl,
    #[error("unsupported url {0}")]
    UnsupportedUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("timed out after {after:?} while {stage} {url}")]
    Timeout {
        url: String,
        stage: &'static str,
        after: Duration,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("site extractor failed: {0}")]
    Extractor(String),
    #[error("no downloadable variant for {0}")]
    NoVariant(String),
    #[error("fetch cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        FetchError::Network(error.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        FetchError::Extractor(error.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
