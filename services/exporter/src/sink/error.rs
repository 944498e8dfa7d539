use std::io;
use std::path::PathBuf;

use reqwest::Error as ReqwestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("endpoint responded with status {0}")]
    Status(reqwest::StatusCode),
}

impl From<ReqwestError> for SinkError {
    fn from(error: ReqwestError) -> Self {
        match error.status() {
            Some(status) => SinkError::Status(status),
            None => SinkError::Network(error.to_string()),
        }
    }
}
