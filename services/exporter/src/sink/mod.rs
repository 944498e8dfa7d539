//! Document sinks.
//!
//! A sink accepts one serialized document per call. Failures are reported
//! to the caller and never retried here.

mod error;
mod file;
mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Destination, SinkConfig};

pub use error::SinkError;
pub use file::FileSink;
pub use http::HttpSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    File,
    Http,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::File => write!(f, "file"),
            SinkKind::Http => write!(f, "http"),
        }
    }
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn kind(&self) -> SinkKind;

    async fn deliver(&self, document: &Value) -> Result<(), SinkError>;
}

/// Builds the sink described by `config`. Errors here mean no document
/// could ever be delivered and are fatal to the caller.
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn DeliverySink>, SinkError> {
    let sink: Arc<dyn DeliverySink> = match &config.destination {
        Destination::File(path) => Arc::new(FileSink::new(path.clone())?),
        Destination::Http(url) => Arc::new(HttpSink::new(
            url,
            config.credentials.clone(),
            config.request_timeout,
        )?),
    };
    Ok(sink)
}
