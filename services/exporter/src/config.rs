use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Worker count used when documents are appended to a local file.
pub const DEFAULT_FILE_WORKERS: usize = 1;
/// Worker count used when documents are sent to a remote endpoint.
pub const DEFAULT_HTTP_WORKERS: usize = 10;

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub destination: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub encode_content: bool,
    pub file_workers: usize,
    pub http_workers: usize,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            username: None,
            password: None,
            encode_content: false,
            file_workers: DEFAULT_FILE_WORKERS,
            http_workers: DEFAULT_HTTP_WORKERS,
            request_timeout_secs: 10,
            log_level: "info".to_string(),
        }
    }
}

/// Where documents go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    Http(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// Resolved sink parameters, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub destination: Destination,
    pub credentials: Option<Credentials>,
    pub encode_content: bool,
    pub request_timeout: Duration,
    pub workers: usize,
}

impl ExporterConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(destination) = env::var("DUMP_DESTINATION") {
            cfg.destination = destination;
        }
        if let Ok(username) = env::var("DUMP_USERNAME") {
            cfg.username = non_empty(username);
        }
        if let Ok(password) = env::var("DUMP_PASSWORD") {
            cfg.password = non_empty(password);
        }
        if let Ok(flag) = env::var("DUMP_ENCODECONTENT") {
            cfg.encode_content = parse_bool(&flag)
                .with_context(|| format!("DUMP_ENCODECONTENT is invalid: {flag}"))?;
        }
        if let Ok(workers) = env::var("FILE_WORKERS") {
            cfg.file_workers = workers
                .parse()
                .context("FILE_WORKERS must be a positive integer")?;
        }
        if let Ok(workers) = env::var("HTTP_WORKERS") {
            cfg.http_workers = workers
                .parse()
                .context("HTTP_WORKERS must be a positive integer")?;
        }
        if let Ok(timeout) = env::var("REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = timeout
                .parse()
                .context("REQUEST_TIMEOUT_SECS must be a positive integer")?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<&Self> {
        if self.destination.trim().is_empty() {
            anyhow::bail!("DUMP_DESTINATION must be provided");
        }
        if self.password.is_some() && self.username.is_none() {
            anyhow::bail!("DUMP_PASSWORD requires DUMP_USERNAME");
        }
        if self.username.is_some() && !is_url(&self.destination) {
            anyhow::bail!("DUMP_USERNAME only applies to http:// or https:// destinations");
        }
        if self.file_workers == 0 {
            anyhow::bail!("FILE_WORKERS must be greater than zero");
        }
        if self.http_workers == 0 {
            anyhow::bail!("HTTP_WORKERS must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        Ok(self)
    }

    pub fn destination(&self) -> Destination {
        if is_url(&self.destination) {
            Destination::Http(self.destination.clone())
        } else {
            Destination::File(PathBuf::from(&self.destination))
        }
    }

    /// Resolves the sink parameters, picking the worker pool size that
    /// matches the destination kind.
    pub fn sink_config(&self) -> SinkConfig {
        let destination = self.destination();
        let workers = match destination {
            Destination::File(_) => self.file_workers,
            Destination::Http(_) => self.http_workers,
        };

        SinkConfig {
            destination,
            credentials: self.username.clone().map(|username| Credentials {
                username,
                password: self.password.clone(),
            }),
            encode_content: self.encode_content,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            workers,
        }
    }
}

fn is_url(destination: &str) -> bool {
    destination.starts_with("http://") || destination.starts_with("https://")
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}
