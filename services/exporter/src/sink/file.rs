use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{DeliverySink, SinkError, SinkKind};

/// One lock per destination file, shared by every sink in the process.
static FILE_LOCKS: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    FILE_LOCKS
        .get_or_init(DashMap::new)
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Appends each document as one JSON line to a local file.
pub struct FileSink {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileSink {
    /// Opens the file once in append mode so an unwritable destination is
    /// reported before any record is accepted.
    pub fn new(path: PathBuf) -> Result<Self, SinkError> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        let path = fs::canonicalize(&path).unwrap_or(path);
        let lock = lock_for(&path);
        debug!(path = %path.display(), "file sink ready");

        Ok(Self { path, lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeliverySink for FileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn deliver(&self, document: &Value) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(document)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }
}
