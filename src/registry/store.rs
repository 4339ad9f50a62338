//! Whole-collection JSON persistence for agent records
//!
//! Every mutation reads the full file, changes one record and writes the
//! full file back through a temp file and rename. The mutex serializes
//! writers inside this process only; one process owns the file at a time.

use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::record::AgentRecord;
use crate::error::{Result, SigilError};

pub struct AgentStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AgentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records; a missing file is an empty collection
    pub async fn load(&self) -> Result<Vec<AgentRecord>> {
        let _guard = self.lock.lock().await;
        read_all(&self.path).await
    }

    /// Read-modify-write under the store lock. Nothing is written when `f` fails.
    pub async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<AgentRecord>) -> Result<T>,
    {
        let _guard = self.lock.lock().await;
        let mut records = read_all(&self.path).await?;
        let value = f(&mut records)?;
        write_all(&self.path, &records).await?;
        Ok(value)
    }
}

async fn read_all(path: &Path) -> Result<Vec<AgentRecord>> {
    let body = match tokio::fs::read_to_string(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SigilError::Io(e)),
    };
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&body).map_err(SigilError::from)
}

async fn write_all(path: &Path, records: &[AgentRecord]) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Err(SigilError::Internal("invalid registry path".to_string()));
    };
    if !parent.as_os_str().is_empty() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(records)?;
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!("Wrote {} agent records to {}", records.len(), path.display());
    Ok(())
}
