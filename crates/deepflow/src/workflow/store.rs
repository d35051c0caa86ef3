//! Run record persistence
//!
//! [`FileRunStore`] keeps one JSON file per run (`<run_id>.json`, or
//! `<run_id>.json.zst` when compressed) and writes atomically.
//! [`MemoryRunStore`] is for tests and embedding.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::record::RunRecord;
use crate::error::FlowError;
use crate::persist;

const JSON_EXT: &str = "json";
const ZST_EXT: &str = "json.zst";

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, record: &RunRecord) -> Result<(), FlowError>;

    async fn load(&self, run_id: Uuid) -> Result<Option<RunRecord>, FlowError>;

    /// Stored run ids, sorted
    async fn list(&self) -> Result<Vec<Uuid>, FlowError>;

    async fn delete(&self, run_id: Uuid) -> Result<bool, FlowError>;
}

/// One file per run beneath a directory
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
    compression: bool,
}

impl FileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compression: false,
        }
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a record is written to
    pub fn record_path(&self, run_id: Uuid) -> PathBuf {
        let ext = if self.compression { ZST_EXT } else { JSON_EXT };
        self.dir.join(format!("{}.{}", run_id, ext))
    }

    fn parse_run_id(path: &Path) -> Option<Uuid> {
        let name = path.file_name()?.to_str()?;
        let stem = name
            .strip_suffix(&format!(".{}", ZST_EXT))
            .or_else(|| name.strip_suffix(&format!(".{}", JSON_EXT)))?;
        Uuid::parse_str(stem).ok()
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), FlowError> {
        let json = serde_json::to_vec_pretty(record)?;
        let data = if self.compression {
            persist::compress(&json)?
        } else {
            json
        };
        let path = self.record_path(record.run_id());
        persist::write_atomic(&path, &data).await?;
        debug!(run_id = %record.run_id(), path = %path.display(), bytes = data.len(), "Saved run record");
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<RunRecord>, FlowError> {
        // Either format is readable regardless of the current setting
        let plain = self.dir.join(format!("{}.{}", run_id, JSON_EXT));
        if let Some(data) = persist::read_optional(&plain).await? {
            return Ok(Some(serde_json::from_slice(&data)?));
        }
        let packed = self.dir.join(format!("{}.{}", run_id, ZST_EXT));
        match persist::read_optional(&packed).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&persist::decompress(&data)?)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Uuid>, FlowError> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = Self::parse_run_id(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn delete(&self, run_id: Uuid) -> Result<bool, FlowError> {
        let mut removed = false;
        for ext in [JSON_EXT, ZST_EXT] {
            let path = self.dir.join(format!("{}.{}", run_id, ext));
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    records: RwLock<HashMap<Uuid, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), FlowError> {
        self.records.write().await.insert(record.run_id(), record.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<RunRecord>, FlowError> {
        Ok(self.records.read().await.get(&run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Uuid>, FlowError> {
        let mut ids: Vec<Uuid> = self.records.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, run_id: Uuid) -> Result<bool, FlowError> {
        Ok(self.records.write().await.remove(&run_id).is_some())
    }
}
