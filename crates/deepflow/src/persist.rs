//! File persistence helpers shared by the run store and router stats.
//!
//! Writes go to a sibling `.tmp` file, are synced, then renamed over the
//! target so readers never observe a partial file.

use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::FlowError;

/// Compress data using zstd
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>, FlowError> {
    let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
        .map_err(|e| FlowError::serialization(format!("Compression init failed: {}", e)))?;
    encoder
        .write_all(data)
        .map_err(|e| FlowError::serialization(format!("Compression write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| FlowError::serialization(format!("Compression finish failed: {}", e)))
}

/// Decompress data using zstd
pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>, FlowError> {
    zstd::stream::decode_all(data)
        .map_err(|e| FlowError::serialization(format!("Decompression failed: {}", e)))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `data` to `path` atomically, creating parent directories
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), FlowError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let temp = temp_path(path);
    let mut file = fs::File::create(&temp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp, path).await?;
    Ok(())
}

/// Read a file, returning `None` when it does not exist
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, FlowError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
