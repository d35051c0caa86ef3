//! Artifact extraction
//!
//! Successful step outputs that follow the artifact convention
//! (`{"artifact": {...}}` or `{"artifacts": [...]}`) are written beneath
//! `<root>/<run_id>/`. Filenames are relative paths; `..` segments, absolute
//! paths and `~` are rejected.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::record::StepRecord;
use crate::contracts::Artifact;
use crate::error::FlowError;
use crate::persist;

#[async_trait]
pub trait ArtifactExtractor: Send + Sync {
    /// Write artifacts found in the run's successful results; returns written paths
    async fn extract(&self, run_id: Uuid, results: &[StepRecord]) -> Result<Vec<PathBuf>, FlowError>;
}

/// Check an artifact filename and return it as a relative path
pub fn safe_relative_path(filename: &str) -> Result<PathBuf, FlowError> {
    if filename.trim().is_empty() {
        return Err(FlowError::validation("artifact filename is empty"));
    }
    if filename.starts_with('~') || filename.contains('\0') {
        return Err(FlowError::validation(format!("artifact path '{}' is not allowed", filename)));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(filename).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FlowError::validation(format!(
                    "artifact path '{}' escapes the artifact directory",
                    filename
                )));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(FlowError::validation(format!("artifact path '{}' names no file", filename)));
    }
    Ok(relative)
}

/// Writes artifacts to the local filesystem
#[derive(Debug, Clone)]
pub struct FsArtifactExtractor {
    root: PathBuf,
}

impl FsArtifactExtractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }
}

#[async_trait]
impl ArtifactExtractor for FsArtifactExtractor {
    async fn extract(&self, run_id: Uuid, results: &[StepRecord]) -> Result<Vec<PathBuf>, FlowError> {
        let artifacts: Vec<Artifact> = results
            .iter()
            .filter_map(|r| r.output().map(|o| Artifact::from_output(&r.step_id, o)))
            .flatten()
            .collect();
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }

        let dir = self.run_dir(run_id);
        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let relative = match safe_relative_path(&artifact.filename) {
                Ok(p) => p,
                Err(e) => {
                    warn!(step_id = %artifact.step_id, filename = %artifact.filename, error = %e, "Rejected artifact");
                    continue;
                }
            };
            let path = dir.join(relative);
            if let Err(e) = persist::write_atomic(&path, artifact.content.as_bytes()).await {
                warn!(step_id = %artifact.step_id, path = %path.display(), error = %e, "Failed to write artifact");
                continue;
            }
            debug!(step_id = %artifact.step_id, path = %path.display(), "Wrote artifact");
            written.push(path);
        }
        Ok(written)
    }
}
