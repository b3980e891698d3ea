use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::job::Job;

const SNAPSHOT_VERSION: u32 = 1;

/// Serialized engine state. The format is internal; only round-tripping matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub total_submitted: u64,
    pub jobs: Vec<Job>,
}

impl EngineSnapshot {
    pub fn new(total_submitted: u64, jobs: Vec<Job>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            total_submitted,
            jobs,
        }
    }
}

/// Write the snapshot as JSON, replacing any previous file atomically.
pub async fn save(path: &Path, snapshot: &EngineSnapshot) -> Result<(), SnapshotError> {
    let payload = serde_json::to_vec_pretty(snapshot).map_err(SnapshotError::Serialize)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(SnapshotError::Io)?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &payload).await.map_err(SnapshotError::Io)?;
    tokio::fs::rename(&tmp, path).await.map_err(SnapshotError::Io)?;

    tracing::debug!(path = %path.display(), jobs = snapshot.jobs.len(), "Snapshot saved");
    Ok(())
}

/// Load a snapshot; `Ok(None)` when no file exists yet.
pub async fn load(path: &Path) -> Result<Option<EngineSnapshot>, SnapshotError> {
    let payload = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SnapshotError::Io(e)),
    };

    let snapshot: EngineSnapshot =
        serde_json::from_slice(&payload).map_err(SnapshotError::Serialize)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Version(snapshot.version));
    }

    Ok(Some(snapshot))
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    Version(u32),
}
