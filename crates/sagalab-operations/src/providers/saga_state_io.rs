use std::fs;
use std::path::{Path, PathBuf};

use sagalab_core::SagaId;

use crate::Result;
use crate::error::OperationError;
use crate::traits::SagaStateIO;
use crate::types::SagaSnapshot;

const SNAPSHOT_EXTENSION: &str = "json";

/// Stores one pretty-printed JSON file per saga: `<dir>/<saga-id>.json`.
pub struct FileSystemSagaStateIO {
    dir: PathBuf,
}

impl FileSystemSagaStateIO {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, saga_id: &SagaId) -> PathBuf {
        self.dir.join(format!("{saga_id}.{SNAPSHOT_EXTENSION}"))
    }
}

impl SagaStateIO for FileSystemSagaStateIO {
    fn save(&self, snapshot: &SagaSnapshot) -> Result<()> {
        let path = self.path_for(snapshot.execution.saga_id());
        fs::create_dir_all(&self.dir).map_err(|source| OperationError::SagaStateWrite {
            path: self.dir.clone(),
            source,
        })?;

        let content = serde_json::to_string_pretty(snapshot).map_err(|source| {
            OperationError::SagaStateSerialize {
                path: path.clone(),
                source,
            }
        })?;

        // Write then rename; readers never see a truncated snapshot.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content).map_err(|source| OperationError::SagaStateWrite {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| OperationError::SagaStateWrite {
            path: path.clone(),
            source,
        })?;

        Ok(())
    }

    fn load(&self, saga_id: &SagaId) -> Result<Option<SagaSnapshot>> {
        load_snapshot(&self.path_for(saga_id))
    }

    fn list(&self) -> Result<Vec<SagaSnapshot>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let read_dir = fs::read_dir(&self.dir).map_err(|source| OperationError::SagaStateRead {
            path: self.dir.clone(),
            source,
        })?;

        let mut snapshots = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| OperationError::SagaStateRead {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            if let Some(snapshot) = load_snapshot(&path)? {
                snapshots.push(snapshot);
            }
        }

        snapshots.sort_by_key(|s| s.execution.created_at());
        Ok(snapshots)
    }
}

fn load_snapshot(path: &Path) -> Result<Option<SagaSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|source| OperationError::SagaStateRead {
        path: path.to_path_buf(),
        source,
    })?;

    let snapshot =
        serde_json::from_str(&content).map_err(|source| OperationError::SagaStateParse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Some(snapshot))
}
