//! Keyed run-record store
//!
//! Writes are full-record overwrites; there is no partial-update or
//! compare-and-swap primitive at this boundary.

use crate::error::EvalResult;
use crate::models::{Run, validate_run_id};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, run_id: &str) -> EvalResult<Option<Run>>;

    /// Replace the whole record for `run.run_id`
    async fn put(&self, run: &Run) -> EvalResult<()>;

    /// All records, sorted by run id
    async fn scan(&self) -> EvalResult<Vec<Run>>;
}

/// One pretty-printed JSON file per run under a directory
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    dir: PathBuf,
}

impl FsRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, run_id: &str) -> EvalResult<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    async fn read_record(path: &Path) -> EvalResult<Run> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn get(&self, run_id: &str) -> EvalResult<Option<Run>> {
        let path = self.record_path(run_id)?;
        match tokio::fs::try_exists(&path).await? {
            true => Ok(Some(Self::read_record(&path).await?)),
            false => Ok(None),
        }
    }

    async fn put(&self, run: &Run) -> EvalResult<()> {
        let path = self.record_path(&run.run_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Each write renames its own temp file over the record
        let tmp_path = self.dir.join(format!(
            "{}.{}.tmp",
            run.run_id,
            uuid::Uuid::new_v4().simple()
        ));
        let content = serde_json::to_string_pretty(run)?;
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn scan(&self) -> EvalResult<Vec<Run>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(run) => runs.push(run),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable run record"),
            }
        }

        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }
}
