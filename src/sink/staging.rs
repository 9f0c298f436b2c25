//! Staged, atomic artifact publication.
//!
//! Finished Parquet files land under `_staging/<run-id>/` first; nothing is
//! visible at a final partition path until the whole run has succeeded, at
//! which point every staged file is renamed into place and the run summary
//! is written alongside the artifact. A crashed run leaves only the
//! underscore-prefixed staging directory, which columnar readers ignore.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StorePath;
use object_store::PutPayload;
use snafu::ResultExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{
    CreateDirSnafu, ExportError, OpenOutputSnafu, PublishSnafu, StagingWriteSnafu,
    SummarySerializeSnafu,
};
use crate::report::RunReport;

use super::parquet::FinishedFile;

/// Name of the run summary published next to the artifact.
pub const SUMMARY_FILE: &str = "_SUMMARY.json";

/// Writes finished files to a staging area and publishes them atomically.
pub struct StagingWriter {
    store: Arc<dyn ObjectStore>,
    root: PathBuf,
    run_id: String,
    staged: Vec<FinishedFile>,
}

impl StagingWriter {
    /// Open (creating if needed) the output location.
    pub fn new(dir: &str) -> Result<Self, ExportError> {
        std::fs::create_dir_all(dir).context(CreateDirSnafu { dir })?;
        let store = LocalFileSystem::new_with_prefix(dir).context(OpenOutputSnafu { dir })?;

        Ok(Self {
            store: Arc::new(store),
            root: PathBuf::from(dir),
            run_id: Uuid::new_v4().to_string(),
            staged: Vec::new(),
        })
    }

    fn staging_path(&self, filename: &str) -> StorePath {
        StorePath::from(format!("_staging/{}/{}", self.run_id, filename))
    }

    /// Write one finished file into the staging area.
    pub async fn stage(&mut self, file: FinishedFile) -> Result<(), ExportError> {
        let path = self.staging_path(&file.filename);
        self.store
            .put(&path, PutPayload::from(file.bytes.clone()))
            .await
            .context(StagingWriteSnafu {
                path: file.filename.clone(),
            })?;

        debug!(
            "Staged {} ({} bytes, {} records)",
            file.filename, file.size, file.record_count
        );
        self.staged.push(file);
        Ok(())
    }

    /// Publish every staged file to its final partition path and write the
    /// run summary. Consumes the writer; the staging directory is removed.
    pub async fn publish(self, report: &RunReport) -> Result<u64, ExportError> {
        for file in &self.staged {
            // Rename does not create partition directories.
            if let Some(parent) = Path::new(&file.filename).parent() {
                let dir = self.root.join(parent);
                std::fs::create_dir_all(&dir).context(CreateDirSnafu {
                    dir: dir.display().to_string(),
                })?;
            }

            let from = self.staging_path(&file.filename);
            let to = StorePath::from(file.filename.as_str());
            self.store.rename(&from, &to).await.context(PublishSnafu {
                path: file.filename.clone(),
            })?;
        }

        let summary = serde_json::to_vec_pretty(report).context(SummarySerializeSnafu)?;
        self.store
            .put(&StorePath::from(SUMMARY_FILE), PutPayload::from(summary))
            .await
            .context(PublishSnafu { path: SUMMARY_FILE })?;

        // Best-effort cleanup of the per-run staging directory.
        let staging_dir = self.root.join("_staging").join(&self.run_id);
        let _ = std::fs::remove_dir_all(staging_dir);

        let published = self.staged.len() as u64;
        info!(files = published, "Published artifact");
        Ok(published)
    }

    /// Number of files staged so far.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
}
