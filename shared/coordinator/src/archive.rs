use ctbench_core::RunHistory;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to serialize run history: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write snapshot {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read snapshot {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The on-disk snapshot of every run collected so far.
///
/// Each persist rewrites the whole file, so the snapshot always holds the full
/// history as of the latest finalized run.
#[derive(Debug, Clone)]
pub struct RunArchive {
    path: PathBuf,
}

impl RunArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn persist(&self, history: &RunHistory) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(history)?;
        let write_error = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(&self.path, json).await.map_err(write_error)?;
        info!("Wrote {} runs to {}", history.len(), self.path.display());
        Ok(())
    }

    pub async fn load(&self) -> Result<RunHistory, PersistenceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| PersistenceError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctbench_core::{AuditorReport, ClientReport, RunRecord, RunTask};
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn history(runs: u32) -> RunHistory {
        let mut history = RunHistory::new();
        for n in 1..=runs {
            let mut record = RunRecord::new(RunTask {
                clients: n,
                max_sit_out: 0,
            });
            record.clients.push(ClientReport {
                client_id: n,
                shuffle_secs: 0.25 * n as f64,
                upload_bytes: 1024,
                entry: vec![1, 2, 3],
                ..Default::default()
            });
            record.auditor = Some(AuditorReport {
                total_clients: n,
                total_run_secs: 3.5,
                ..Default::default()
            });
            history.push(record);
        }
        history
    }

    #[test(tokio::test)]
    async fn snapshot_round_trips_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RunArchive::new(dir.path().join("nested/result.json"));

        archive.persist(&history(2)).await.unwrap();

        assert_eq!(archive.load().await.unwrap(), history(2));
    }

    #[test(tokio::test)]
    async fn persist_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RunArchive::new(dir.path().join("result.json"));

        archive.persist(&history(3)).await.unwrap();
        archive.persist(&history(1)).await.unwrap();

        assert_eq!(archive.load().await.unwrap().len(), 1);
    }

    #[test(tokio::test)]
    async fn unwritable_location_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // the target path is an existing directory
        let archive = RunArchive::new(dir.path());

        assert!(matches!(
            archive.persist(&history(1)).await,
            Err(PersistenceError::Write { .. })
        ));
    }
}
