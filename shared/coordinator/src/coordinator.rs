use crate::{PersistenceError, RunArchive};

use ctbench_cloud::{FleetDescriptor, FleetTeardown, TeardownReport};
use ctbench_core::{AuditorReport, ClientReport, RunHistory, RunRecord};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct RunState {
    history: RunHistory,
    current: Option<usize>,
    fleet: Option<FleetDescriptor>,
    /// Number of snapshots taken, used to order their writes.
    snapshots: u64,
}

/// Writes snapshots to the archive, dropping any that a newer one already
/// superseded on disk.
struct SnapshotWriter {
    archive: RunArchive,
    written: Option<u64>,
}

impl SnapshotWriter {
    async fn write(&mut self, seq: u64, history: &RunHistory) -> Result<(), PersistenceError> {
        if self.written.is_some_and(|written| written > seq) {
            debug!(seq, "Snapshot already superseded, not writing it");
            return Ok(());
        }
        self.archive.persist(history).await?;
        self.written = Some(seq);
        Ok(())
    }
}

/// What happened when a run's auditor report arrived.
#[derive(Debug)]
pub struct Finalized {
    pub run_index: usize,
    pub persisted: Result<(), PersistenceError>,
    /// `None` when the run's fleet had already been released.
    pub teardown: Option<TeardownReport>,
}

/// Collects the reports of the active run and finalizes it once the auditor
/// reports in.
pub struct RunCoordinator {
    state: Mutex<RunState>,
    archive: Mutex<SnapshotWriter>,
    teardown: FleetTeardown,
    expected_count_check: bool,
}

impl RunCoordinator {
    pub fn new(archive: RunArchive, teardown: FleetTeardown) -> Self {
        Self {
            state: Mutex::new(RunState::default()),
            archive: Mutex::new(SnapshotWriter {
                archive,
                written: None,
            }),
            teardown,
            expected_count_check: false,
        }
    }

    /// Warn when a run finalizes with a client report count other than the
    /// one requested.
    pub fn with_expected_count_check(mut self, enabled: bool) -> Self {
        self.expected_count_check = enabled;
        self
    }

    /// Opens a new run for `fleet` and makes it the target of every report
    /// that follows.
    pub async fn begin_run(&self, fleet: FleetDescriptor) -> usize {
        let mut state = self.state.lock().await;
        let index = state.history.push(RunRecord::new(fleet.task));
        state.current = Some(index);
        if let Some(previous) = state.fleet.replace(fleet) {
            warn!(
                instance_ids = ?previous.instance_ids,
                "Beginning a new run while the previous fleet was never released"
            );
        }
        info!(run_index = index, "Run started");
        index
    }

    /// Appends `report` to the active run. Returns false if no run has begun.
    pub async fn report_client(&self, report: ClientReport) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = current_record(&mut state) else {
            warn!(
                client_id = report.client_id,
                "Dropping client report received before any run began"
            );
            return false;
        };
        record.clients.push(report);
        info!(
            "Received client stats, {} in current run",
            record.clients.len()
        );
        true
    }

    /// Records the auditor's report for the active run, then persists the full
    /// history and tears the run's fleet down.
    ///
    /// Returns `None` if no run has begun.
    pub async fn report_auditor(&self, report: AuditorReport) -> Option<Finalized> {
        let mut state = self.state.lock().await;
        let run_index = state.current?;
        let expected_count_check = self.expected_count_check;
        let record = current_record(&mut state)?;
        if expected_count_check {
            for mismatch in client_count_mismatches(record, &report) {
                warn!(run_index, "{mismatch}");
            }
        }
        if record.auditor.is_some() {
            warn!(run_index, "Replacing an earlier auditor report");
        }
        record.auditor = Some(report);
        info!(run_index, "Received auditor stats, run finalized");

        state.snapshots += 1;
        let seq = state.snapshots;
        let snapshot = state.history.clone();
        let fleet = state.fleet.take();
        drop(state);

        let persisted = self.archive.lock().await.write(seq, &snapshot).await;
        if let Err(err) = &persisted {
            error!("Failed to persist run history: {err}");
        }

        let teardown = match fleet {
            Some(fleet) => Some(self.teardown.run(&fleet).await),
            None => {
                info!(run_index, "Fleet already released, skipping teardown");
                None
            }
        };

        Some(Finalized {
            run_index,
            persisted,
            teardown,
        })
    }

    pub async fn history(&self) -> RunHistory {
        self.state.lock().await.history.clone()
    }

    pub async fn current_run(&self) -> Option<RunRecord> {
        let state = self.state.lock().await;
        state.current.and_then(|i| state.history.get(i)).cloned()
    }

    /// Takes the tracked fleet, if any. Each fleet is handed out once.
    pub async fn release_fleet(&self) -> Option<FleetDescriptor> {
        self.state.lock().await.fleet.take()
    }
}

fn current_record(state: &mut RunState) -> Option<&mut RunRecord> {
    let index = state.current?;
    state.history.get_mut(index)
}

fn client_count_mismatches(record: &RunRecord, auditor: &AuditorReport) -> Vec<String> {
    let received = record.clients.len();
    let mut mismatches = Vec::new();
    if received != record.task.clients as usize {
        mismatches.push(format!(
            "Run requested {} clients but {received} reported",
            record.task.clients
        ));
    }
    if received != auditor.total_clients as usize {
        mismatches.push(format!(
            "Auditor counted {} clients but {received} reported",
            auditor.total_clients
        ));
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctbench_cloud::{
        mock::{MockOp, MockProvider},
        Credential, StepOutcome, TeardownStep,
    };
    use ctbench_core::RunTask;
    use pretty_assertions::assert_eq;
    use std::{path::Path, sync::Arc};
    use test_log::test;

    fn fleet(ids: &[&str], key_dir: &Path) -> FleetDescriptor {
        FleetDescriptor {
            task: RunTask {
                clients: ids.len() as u32,
                max_sit_out: 0,
            },
            instance_ids: ids.iter().map(|s| s.to_string()).collect(),
            credential: Credential::new("ctbench", key_dir.join("ctbench.pem")),
        }
    }

    fn client(id: u32) -> ClientReport {
        ClientReport {
            client_id: id,
            shuffle_secs: 1.5,
            ..Default::default()
        }
    }

    fn auditor(total_clients: u32) -> AuditorReport {
        AuditorReport {
            total_clients,
            total_run_secs: 12.0,
            ..Default::default()
        }
    }

    fn coordinator(dir: &Path, provider: Arc<MockProvider>) -> RunCoordinator {
        RunCoordinator::new(
            RunArchive::new(dir.join("result.json")),
            FleetTeardown::new(provider),
        )
    }

    #[test(tokio::test)]
    async fn finalizes_run_then_persists_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::with_instances(&[]));
        let coordinator = coordinator(dir.path(), provider.clone());

        let index = coordinator
            .begin_run(fleet(&["i-1", "i-2"], dir.path()))
            .await;
        assert!(coordinator.report_client(client(0)).await);
        assert!(coordinator.report_client(client(1)).await);
        let finalized = coordinator.report_auditor(auditor(2)).await.unwrap();

        assert_eq!(finalized.run_index, index);
        assert!(finalized.persisted.is_ok());
        let teardown = finalized.teardown.unwrap();
        assert_eq!(
            teardown.outcome(TeardownStep::TerminateInstances),
            Some(&StepOutcome::Completed)
        );
        assert_eq!(provider.terminated_ids(), vec!["i-1", "i-2"]);

        let saved = RunArchive::new(dir.path().join("result.json"))
            .load()
            .await
            .unwrap();
        assert_eq!(saved, coordinator.history().await);
        let run = saved.get(index).unwrap();
        assert_eq!(run.clients.len(), 2);
        assert!(run.is_finalized());
        assert!(coordinator.release_fleet().await.is_none());
    }

    #[test(tokio::test)]
    async fn reports_before_first_run_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::with_instances(&[]));
        let coordinator = coordinator(dir.path(), provider.clone());

        assert!(!coordinator.report_client(client(0)).await);
        assert!(coordinator.report_auditor(auditor(0)).await.is_none());
        assert!(coordinator.history().await.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_client_reports_are_all_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(coordinator(
            dir.path(),
            Arc::new(MockProvider::with_instances(&[])),
        ));
        coordinator.begin_run(fleet(&["i-1"], dir.path())).await;

        let tasks = (0..64)
            .map(|id| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.report_client(client(id)).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let run = coordinator.current_run().await.unwrap();
        let mut ids = run.clients.iter().map(|c| c.client_id).collect::<Vec<_>>();
        ids.sort_unstable();
        assert_eq!(ids, (0..64).collect::<Vec<_>>());
    }

    #[test(tokio::test)]
    async fn second_auditor_report_overwrites_without_second_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::with_instances(&[]));
        let coordinator = coordinator(dir.path(), provider.clone());
        coordinator.begin_run(fleet(&["i-1"], dir.path())).await;

        let first = coordinator.report_auditor(auditor(1)).await.unwrap();
        let second = coordinator
            .report_auditor(AuditorReport {
                total_run_secs: 99.0,
                ..auditor(1)
            })
            .await
            .unwrap();

        assert!(first.teardown.is_some());
        assert!(second.teardown.is_none());
        assert!(second.persisted.is_ok());
        assert_eq!(provider.terminated_ids(), vec!["i-1"]);
        let saved = RunArchive::new(dir.path().join("result.json"))
            .load()
            .await
            .unwrap();
        assert_eq!(saved.get(0).unwrap().auditor.as_ref().unwrap().total_run_secs, 99.0);
    }

    #[test(tokio::test)]
    async fn snapshot_holds_every_finalized_run() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), Arc::new(MockProvider::with_instances(&[])));

        for run in 0..3u32 {
            coordinator.begin_run(fleet(&["i-1"], dir.path())).await;
            coordinator.report_client(client(run)).await;
            coordinator.report_auditor(auditor(1)).await.unwrap();
        }

        let saved = RunArchive::new(dir.path().join("result.json"))
            .load()
            .await
            .unwrap();
        assert_eq!(saved.len(), 3);
        assert!(saved.iter().all(RunRecord::is_finalized));
        assert_eq!(
            saved.iter().map(|r| r.clients[0].client_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test(tokio::test)]
    async fn failed_persist_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::with_instances(&[]));
        // the snapshot path is an existing directory
        let coordinator = RunCoordinator::new(
            RunArchive::new(dir.path()),
            FleetTeardown::new(provider.clone()),
        );
        coordinator.begin_run(fleet(&["i-7"], dir.path())).await;

        let finalized = coordinator.report_auditor(auditor(0)).await.unwrap();

        assert!(finalized.persisted.is_err());
        assert!(finalized.teardown.is_some());
        assert_eq!(provider.terminated_ids(), vec!["i-7"]);
        assert!(coordinator.history().await.get(0).unwrap().is_finalized());
    }

    #[test(tokio::test)]
    async fn failed_teardown_keeps_finalized_record() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            Arc::new(MockProvider::with_instances(&[]).failing(MockOp::TerminateInstances));
        let coordinator = coordinator(dir.path(), provider);
        coordinator.begin_run(fleet(&["i-1", "i-2"], dir.path())).await;
        coordinator.report_client(client(0)).await;
        coordinator.report_client(client(1)).await;

        let finalized = coordinator.report_auditor(auditor(2)).await.unwrap();

        assert!(!finalized.teardown.unwrap().is_clean());
        assert!(finalized.persisted.is_ok());
        assert!(coordinator.current_run().await.unwrap().is_finalized());
    }

    #[test(tokio::test)]
    async fn client_count_mismatch_still_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), Arc::new(MockProvider::with_instances(&[])))
            .with_expected_count_check(true);
        coordinator.begin_run(fleet(&["i-1", "i-2"], dir.path())).await;
        assert!(coordinator.report_client(client(0)).await);

        let run = coordinator.current_run().await.unwrap();
        assert_eq!(
            client_count_mismatches(&run, &auditor(3)),
            vec![
                "Run requested 2 clients but 1 reported".to_string(),
                "Auditor counted 3 clients but 1 reported".to_string(),
            ]
        );

        let finalized = coordinator.report_auditor(auditor(3)).await.unwrap();

        assert!(finalized.persisted.is_ok());
        let run = coordinator.current_run().await.unwrap();
        assert!(run.is_finalized());
        assert_eq!(run.clients.len(), 1);
        assert_eq!(run.task.clients, 2);
    }

    #[test]
    fn matching_counts_report_no_mismatch() {
        let mut record = RunRecord::new(RunTask {
            clients: 2,
            max_sit_out: 0,
        });
        record.clients = vec![client(0), client(1)];
        assert!(client_count_mismatches(&record, &auditor(2)).is_empty());
    }

    #[test(tokio::test)]
    async fn stale_snapshot_never_overwrites_a_newer_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let mut writer = SnapshotWriter {
            archive: RunArchive::new(&path),
            written: None,
        };
        let mut newer = RunHistory::new();
        newer.push(RunRecord::default());
        newer.push(RunRecord::default());

        writer.write(2, &newer).await.unwrap();
        writer.write(1, &RunHistory::new()).await.unwrap();

        assert_eq!(RunArchive::new(&path).load().await.unwrap(), newer);
        assert_eq!(writer.written, Some(2));
    }
}
