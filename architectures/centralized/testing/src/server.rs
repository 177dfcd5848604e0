use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use ctbench_centralized_client::ReportClient;
use ctbench_centralized_server::{App, CollectorConfig};
use ctbench_cloud::mock::MockProvider;
use ctbench_coordinator::{RunArchive, RunAuth, RunCoordinator};
use ctbench_core::{RunHistory, RunTask};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    test_utils::{assert_with_retries, collector_config_for_testing},
    RUN_TOKEN,
};

/// A collector running its schedule against a [`MockProvider`].
pub struct CollectorServerHandle {
    pub provider: Arc<MockProvider>,
    pub config: CollectorConfig,
    addr: SocketAddr,
    coordinator: Arc<RunCoordinator>,
    cancel: CancellationToken,
    app: JoinHandle<Result<RunHistory>>,
    _dir: TempDir,
}

impl CollectorServerHandle {
    /// Single run of `instance_ids.len()` clients in token mode.
    pub async fn new(instance_ids: &[&str]) -> Self {
        let task = RunTask {
            clients: instance_ids.len() as u32,
            max_sit_out: 1,
        };
        Self::new_custom(
            MockProvider::with_instances(instance_ids),
            vec![task],
            RunAuth::Token(RUN_TOKEN.to_string()),
        )
        .await
    }

    pub async fn new_custom(provider: MockProvider, runs: Vec<RunTask>, auth: RunAuth) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = collector_config_for_testing(dir.path(), runs);
        let provider = Arc::new(provider);

        let app = App::new(config.clone(), provider.clone(), auth)
            .await
            .unwrap();
        let addr = app.local_addr();
        let coordinator = app.coordinator();
        let cancel = app.cancel_token();
        let app = tokio::spawn(app.run());

        Self {
            provider,
            config,
            addr,
            coordinator,
            cancel,
            app,
            _dir: dir,
        }
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    /// Connects a report client presenting the run token.
    pub async fn client(&self) -> ReportClient {
        self.client_with_token(Some(RUN_TOKEN.to_string()))
            .await
            .unwrap()
    }

    pub async fn client_with_token(&self, run_token: Option<String>) -> Result<ReportClient> {
        ReportClient::connect(&self.addr(), run_token).await
    }

    /// Waits until `runs` runs have been started.
    pub async fn wait_for_runs(&self, runs: usize) {
        let coordinator = self.coordinator.clone();
        assert_with_retries(
            || {
                let coordinator = coordinator.clone();
                async move { coordinator.history().await.len() }
            },
            runs,
        )
        .await;
    }

    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// Waits for the schedule to end and returns what the collector returned.
    pub async fn finish(&mut self) -> Result<RunHistory> {
        (&mut self.app).await?
    }

    /// The snapshot as currently written to disk.
    pub async fn load_snapshot(&self) -> RunHistory {
        RunArchive::new(&self.config.snapshot_path)
            .load()
            .await
            .unwrap()
    }
}
