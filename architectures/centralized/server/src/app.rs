use crate::{CollectorConfig, CollectorService};

use anyhow::{bail, Context, Result};
use ctbench_centralized_shared::{ClientToServerMessage, ReportStatsReply};
use ctbench_cloud::{
    resolve_collector_addr, ComputeProvider, FleetProvisioner, FleetTeardown, ProvisionRequest,
    PUBLIC_IP_ENDPOINT,
};
use ctbench_coordinator::{Finalized, RunArchive, RunAuth, RunCoordinator};
use ctbench_core::RunHistory;
use ctbench_network::TcpServer;
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives the run schedule: provisions each run's fleet, collects its reports
/// and moves on once the run is finalized.
pub struct App {
    config: CollectorConfig,
    auth: RunAuth,
    coordinator: Arc<RunCoordinator>,
    provisioner: FleetProvisioner,
    teardown: FleetTeardown,
    events: mpsc::Receiver<Finalized>,
    server: TcpServer,
    cancel: CancellationToken,
}

impl App {
    /// Starts the report server. Workers can report as soon as this returns.
    pub async fn new(
        config: CollectorConfig,
        provider: Arc<dyn ComputeProvider>,
        auth: RunAuth,
    ) -> Result<Self> {
        config.validate()?;
        let coordinator = Arc::new(
            RunCoordinator::new(
                RunArchive::new(&config.snapshot_path),
                FleetTeardown::new(provider.clone()),
            )
            .with_expected_count_check(config.expected_count_check),
        );

        let (tx, events) = mpsc::channel(10);
        let service = Arc::new(CollectorService::new(
            coordinator.clone(),
            auth.clone(),
            tx,
        ));
        let server = TcpServer::start::<ClientToServerMessage, ReportStatsReply, _>(
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port),
            service,
        )
        .await
        .with_context(|| format!("failed to start report server on port {}", config.port))?;

        Ok(Self {
            provisioner: FleetProvisioner::new(provider.clone(), config.fleet.clone()),
            teardown: FleetTeardown::new(provider),
            config,
            auth,
            coordinator,
            events,
            server,
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        *self.server.local_addr()
    }

    pub fn coordinator(&self) -> Arc<RunCoordinator> {
        self.coordinator.clone()
    }

    /// Cancelling this token stops the schedule and tears down the fleet of
    /// the run in progress.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every scheduled task in order and returns the collected history.
    ///
    /// Fails on the first run that cannot be provisioned.
    pub async fn run(mut self) -> Result<RunHistory> {
        let collector_addr = resolve_collector_addr(
            self.config.collector_addr.as_deref(),
            PUBLIC_IP_ENDPOINT,
            self.local_addr().port(),
        )
        .await
        .context("failed to determine the address workers report to")?;
        info!("Workers will report to {collector_addr}");

        let runs = self.config.runs.clone();
        for (n, task) in runs.iter().enumerate() {
            info!(
                run = n + 1,
                of = runs.len(),
                clients = task.clients,
                max_sit_out = task.max_sit_out,
                "Starting run"
            );
            let fleet = self
                .provisioner
                .provision(&ProvisionRequest {
                    task: *task,
                    server_addr: self.config.server_addr.clone(),
                    collector_addr: collector_addr.clone(),
                    reveal: self.config.reveal,
                    run_token: self.auth.token().map(str::to_string),
                })
                .await
                .with_context(|| format!("failed to provision run {}", n + 1))?;

            let run_index = self.coordinator.begin_run(fleet).await;
            if !self.wait_for_run(run_index).await? {
                break;
            }
        }

        self.server.shutdown();
        let history = self.coordinator.history().await;
        for (n, run) in history.iter().enumerate() {
            info!(
                run = n + 1,
                clients = run.clients.len(),
                finalized = run.is_finalized(),
                upload_bytes = run.total_upload_bytes(),
                download_bytes = run.total_download_bytes(),
                "Run summary"
            );
        }
        info!(
            "Collected {} runs into {}",
            history.len(),
            self.config.snapshot_path.display()
        );
        Ok(history)
    }

    /// Waits until `run_index` is finalized. Returns false if interrupted.
    async fn wait_for_run(&mut self, run_index: usize) -> Result<bool> {
        select! {
            _ = self.cancel.cancelled() => {
                if !self.interrupt().await {
                    info!(run_index, "Run is already finalizing, waiting for its teardown");
                    next_finalized(&mut self.events, run_index).await?;
                }
                Ok(false)
            }
            finalized = next_finalized(&mut self.events, run_index) => {
                finalized?;
                Ok(true)
            }
        }
    }

    /// Tears down the current fleet. Returns false if there was none left to
    /// release, which means a finalization has already taken it.
    async fn interrupt(&self) -> bool {
        let Some(fleet) = self.coordinator.release_fleet().await else {
            return false;
        };
        warn!(
            instance_ids = ?fleet.instance_ids,
            "Interrupted, tearing down the current fleet"
        );
        let report = self.teardown.run(&fleet).await;
        if !report.is_clean() {
            warn!("Teardown incomplete, check the provider console for leftovers");
        }
        true
    }
}

/// Receives events until the one for `run_index`, whose persistence and
/// teardown have finished by the time it is sent.
async fn next_finalized(events: &mut mpsc::Receiver<Finalized>, run_index: usize) -> Result<()> {
    loop {
        match events.recv().await {
            Some(finalized) if finalized.run_index == run_index => {
                log_finalized(&finalized);
                return Ok(());
            }
            Some(finalized) => {
                debug!(run_index = finalized.run_index, "Ignoring late finalization");
            }
            None => bail!("report server stopped"),
        }
    }
}

fn log_finalized(finalized: &Finalized) {
    if let Err(err) = &finalized.persisted {
        warn!(
            run_index = finalized.run_index,
            "Run finalized but not persisted: {err}"
        );
    }
    match &finalized.teardown {
        Some(report) if !report.is_clean() => warn!(
            run_index = finalized.run_index,
            failed_steps = report.failures().count(),
            "Run finalized with an incomplete teardown"
        ),
        _ => info!(run_index = finalized.run_index, "Run complete"),
    }
}
