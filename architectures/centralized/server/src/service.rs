use async_trait::async_trait;
use ctbench_centralized_shared::{ClientToServerMessage, ReportStatsReply};
use ctbench_coordinator::{Finalized, RunAuth, RunCoordinator};
use ctbench_network::RequestHandler;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Serves worker reports into a [`RunCoordinator`] and announces every
/// finalized run on `events`.
pub struct CollectorService {
    coordinator: Arc<RunCoordinator>,
    auth: RunAuth,
    events: mpsc::Sender<Finalized>,
}

impl CollectorService {
    pub fn new(
        coordinator: Arc<RunCoordinator>,
        auth: RunAuth,
        events: mpsc::Sender<Finalized>,
    ) -> Self {
        Self {
            coordinator,
            auth,
            events,
        }
    }
}

#[async_trait]
impl RequestHandler<ClientToServerMessage, ReportStatsReply> for CollectorService {
    fn authorize(&self, peer: SocketAddr, run_token: Option<&str>) -> bool {
        let authorized = self.auth.authorize(run_token);
        if !authorized {
            warn!("Rejecting {peer}: bad run token");
        }
        authorized
    }

    async fn handle(&self, peer: SocketAddr, request: ClientToServerMessage) -> ReportStatsReply {
        match request {
            ClientToServerMessage::ReportStatsClient(report) => {
                debug!(client_id = report.client_id, "Client report from {peer}");
                self.coordinator.report_client(report).await;
            }
            ClientToServerMessage::ReportStatsAuditor(report) => {
                debug!("Auditor report from {peer}");
                if let Some(finalized) = self.coordinator.report_auditor(report).await {
                    if self.events.send(finalized).await.is_err() {
                        warn!("Nobody is waiting for finalized runs");
                    }
                }
            }
        }
        ReportStatsReply { status: true }
    }
}
