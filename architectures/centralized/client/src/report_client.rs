use anyhow::Result;
use ctbench_centralized_shared::{ClientToServerMessage, ReportStatsReply};
use ctbench_core::{AuditorReport, ClientReport};
use ctbench_network::TcpClient;
use tracing::info;

/// A worker's connection to the collector.
pub struct ReportClient {
    tcp: TcpClient<ClientToServerMessage, ReportStatsReply>,
}

impl ReportClient {
    /// Connects to the collector at `addr`, presenting `run_token` in the
    /// handshake.
    pub async fn connect(addr: &str, run_token: Option<String>) -> Result<Self> {
        Ok(Self {
            tcp: TcpClient::connect(addr, run_token).await?,
        })
    }

    /// Returns the collector's acknowledgement status.
    pub async fn report_client(&mut self, report: ClientReport) -> Result<bool> {
        let client_id = report.client_id;
        let reply = self
            .request(ClientToServerMessage::ReportStatsClient(report))
            .await?;
        info!(client_id, status = reply.status, "Client stats reported");
        Ok(reply.status)
    }

    /// Returns the collector's acknowledgement status.
    pub async fn report_auditor(&mut self, report: AuditorReport) -> Result<bool> {
        let reply = self
            .request(ClientToServerMessage::ReportStatsAuditor(report))
            .await?;
        info!(status = reply.status, "Auditor stats reported");
        Ok(reply.status)
    }

    async fn request(&mut self, message: ClientToServerMessage) -> Result<ReportStatsReply> {
        self.tcp.request(message).await
    }
}
