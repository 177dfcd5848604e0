use ctbench_core::{AuditorReport, ClientReport};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientToServerMessage {
    ReportStatsClient(ClientReport),
    ReportStatsAuditor(AuditorReport),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportStatsReply {
    pub status: bool,
}
