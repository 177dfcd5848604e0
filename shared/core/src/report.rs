use serde::{Deserialize, Serialize};

/// One worker's measurements for a single run.
///
/// All phase durations are wall-clock seconds.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClientReport {
    pub client_id: u32,
    pub initial_reporting_secs: f64,
    pub secret_share_secs: f64,
    pub shuffle_secs: f64,
    pub reveal_secs: f64,
    pub fault_tolerance_secs: f64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    /// Opaque result payload produced by the worker.
    pub entry: Vec<u8>,
}

impl ClientReport {
    pub fn total_phase_secs(&self) -> f64 {
        self.initial_reporting_secs
            + self.secret_share_secs
            + self.shuffle_secs
            + self.reveal_secs
            + self.fault_tolerance_secs
    }
}

/// CPU time the auditor attributes to one client, per phase, in seconds.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClientCpuReport {
    pub client_id: u32,
    pub initial_reporting_secs: f64,
    pub secret_share_secs: f64,
    pub shuffle_secs: f64,
    pub reveal_secs: f64,
    pub fault_tolerance_secs: f64,
}

/// The aggregate view of a run, sent once by the auditor.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AuditorReport {
    pub total_clients: u32,
    pub max_sit_out: u32,
    /// Computed output entries, grouped per round.
    pub calculated_entries: Vec<Vec<Vec<u8>>>,
    pub total_run_secs: f64,
    pub per_client_cpu: Vec<ClientCpuReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client(id: u32) -> ClientReport {
        ClientReport {
            client_id: id,
            initial_reporting_secs: 0.5,
            secret_share_secs: 1.25,
            shuffle_secs: 2.0,
            reveal_secs: 0.75,
            fault_tolerance_secs: 0.5,
            upload_bytes: 4096,
            download_bytes: 8192,
            entry: vec![id as u8; 4],
        }
    }

    #[test]
    fn total_phase_secs_sums_every_phase() {
        assert_eq!(client(1).total_phase_secs(), 5.0);
    }

    #[test]
    fn durations_are_encoded_as_json_numbers() {
        let json = serde_json::to_value(client(7)).unwrap();
        assert_eq!(json["client_id"], 7);
        assert_eq!(json["secret_share_secs"], 1.25);
        assert_eq!(json["upload_bytes"], 4096);
    }

    #[test]
    fn auditor_report_survives_the_wire_encoding() {
        let report = AuditorReport {
            total_clients: 3,
            max_sit_out: 1,
            calculated_entries: vec![vec![vec![1, 2], vec![3]], vec![]],
            total_run_secs: 42.5,
            per_client_cpu: vec![ClientCpuReport {
                client_id: 1,
                shuffle_secs: 0.25,
                ..Default::default()
            }],
        };
        let bytes = postcard::to_stdvec(&report).unwrap();
        let decoded: AuditorReport = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn auditor_report_without_run_totals_is_rejected() {
        // older workers omitted the total runtime and per-client breakdown
        let json = r#"{"total_clients":3,"max_sit_out":1,"calculated_entries":[]}"#;
        assert!(serde_json::from_str::<AuditorReport>(json).is_err());
    }
}
