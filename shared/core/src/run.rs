use crate::{AuditorReport, ClientReport};
use serde::{Deserialize, Serialize};

/// The fleet shape requested for one run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunTask {
    pub clients: u32,
    pub max_sit_out: u32,
}

/// Everything collected for a single run.
///
/// Client reports are appended in arrival order until the auditor reports,
/// after which the record is considered finalized.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RunRecord {
    pub task: RunTask,
    pub auditor: Option<AuditorReport>,
    pub clients: Vec<ClientReport>,
}

impl RunRecord {
    pub fn new(task: RunTask) -> Self {
        Self {
            task,
            auditor: None,
            clients: Vec::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.auditor.is_some()
    }

    pub fn total_upload_bytes(&self) -> u64 {
        self.clients.iter().map(|c| c.upload_bytes).sum()
    }

    pub fn total_download_bytes(&self) -> u64 {
        self.clients.iter().map(|c| c.download_bytes).sum()
    }
}

/// Append-only sequence of runs, one per run this collector executed.
///
/// Serialized as a plain array.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct RunHistory(Vec<RunRecord>);

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns its index.
    pub fn push(&mut self, record: RunRecord) -> usize {
        self.0.push(record);
        self.0.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&RunRecord> {
        self.0.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut RunRecord> {
        self.0.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunRecord> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_record_is_open() {
        let record = RunRecord::new(RunTask {
            clients: 3,
            max_sit_out: 1,
        });
        assert!(!record.is_finalized());
        assert!(record.clients.is_empty());
    }

    #[test]
    fn byte_totals_sum_over_clients() {
        let mut record = RunRecord::default();
        for i in 1..=3 {
            record.clients.push(ClientReport {
                client_id: i,
                upload_bytes: 100 * i as u64,
                download_bytes: 10,
                ..Default::default()
            });
        }
        assert_eq!(record.total_upload_bytes(), 600);
        assert_eq!(record.total_download_bytes(), 30);
    }

    #[test]
    fn history_serializes_as_an_array() {
        let mut history = RunHistory::new();
        assert_eq!(history.push(RunRecord::default()), 0);
        assert_eq!(history.push(RunRecord::default()), 1);

        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(2));
        assert_eq!(json[0]["auditor"], serde_json::Value::Null);

        let back: RunHistory = serde_json::from_value(json).unwrap();
        assert_eq!(back, history);
    }
}
