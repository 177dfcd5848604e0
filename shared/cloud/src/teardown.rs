use crate::{ComputeProvider, FleetDescriptor};

use std::{fmt, io, sync::Arc};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    TerminateInstances,
    DeleteCredential,
    RemoveLocalCredential,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::TerminateInstances => "terminate instances",
            TeardownStep::DeleteCredential => "delete key pair",
            TeardownStep::RemoveLocalCredential => "remove local key",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Skipped(String),
    Failed(String),
}

/// Outcome of every teardown step, in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<(TeardownStep, StepOutcome)>,
}

impl TeardownReport {
    pub fn outcome(&self, step: TeardownStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    /// True when no step failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = (TeardownStep, &str)> {
        self.steps.iter().filter_map(|(step, outcome)| match outcome {
            StepOutcome::Failed(reason) => Some((*step, reason.as_str())),
            _ => None,
        })
    }

    fn record(&mut self, step: TeardownStep, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Completed => info!("Teardown step {step}: done"),
            StepOutcome::Skipped(reason) => warn!("Teardown step {step}: skipped, {reason}"),
            StepOutcome::Failed(reason) => error!("Teardown step {step}: failed, {reason}"),
        }
        self.steps.push((step, outcome));
    }
}

/// Releases everything a [`FleetDescriptor`] holds.
///
/// Every step is attempted even when an earlier one fails, so a single
/// teardown releases as much as it can.
pub struct FleetTeardown {
    provider: Arc<dyn ComputeProvider>,
}

impl FleetTeardown {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self { provider }
    }

    pub async fn run(&self, fleet: &FleetDescriptor) -> TeardownReport {
        let mut report = TeardownReport::default();

        let terminate = if fleet.instance_ids.is_empty() {
            StepOutcome::Skipped("no instances to terminate".to_string())
        } else {
            info!(instance_ids = ?fleet.instance_ids, "Terminating instances");
            match self.provider.terminate_instances(&fleet.instance_ids).await {
                Ok(_) => StepOutcome::Completed,
                Err(err) => StepOutcome::Failed(err.to_string()),
            }
        };
        report.record(TeardownStep::TerminateInstances, terminate);

        let delete = match self
            .provider
            .delete_key_pair(&fleet.credential.key_name)
            .await
        {
            Ok(()) => StepOutcome::Completed,
            Err(err) => StepOutcome::Failed(err.to_string()),
        };
        report.record(TeardownStep::DeleteCredential, delete);

        let path = &fleet.credential.local_path;
        let remove = match tokio::fs::remove_file(path).await {
            Ok(()) => StepOutcome::Completed,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                StepOutcome::Skipped(format!("{} does not exist", path.display()))
            }
            Err(err) => StepOutcome::Failed(format!("{}: {err}", path.display())),
        };
        report.record(TeardownStep::RemoveLocalCredential, remove);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock::{MockOp, MockProvider, ProviderCall},
        Credential,
    };
    use ctbench_core::RunTask;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use test_log::test;

    fn fleet(ids: &[&str], key_path: &Path) -> FleetDescriptor {
        FleetDescriptor {
            task: RunTask {
                clients: ids.len() as u32,
                max_sit_out: 0,
            },
            instance_ids: ids.iter().map(|s| s.to_string()).collect(),
            credential: Credential::new("ctbench", key_path),
        }
    }

    #[test(tokio::test)]
    async fn releases_instances_and_credential() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("ctbench.pem");
        std::fs::write(&key, "key").unwrap();
        let provider = Arc::new(MockProvider::with_instances(&[]));

        let report = FleetTeardown::new(provider.clone())
            .run(&fleet(&["i-1", "i-2"], &key))
            .await;

        assert!(report.is_clean());
        assert_eq!(
            report.outcome(TeardownStep::RemoveLocalCredential),
            Some(&StepOutcome::Completed)
        );
        assert!(!key.exists());
        assert_eq!(provider.terminated_ids(), vec!["i-1", "i-2"]);
        assert!(provider
            .calls()
            .contains(&ProviderCall::DeleteKeyPair("ctbench".to_string())));
    }

    #[test(tokio::test)]
    async fn failed_termination_still_attempts_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("ctbench.pem");
        std::fs::write(&key, "key").unwrap();
        let provider =
            Arc::new(MockProvider::with_instances(&[]).failing(MockOp::TerminateInstances));

        let report = FleetTeardown::new(provider.clone())
            .run(&fleet(&["i-1"], &key))
            .await;

        assert!(!report.is_clean());
        assert!(matches!(
            report.outcome(TeardownStep::TerminateInstances),
            Some(StepOutcome::Failed(_))
        ));
        assert_eq!(
            report.outcome(TeardownStep::DeleteCredential),
            Some(&StepOutcome::Completed)
        );
        assert_eq!(
            report.outcome(TeardownStep::RemoveLocalCredential),
            Some(&StepOutcome::Completed)
        );
        assert_eq!(
            report.failures().map(|(step, _)| step).collect::<Vec<_>>(),
            vec![TeardownStep::TerminateInstances]
        );
    }

    #[test(tokio::test)]
    async fn empty_fleet_and_missing_key_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::with_instances(&[]));

        let report = FleetTeardown::new(provider.clone())
            .run(&fleet(&[], &dir.path().join("absent.pem")))
            .await;

        assert!(report.is_clean());
        assert!(matches!(
            report.outcome(TeardownStep::TerminateInstances),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(matches!(
            report.outcome(TeardownStep::RemoveLocalCredential),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(provider.terminated_ids().is_empty());
    }
}
