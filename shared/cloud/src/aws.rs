use crate::{ComputeProvider, LaunchSpec, ProviderError};

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// [`ComputeProvider`] backed by the `aws` command line tool.
pub struct AwsCli {
    program: PathBuf,
    region: String,
}

impl AwsCli {
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_program("aws", region)
    }

    /// Uses a different executable than `aws` from `PATH`.
    pub fn with_program(program: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn aws(&self, args: &[&str]) -> Result<String, ProviderError> {
        // only the service and operation, the rest may carry user data
        let command = format!(
            "{} {}",
            self.program.display(),
            args.iter().take(2).copied().collect::<Vec<_>>().join(" ")
        );
        debug!("Running {command}");

        let output = Command::new(&self.program)
            .args(args)
            .arg("--region")
            .arg(&self.region)
            .output()
            .await
            .map_err(|source| ProviderError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProviderError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ComputeProvider for AwsCli {
    async fn describe_latest_image(
        &self,
        owner: &str,
        name_filter: &str,
    ) -> Result<String, ProviderError> {
        let name_filter = format!("Name=name,Values={name_filter}");
        self.aws(&[
            "ec2",
            "describe-images",
            "--owners",
            owner,
            "--filters",
            &name_filter,
            "Name=state,Values=available",
            "--query",
            "Images | sort_by(@, &CreationDate) | [-1].ImageId",
            "--output",
            "text",
        ])
        .await
    }

    async fn describe_default_subnet(&self) -> Result<String, ProviderError> {
        self.aws(&[
            "ec2",
            "describe-subnets",
            "--filters",
            "Name=default-for-az,Values=true",
            "--query",
            "Subnets[0].SubnetId",
            "--output",
            "text",
        ])
        .await
    }

    async fn create_key_pair(&self, key_name: &str) -> Result<String, ProviderError> {
        self.aws(&[
            "ec2",
            "create-key-pair",
            "--key-name",
            key_name,
            "--query",
            "KeyMaterial",
            "--output",
            "text",
        ])
        .await
    }

    async fn run_instances(&self, spec: &LaunchSpec) -> Result<String, ProviderError> {
        let count = spec.count.to_string();
        self.aws(&[
            "ec2",
            "run-instances",
            "--image-id",
            &spec.image_id,
            "--instance-type",
            &spec.instance_type,
            "--count",
            &count,
            "--key-name",
            &spec.key_name,
            "--security-group-ids",
            &spec.security_group_id,
            "--subnet-id",
            &spec.subnet_id,
            "--user-data",
            &spec.user_data,
            "--output",
            "json",
        ])
        .await
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<String, ProviderError> {
        let mut args = vec!["ec2", "terminate-instances", "--instance-ids"];
        args.extend(instance_ids.iter().map(String::as_str));
        self.aws(&args).await
    }

    async fn delete_key_pair(&self, key_name: &str) -> Result<(), ProviderError> {
        self.aws(&["ec2", "delete-key-pair", "--key-name", key_name])
            .await
            .map(|_| ())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn appends_region_to_every_call() {
        // `echo` prints the argument list back as stdout
        let cli = AwsCli::with_program("echo", "eu-west-2");
        let out = cli.describe_default_subnet().await.unwrap();
        assert_eq!(
            out.trim(),
            "ec2 describe-subnets --filters Name=default-for-az,Values=true \
             --query Subnets[0].SubnetId --output text --region eu-west-2"
        );
    }

    #[tokio::test]
    async fn terminate_passes_every_instance_id() {
        let cli = AwsCli::with_program("echo", "us-east-1");
        let out = cli
            .terminate_instances(&["i-1".to_string(), "i-2".to_string()])
            .await
            .unwrap();
        assert_eq!(
            out.trim(),
            "ec2 terminate-instances --instance-ids i-1 i-2 --region us-east-1"
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let cli = AwsCli::with_program("false", "us-east-1");
        let err = cli.delete_key_pair("k").await.unwrap_err();
        match err {
            ProviderError::Failed { command, code, .. } => {
                assert_eq!(command, "false ec2 delete-key-pair");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let cli = AwsCli::with_program("/nonexistent/aws", "us-east-1");
        assert!(matches!(
            cli.describe_default_subnet().await,
            Err(ProviderError::Spawn { .. })
        ));
    }
}
