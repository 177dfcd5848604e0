use async_trait::async_trait;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed with exit code {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Parameters of one batched instance launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    pub count: u32,
    pub key_name: String,
    pub security_group_id: String,
    pub subnet_id: String,
    /// Base64-encoded boot script.
    pub user_data: String,
}

/// The compute provider's command surface.
///
/// Every call is a single blocking round trip that returns the provider's raw
/// output; interpreting that output is left to the caller.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Id of the newest available image matching `owner` and `name_filter`.
    async fn describe_latest_image(
        &self,
        owner: &str,
        name_filter: &str,
    ) -> Result<String, ProviderError>;

    /// Id of the default subnet of the first availability zone.
    async fn describe_default_subnet(&self) -> Result<String, ProviderError>;

    /// Creates a key pair and returns its private key material.
    async fn create_key_pair(&self, key_name: &str) -> Result<String, ProviderError>;

    /// Launches `spec.count` instances and returns the JSON launch description.
    async fn run_instances(&self, spec: &LaunchSpec) -> Result<String, ProviderError>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<String, ProviderError>;

    async fn delete_key_pair(&self, key_name: &str) -> Result<(), ProviderError>;
}
