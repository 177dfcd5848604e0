use ctbench_core::RunTask;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where and how worker instances are launched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FleetConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    pub security_group_id: String,
    #[serde(default = "default_image_owner")]
    pub image_owner: String,
    #[serde(default = "default_image_name_filter")]
    pub image_name_filter: String,
    /// Git repository holding the worker program. The worker must report with
    /// the collector's handshake and framing, as `ctbench-centralized-client`
    /// does.
    pub worker_repo: String,
    pub credential: CredentialConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_instance_type() -> String {
    "t2.micro".to_string()
}

fn default_image_owner() -> String {
    "amazon".to_string()
}

fn default_image_name_filter() -> String {
    "amzn2-ami-hvm-*-x86_64-gp2".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialConfig {
    /// Key pair name at the provider.
    pub name: String,
    /// Directory holding the local `<name>.pem` copy.
    #[serde(default)]
    pub dir: PathBuf,
    /// Create the key pair while provisioning instead of using an existing one.
    #[serde(default)]
    pub create: bool,
}

impl CredentialConfig {
    pub fn local_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pem", self.name))
    }
}

/// A provisioning credential and its local copy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub key_name: String,
    pub local_path: PathBuf,
}

impl Credential {
    pub fn new(key_name: impl Into<String>, local_path: impl AsRef<Path>) -> Self {
        Self {
            key_name: key_name.into(),
            local_path: local_path.as_ref().to_path_buf(),
        }
    }
}

/// What the provisioner needs to know about one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    pub task: RunTask,
    /// Address of the protocol server the workers run against.
    pub server_addr: String,
    /// Address workers report their metrics to.
    pub collector_addr: String,
    pub reveal: u32,
    pub run_token: Option<String>,
}

/// A provisioned fleet: the run it serves, the instances launched for it and
/// the credential they were launched with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FleetDescriptor {
    pub task: RunTask,
    pub instance_ids: Vec<String>,
    pub credential: Credential,
}
