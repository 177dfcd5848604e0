use crate::{
    discover_public_ip, BootScript, ComputeProvider, Credential, DiscoveryError, FleetConfig,
    FleetDescriptor, LaunchSpec, ProviderError, ProvisionRequest,
};

use serde::Deserialize;
use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("fleet must request at least one worker")]
    EmptyFleet,

    #[error("machine image lookup failed: {0}")]
    ImageLookup(#[source] ProviderError),

    #[error("machine image lookup returned no image")]
    NoImage,

    #[error("subnet lookup failed: {0}")]
    SubnetLookup(#[source] ProviderError),

    #[error("subnet lookup returned no default subnet")]
    NoSubnet,

    #[error("failed to create key pair {name}: {source}")]
    CreateCredential {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error("failed to write key material to {path:?}: {source}")]
    WriteCredential {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("instance launch failed: {0}")]
    Launch(#[source] ProviderError),

    #[error("could not parse launch output: {0}")]
    ParseLaunchOutput(#[source] serde_json::Error),

    #[error("launch output listed no instances")]
    NoInstances,

    #[error("failed to discover collector address: {0}")]
    AddressDiscovery(#[from] DiscoveryError),
}

#[derive(Deserialize)]
struct RunInstancesOutput {
    #[serde(rename = "Instances")]
    instances: Vec<LaunchedInstance>,
}

#[derive(Deserialize)]
struct LaunchedInstance {
    #[serde(rename = "InstanceId")]
    instance_id: String,
}

/// Recovers instance ids from the provider's JSON launch description.
pub fn parse_instance_ids(launch_output: &str) -> Result<Vec<String>, ProvisioningError> {
    let output: RunInstancesOutput =
        serde_json::from_str(launch_output).map_err(ProvisioningError::ParseLaunchOutput)?;
    if output.instances.is_empty() {
        return Err(ProvisioningError::NoInstances);
    }
    Ok(output
        .instances
        .into_iter()
        .map(|i| i.instance_id)
        .collect())
}

/// Text output of a lookup, or `None` when the provider found nothing.
fn lookup_result(output: String) -> Option<String> {
    let trimmed = output.trim();
    // the text output format prints a null query result as "None"
    if trimmed.is_empty() || trimmed == "None" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub struct FleetProvisioner {
    provider: Arc<dyn ComputeProvider>,
    config: FleetConfig,
}

impl FleetProvisioner {
    pub fn new(provider: Arc<dyn ComputeProvider>, config: FleetConfig) -> Self {
        Self { provider, config }
    }

    /// Launches one batch of workers for `request`.
    ///
    /// Nothing is returned unless the launch succeeded and its instance ids
    /// could be read back.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<FleetDescriptor, ProvisioningError> {
        if request.task.clients == 0 {
            return Err(ProvisioningError::EmptyFleet);
        }

        let image_id = self
            .provider
            .describe_latest_image(&self.config.image_owner, &self.config.image_name_filter)
            .await
            .map_err(ProvisioningError::ImageLookup)
            .map(lookup_result)?
            .ok_or(ProvisioningError::NoImage)?;
        info!("Using image ID: {image_id}");

        let subnet_id = self
            .provider
            .describe_default_subnet()
            .await
            .map_err(ProvisioningError::SubnetLookup)
            .map(lookup_result)?
            .ok_or(ProvisioningError::NoSubnet)?;
        info!("Using default subnet ID: {subnet_id}");

        let credential = self.prepare_credential().await?;

        let user_data = BootScript {
            worker_repo: &self.config.worker_repo,
            server_addr: &request.server_addr,
            reveal: request.reveal,
            collector_addr: &request.collector_addr,
            run_token: request.run_token.as_deref(),
        }
        .encode();

        info!(
            count = request.task.clients,
            instance_type = self.config.instance_type,
            "Launching instances..."
        );
        let launch_output = self
            .provider
            .run_instances(&LaunchSpec {
                image_id,
                instance_type: self.config.instance_type.clone(),
                count: request.task.clients,
                key_name: credential.key_name.clone(),
                security_group_id: self.config.security_group_id.clone(),
                subnet_id,
                user_data,
            })
            .await
            .map_err(ProvisioningError::Launch)?;

        let instance_ids = parse_instance_ids(&launch_output)?;
        if instance_ids.len() != request.task.clients as usize {
            warn!(
                "Requested {} instances but the provider launched {}",
                request.task.clients,
                instance_ids.len()
            );
        }
        info!(?instance_ids, "Client instances launched");

        Ok(FleetDescriptor {
            task: request.task,
            instance_ids,
            credential,
        })
    }

    async fn prepare_credential(&self) -> Result<Credential, ProvisioningError> {
        let config = &self.config.credential;
        let credential = Credential::new(&config.name, config.local_path());
        if !config.create {
            return Ok(credential);
        }

        info!("Creating key pair {}", config.name);
        let key_material = self
            .provider
            .create_key_pair(&config.name)
            .await
            .map_err(|source| ProvisioningError::CreateCredential {
                name: config.name.clone(),
                source,
            })?;
        write_key_material(&credential.local_path, &key_material)
            .await
            .map_err(|source| ProvisioningError::WriteCredential {
                path: credential.local_path.clone(),
                source,
            })?;
        Ok(credential)
    }
}

/// The address workers report back to: `configured` when given, otherwise
/// this host's public address (looked up at `endpoint`) with `port`.
pub async fn resolve_collector_addr(
    configured: Option<&str>,
    endpoint: &str,
    port: u16,
) -> Result<String, ProvisioningError> {
    if let Some(addr) = configured {
        return Ok(addr.to_string());
    }
    let ip = discover_public_ip(endpoint).await?;
    Ok(SocketAddr::new(ip, port).to_string())
}

async fn write_key_material(path: &Path, key_material: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, key_material.trim_end().to_string() + "\n").await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400)).await?;
    }
    Ok(())
}
