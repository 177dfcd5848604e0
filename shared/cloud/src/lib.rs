mod aws;
mod boot_script;
mod discovery;
mod fleet;
pub mod mock;
mod provider;
mod provision;
mod teardown;

pub use aws::AwsCli;
pub use boot_script::BootScript;
pub use discovery::{discover_public_ip, parse_public_ip, DiscoveryError, PUBLIC_IP_ENDPOINT};
pub use fleet::{Credential, CredentialConfig, FleetConfig, FleetDescriptor, ProvisionRequest};
pub use provider::{ComputeProvider, LaunchSpec, ProviderError};
pub use provision::{
    parse_instance_ids, resolve_collector_addr, FleetProvisioner, ProvisioningError,
};
pub use teardown::{FleetTeardown, StepOutcome, TeardownReport, TeardownStep};
