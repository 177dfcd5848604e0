use ctbench_cloud::FleetConfig;
use ctbench_coordinator::RunAuth;
use ctbench_core::RunTask;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Token,
    Open,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Protocol server the workers run against.
    pub server_addr: String,
    pub reveal: u32,
    pub snapshot_path: PathBuf,
    /// Port the collector listens on for worker reports.
    pub port: u16,
    /// Address handed to workers. Discovered from the public IP when omitted.
    pub collector_addr: Option<String>,
    #[serde(default)]
    pub expected_count_check: bool,
    #[serde(default)]
    pub auth: AuthConfig,
    pub fleet: FleetConfig,
    #[serde(default)]
    pub runs: Vec<RunTask>,
}

impl CollectorConfig {
    /// Reads and validates a TOML config. Relative paths inside it are taken
    /// relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.resolve_paths(path.parent().unwrap_or(Path::new("")));
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.snapshot_path.is_relative() {
            self.snapshot_path = base.join(&self.snapshot_path);
        }
        let credential_dir = &mut self.fleet.credential.dir;
        if credential_dir.is_relative() {
            *credential_dir = base.join(&*credential_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };
        if self.runs.is_empty() {
            return invalid("run schedule is empty".to_string());
        }
        for (i, task) in self.runs.iter().enumerate() {
            if task.clients == 0 {
                return invalid(format!("run {i} requests zero clients"));
            }
            if task.max_sit_out >= task.clients {
                return invalid(format!(
                    "run {i} allows {} clients to sit out of {}",
                    task.max_sit_out, task.clients
                ));
            }
        }
        if self.server_addr.trim().is_empty() {
            return invalid("server_addr is empty".to_string());
        }
        if self.fleet.security_group_id.trim().is_empty() {
            return invalid("fleet.security_group_id is empty".to_string());
        }
        if self.fleet.worker_repo.trim().is_empty() {
            return invalid("fleet.worker_repo is empty".to_string());
        }
        if self.fleet.credential.name.trim().is_empty() {
            return invalid("fleet.credential.name is empty".to_string());
        }
        if self.runs.len() > 1 && !self.fleet.credential.create {
            return invalid(format!(
                "{} runs share key pair {} but teardown deletes it after each run, \
                 set fleet.credential.create = true",
                self.runs.len(),
                self.fleet.credential.name
            ));
        }
        if self.auth.mode == AuthMode::Open && self.auth.token.is_some() {
            warn!("auth.token is ignored in open mode");
        }
        Ok(())
    }

    /// The run authentication to enforce. A token from the environment wins
    /// over the configured one; in token mode without either, a fresh token is
    /// generated.
    pub fn run_auth(&self, env_token: Option<String>) -> RunAuth {
        match self.auth.mode {
            AuthMode::Open => RunAuth::Open,
            AuthMode::Token => match env_token.or_else(|| self.auth.token.clone()) {
                Some(token) => RunAuth::Token(token),
                None => {
                    let auth = RunAuth::generate();
                    if let Some(token) = auth.token() {
                        info!("Generated run token: {token}");
                    }
                    auth
                }
            },
        }
    }
}
