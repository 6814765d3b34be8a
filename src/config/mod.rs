//! # Clusterpost Configuration
//!
//! Static configuration of the orchestrator: where job working directories
//! live, how to reach the document store, the scheduler cadences, and the
//! named execution servers jobs can target.
//!
//! ```yaml
//! storage_dir: /scratch/clusterpost
//! store:
//!   kind: couch
//!   url: http://localhost:5984
//!   database: clusterjobs
//! scheduler:
//!   tick_interval_seconds: 60
//!   worker_id: 1
//! auth:
//!   token_secret: ${CLUSTERPOST_TOKEN_SECRET}
//! execution_servers:
//!   killdevil:
//!     engine: lsf
//!     remote: true
//!     hostname: killdevil.example.edu
//!     user: jprieto
//!     identity_file: /home/jprieto/.ssh/id_rsa
//!     source_dir: /nas/clusterpost
//! production:
//!   scheduler:
//!     worker_id: 2
//! ```
//!
//! Top-level `development`, `test` and `production` sections are merged over
//! the base document for the active environment (see [`ConfigManager`]).

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{cadence, DEFAULT_HASH_BANG, DEFAULT_REMOTE_COMMAND};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `clusterpost.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterpostConfig {
    /// Root directory holding one working directory per job.
    pub storage_dir: PathBuf,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Name of the execution server this process runs as, when it is the
    /// peer side of a remote dispatch.
    #[serde(default)]
    pub execution_server: Option<String>,

    /// Program invoked over SSH on a peer execution server.
    #[serde(default = "default_remote_command")]
    pub remote_command: String,

    pub execution_servers: BTreeMap<String, ExecutionServerConfig>,
}

/// Backend kind an execution server drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Lsf,
    Pbs,
    Slurm,
    Unix,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lsf => write!(f, "lsf"),
            Self::Pbs => write!(f, "pbs"),
            Self::Slurm => write!(f, "slurm"),
            Self::Unix => write!(f, "unix"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lsf" => Ok(Self::Lsf),
            "pbs" => Ok(Self::Pbs),
            "slurm" => Ok(Self::Slurm),
            "unix" => Ok(Self::Unix),
            other => Err(ConfigurationError::InvalidEngine(other.to_string())),
        }
    }
}

/// A named backend + host pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionServerConfig {
    pub engine: EngineKind,

    /// When true, lifecycle operations are dispatched over SSH to a peer
    /// instance running on `hostname`.
    #[serde(default)]
    pub remote: bool,

    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Installation directory on the host; the execution server token is
    /// copied here.
    #[serde(default)]
    pub source_dir: Option<String>,

    /// Overrides the global `storage_dir` for jobs on this server.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Unix engine only: detach the child process instead of waiting for it.
    #[serde(default = "default_true")]
    pub detached: bool,

    /// Script header for PBS and SLURM submissions.
    #[serde(default)]
    pub hash_bang: Option<String>,

    /// SSH tunnel options, flag to value, e.g. `-L: "5984:localhost:5984"`.
    #[serde(default)]
    pub tunnel: BTreeMap<String, String>,

    #[serde(default)]
    pub info: Option<String>,

    #[serde(default)]
    pub queues: Vec<String>,
}

impl ExecutionServerConfig {
    /// A server of the given kind with every optional field unset.
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            remote: false,
            hostname: None,
            user: None,
            identity_file: None,
            source_dir: None,
            storage_dir: None,
            detached: true,
            hash_bang: None,
            tunnel: BTreeMap::new(),
            info: None,
            queues: Vec::new(),
        }
    }

    /// `user@hostname`, when both are configured.
    pub fn ssh_destination(&self) -> Option<String> {
        match (&self.user, &self.hostname) {
            (Some(user), Some(host)) => Some(format!("{user}@{host}")),
            _ => None,
        }
    }

    /// Everything needed to run `ssh`/`scp` against this server.
    pub fn has_ssh_coordinates(&self) -> bool {
        self.ssh_destination().is_some() && self.identity_file.is_some()
    }

    pub fn has_tunnel(&self) -> bool {
        !self.tunnel.is_empty()
    }

    pub fn hash_bang(&self) -> &str {
        self.hash_bang.as_deref().unwrap_or(DEFAULT_HASH_BANG)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Couch,
    Memory,
}

/// Document store connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Couch,
            url: "http://localhost:5984".to_string(),
            database: "clusterjobs".to_string(),
            username: None,
            password: None,
            timeout_seconds: 30,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Periodic task cadences.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_seconds: u64,
    pub recovery_interval_seconds: u64,
    pub tunnel_check_interval_seconds: u64,
    /// Shard id of this orchestrator process, starting at 1.
    pub worker_id: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: cadence::DEFAULT_TICK_INTERVAL_SECONDS,
            recovery_interval_seconds: cadence::DEFAULT_RECOVERY_INTERVAL_SECONDS,
            tunnel_check_interval_seconds: cadence::DEFAULT_TUNNEL_CHECK_INTERVAL_SECONDS,
            worker_id: 1,
        }
    }
}

impl SchedulerConfig {
    /// Drain tick period, staggered by worker id so shards do not stampede
    /// the shared document store.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds * self.worker_id.max(1))
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_seconds * self.worker_id.max(1))
    }

    pub fn tunnel_check_interval(&self) -> Duration {
        Duration::from_secs(self.tunnel_check_interval_seconds)
    }
}

/// Execution server token signing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_expiry_hours: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            token_expiry_hours: cadence::DEFAULT_TOKEN_EXPIRY_HOURS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_remote_command() -> String {
    DEFAULT_REMOTE_COMMAND.to_string()
}

impl ClusterpostConfig {
    /// Minimal configuration with a single local unix server, used by tests
    /// and by `ConfigManager` consumers that build configuration in code.
    pub fn local(storage_dir: impl Into<PathBuf>) -> Self {
        let mut execution_servers = BTreeMap::new();
        execution_servers.insert(
            "local".to_string(),
            ExecutionServerConfig::new(EngineKind::Unix),
        );
        Self {
            storage_dir: storage_dir.into(),
            store: StoreConfig {
                kind: StoreKind::Memory,
                ..StoreConfig::default()
            },
            scheduler: SchedulerConfig::default(),
            auth: AuthConfig::default(),
            execution_server: None,
            remote_command: default_remote_command(),
            execution_servers,
        }
    }

    pub fn execution_server(&self, name: &str) -> Option<&ExecutionServerConfig> {
        self.execution_servers.get(name)
    }

    /// Working directory root for jobs on the named server.
    pub fn storage_dir_for(&self, server: &str) -> PathBuf {
        self.execution_servers
            .get(server)
            .and_then(|es| es.storage_dir.clone())
            .unwrap_or_else(|| self.storage_dir.clone())
    }

    /// Validate the loaded configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.execution_servers.is_empty() {
            return Err(ConfigurationError::missing_field("execution_servers"));
        }
        if self.scheduler.tick_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.tick_interval_seconds",
                "0",
                "must be greater than zero",
            ));
        }
        if self.scheduler.worker_id == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.worker_id",
                "0",
                "worker ids start at 1",
            ));
        }
        if let Some(name) = &self.execution_server {
            if !self.execution_servers.contains_key(name) {
                return Err(ConfigurationError::invalid_value(
                    "execution_server",
                    name.clone(),
                    "not listed in execution_servers",
                ));
            }
        }

        for (name, server) in &self.execution_servers {
            if !server.remote {
                continue;
            }
            let required = [
                ("hostname", server.hostname.is_none()),
                ("user", server.user.is_none()),
                ("identity_file", server.identity_file.is_none()),
                ("source_dir", server.source_dir.is_none()),
            ];
            if let Some((field, _)) = required.iter().find(|(_, missing)| *missing) {
                return Err(ConfigurationError::missing_field(format!(
                    "execution_servers.{name}.{field}"
                )));
            }
        }

        Ok(())
    }
}
