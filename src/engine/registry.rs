//! Execution servers resolved from configuration: each named server paired
//! with its engine and working directory root.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{CommandRunner, Engine};
use crate::config::{ClusterpostConfig, ExecutionServerConfig};
use crate::error::{ClusterpostError, Result};

#[derive(Debug, Clone)]
pub struct ExecutionServer {
    pub name: String,
    pub config: ExecutionServerConfig,
    pub engine: Engine,
    pub storage_dir: PathBuf,
    /// Whether operations for this server go through the ssh bridge from
    /// this process.
    pub dispatch_remotely: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionServers {
    servers: BTreeMap<String, ExecutionServer>,
}

impl ExecutionServers {
    /// A server flagged `remote` is handled locally when it is the server
    /// this process runs as (`execution_server` in the configuration).
    pub fn from_config(config: &ClusterpostConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let servers = config
            .execution_servers
            .iter()
            .map(|(name, server)| {
                let dispatch_remotely =
                    server.remote && config.execution_server.as_deref() != Some(name.as_str());
                let resolved = ExecutionServer {
                    name: name.clone(),
                    config: server.clone(),
                    engine: Engine::from_config(server, runner.clone()),
                    storage_dir: config.storage_dir_for(name),
                    dispatch_remotely,
                };
                (name.clone(), resolved)
            })
            .collect();
        Self { servers }
    }

    pub fn get(&self, name: &str) -> Result<&ExecutionServer> {
        self.servers
            .get(name)
            .ok_or_else(|| ClusterpostError::UnknownExecutionServer(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
