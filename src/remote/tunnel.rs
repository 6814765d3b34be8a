//! Supervision of long-lived ssh tunnels.
//!
//! A server with a `tunnel` section gets a detached
//! `ssh <flag> <value>... -i <identity> -q user@host` process. The periodic
//! check looks the recorded pid up with `ps -p` and starts a new tunnel when
//! it is gone. A dead tunnel only affects reachability, so failures are
//! reported and retried on the next check.

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::ssh_coordinates;
use crate::config::ExecutionServerConfig;
use crate::engine::{CommandRequest, CommandRunner};
use crate::error::{ClusterpostError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStatus {
    Alive { pid: u32 },
    Started { pid: u32 },
    Failed { error: String },
}

#[derive(Debug)]
pub struct TunnelSupervisor {
    runner: Arc<dyn CommandRunner>,
    tunnels: DashMap<String, u32>,
}

impl TunnelSupervisor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            tunnels: DashMap::new(),
        }
    }

    /// Pid of the tunnel last started for `server_name`.
    pub fn pid(&self, server_name: &str) -> Option<u32> {
        self.tunnels.get(server_name).map(|entry| *entry)
    }

    pub fn tunnel_request(name: &str, server: &ExecutionServerConfig) -> Result<CommandRequest> {
        let (destination, identity) = ssh_coordinates(name, server)?;
        let mut request = CommandRequest::new("ssh");
        for (flag, value) in &server.tunnel {
            request = request.arg(flag.as_str());
            if !value.is_empty() {
                request = request.arg(value.as_str());
            }
        }
        Ok(request
            .arg("-i")
            .arg(identity.display().to_string())
            .arg("-q")
            .arg(destination))
    }

    async fn is_alive(&self, pid: u32) -> bool {
        let request = CommandRequest::new("ps").args(["-p".to_string(), pid.to_string()]);
        match self.runner.run(&request).await {
            Ok(output) => output.success() && output.stdout.lines().count() > 1,
            Err(e) => {
                warn!(pid, error = %e, "Process lookup failed");
                false
            }
        }
    }

    /// Start the tunnel for one server and record its pid.
    pub async fn start(&self, name: &str, server: &ExecutionServerConfig) -> Result<u32> {
        let request = Self::tunnel_request(name, server)?;
        let pid = self
            .runner
            .spawn_detached(&request)
            .await
            .map_err(|e| ClusterpostError::remote(name, format!("tunnel failed to start: {e}")))?;
        self.tunnels.insert(name.to_string(), pid);
        info!(execution_server = %name, pid, "Tunnel started");
        Ok(pid)
    }

    /// Check one server's tunnel, restarting it when its process is gone.
    pub async fn ensure(&self, name: &str, server: &ExecutionServerConfig) -> TunnelStatus {
        if let Some(pid) = self.pid(name) {
            if self.is_alive(pid).await {
                debug!(execution_server = %name, pid, "Tunnel alive");
                return TunnelStatus::Alive { pid };
            }
            warn!(execution_server = %name, pid, "Tunnel process is gone, restarting");
            self.tunnels.remove(name);
        }

        match self.start(name, server).await {
            Ok(pid) => TunnelStatus::Started { pid },
            Err(e) => {
                warn!(execution_server = %name, error = %e, "Tunnel restart failed");
                TunnelStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Check every configured tunnel concurrently.
    #[instrument(skip_all)]
    pub async fn check_all(
        &self,
        servers: &BTreeMap<String, ExecutionServerConfig>,
    ) -> BTreeMap<String, TunnelStatus> {
        let checks = servers
            .iter()
            .filter(|(_, server)| server.has_tunnel())
            .map(|(name, server)| async move { (name.clone(), self.ensure(name, server).await) });
        join_all(checks).await.into_iter().collect()
    }
}
