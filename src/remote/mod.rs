//! # Remote Execution Bridge
//!
//! Jobs targeting an execution server configured with `remote: true` are not
//! run through a local [`Engine`](crate::engine::Engine). Instead a peer
//! instance of `clusterpost-execution` is invoked on the server's host over
//! ssh and trusted to update the shared document store itself.
//!
//! Besides dispatch, this module provisions per-server authentication tokens
//! ([`TokenProvisioner`]) and keeps configured ssh tunnels alive
//! ([`TunnelSupervisor`]).

pub mod ssh;
pub mod tokens;
pub mod tunnel;

pub use ssh::{RemoteBridge, RemoteOperation};
pub use tokens::{ProvisionReport, ServerToken, TokenClaims, TokenProvisioner};
pub use tunnel::{TunnelStatus, TunnelSupervisor};

use crate::config::ExecutionServerConfig;
use crate::error::{ClusterpostError, Result};

/// `user@host` and identity file of a server, or an error naming what is
/// missing.
pub(crate) fn ssh_coordinates<'a>(
    name: &str,
    server: &'a ExecutionServerConfig,
) -> Result<(String, &'a std::path::Path)> {
    let destination = server
        .ssh_destination()
        .ok_or_else(|| ClusterpostError::remote(name, "hostname and user are required"))?;
    let identity = server
        .identity_file
        .as_deref()
        .ok_or_else(|| ClusterpostError::remote(name, "identity_file is required"))?;
    Ok((destination, identity))
}
