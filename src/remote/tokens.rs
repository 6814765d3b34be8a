//! Execution server authentication tokens.
//!
//! Each non-remote execution server reachable over ssh receives a signed token in
//! `<source_dir>/.token`. The peer presents it when it writes job updates
//! back, and the store façade verifies it with the same secret.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::ssh_coordinates;
use crate::config::{AuthConfig, ExecutionServerConfig};
use crate::constants::TOKEN_FILE;
use crate::engine::{CommandRequest, CommandRunner};
use crate::error::{ClusterpostError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub executionserver: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Content of the token file copied to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerToken {
    pub token: String,
    pub executionserver: String,
}

/// Outcome of one provisioning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub provisioned: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct TokenProvisioner {
    runner: Arc<dyn CommandRunner>,
    secret: String,
    expiry_hours: u64,
    scratch_dir: PathBuf,
}

impl TokenProvisioner {
    /// `scratch_dir` holds the token file between signing and copying.
    pub fn new(runner: Arc<dyn CommandRunner>, auth: &AuthConfig, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            secret: auth.token_secret.clone(),
            expiry_hours: auth.token_expiry_hours,
            scratch_dir: scratch_dir.into(),
        }
    }

    fn ensure_secret(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(ClusterpostError::Validation(
                "auth.token_secret is not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Sign a token on behalf of `server_name`.
    pub fn sign(&self, server_name: &str) -> Result<ServerToken> {
        self.ensure_secret()?;

        let now = Utc::now();
        let expiry = now + Duration::hours(self.expiry_hours as i64);
        let claims = TokenClaims {
            executionserver: server_name.to_string(),
            iat: now.timestamp(),
            exp: expiry.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| {
            error!(error = %e, "Failed to sign execution server token");
            ClusterpostError::Token(e)
        })?;

        debug!(
            execution_server = %server_name,
            expiry_timestamp = claims.exp,
            "Execution server token signed"
        );
        Ok(ServerToken {
            token,
            executionserver: server_name.to_string(),
        })
    }

    /// Verify a token presented by a peer.
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        self.ensure_secret()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }

    /// Sign and copy a token to every non-remote server with ssh
    /// coordinates. One server failing does not stop the others.
    #[instrument(skip_all, fields(servers = servers.len()))]
    pub async fn provision_all(
        &self,
        servers: &BTreeMap<String, ExecutionServerConfig>,
    ) -> ProvisionReport {
        let mut report = ProvisionReport::default();

        for (name, server) in servers {
            if server.remote {
                debug!(execution_server = %name, "Remote server, token not provisioned");
                report.skipped.push(name.clone());
                continue;
            }
            if !server.has_ssh_coordinates() || server.source_dir.is_none() {
                debug!(execution_server = %name, "No ssh coordinates, token not provisioned");
                report.skipped.push(name.clone());
                continue;
            }
            match self.provision(name, server).await {
                Ok(()) => report.provisioned.push(name.clone()),
                Err(e) => {
                    warn!(execution_server = %name, error = %e, "Token provisioning failed");
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        info!(
            provisioned = report.provisioned.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Token provisioning finished"
        );
        report
    }

    /// Sign, write `.<name>` to the scratch directory, `scp` it to
    /// `<source_dir>/.token` and remove the scratch file.
    pub async fn provision(&self, name: &str, server: &ExecutionServerConfig) -> Result<()> {
        let token = self.sign(name)?;
        let (destination, identity) = ssh_coordinates(name, server)?;
        let source_dir = server
            .source_dir
            .as_deref()
            .ok_or_else(|| ClusterpostError::remote(name, "source_dir is required"))?;

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let scratch = self.scratch_dir.join(format!(".{name}"));
        tokio::fs::write(&scratch, serde_json::to_vec(&token)?).await?;

        let request = copy_request(&scratch, identity, &destination, source_dir);
        let copied = self.runner.run(&request).await;

        if let Err(e) = tokio::fs::remove_file(&scratch).await {
            warn!(path = %scratch.display(), error = %e, "Failed to remove scratch token file");
        }

        let output = copied.map_err(|e| ClusterpostError::remote(name, format!("scp failed to start: {e}")))?;
        if !output.success() {
            return Err(ClusterpostError::remote(name, output.combined()));
        }
        info!(execution_server = %name, "Token copied to execution server");
        Ok(())
    }
}

fn copy_request(file: &Path, identity: &Path, destination: &str, source_dir: &str) -> CommandRequest {
    CommandRequest::new("scp")
        .arg("-i")
        .arg(identity.display().to_string())
        .arg(file.display().to_string())
        .arg(format!(
            "{destination}:{}",
            Path::new(source_dir).join(TOKEN_FILE).display()
        ))
}
