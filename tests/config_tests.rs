//! Configuration loading and validation from files on disk.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use clusterpost_core::config::{ConfigManager, ConfigurationError, EngineKind};
use clusterpost_core::engine::{ExecutionServers, SystemCommandRunner};
use std::sync::Arc;

const CLUSTER: &str = r##"
storage_dir: /scratch/clusterpost
execution_server: killdevil
remote_command: bin/clusterpost-execution
scheduler:
  tick_interval_seconds: 30
  recovery_interval_seconds: 300
auth:
  token_secret: not-a-real-secret
execution_servers:
  killdevil:
    engine: lsf
    remote: true
    hostname: killdevil.unc.edu
    user: clusterpost
    identity_file: /home/clusterpost/.ssh/id_rsa
    source_dir: /nas/clusterpost
  longleaf:
    engine: slurm
    remote: true
    hostname: longleaf.unc.edu
    user: clusterpost
    identity_file: /home/clusterpost/.ssh/id_rsa
    source_dir: /nas/clusterpost
    hash_bang: "#!/bin/bash -l"
    tunnel:
      "-L": "5984:localhost:5984"
      "-N": ""
  workstation:
    engine: unix
    detached: false
    storage_dir: /data/jobs
test:
  scheduler:
    worker_id: 3
"##;

fn load(contents: &str, environment: &str) -> Result<Arc<ConfigManager>, ConfigurationError> {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("clusterpost.yml"), contents).unwrap();
    ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), environment)
}

#[test]
fn test_full_cluster_configuration_loads() {
    let manager = load(CLUSTER, "development").unwrap();
    let config = manager.config();

    assert!(manager.config_file().ends_with("clusterpost.yml"));
    assert_eq!(config.execution_servers.len(), 3);
    assert_eq!(config.remote_command, "bin/clusterpost-execution");

    let longleaf = config.execution_server("longleaf").unwrap();
    assert_eq!(longleaf.engine, EngineKind::Slurm);
    assert_eq!(longleaf.hash_bang(), "#!/bin/bash -l");
    assert!(longleaf.has_tunnel());
    assert_eq!(longleaf.ssh_destination().as_deref(), Some("clusterpost@longleaf.unc.edu"));

    let workstation = config.execution_server("workstation").unwrap();
    assert!(!workstation.detached);
    assert_eq!(config.storage_dir_for("workstation"), PathBuf::from("/data/jobs"));
    assert_eq!(config.storage_dir_for("killdevil"), PathBuf::from("/scratch/clusterpost"));
}

#[test]
fn test_worker_id_staggers_cadences() {
    let manager = load(CLUSTER, "test").unwrap();
    let scheduler = &manager.config().scheduler;

    assert_eq!(scheduler.worker_id, 3);
    assert_eq!(scheduler.tick_interval(), Duration::from_secs(90));
    assert_eq!(scheduler.recovery_interval(), Duration::from_secs(900));
}

#[test]
fn test_peer_process_handles_its_own_server_locally() {
    let manager = load(CLUSTER, "development").unwrap();
    let servers = ExecutionServers::from_config(manager.config(), Arc::new(SystemCommandRunner));

    assert!(!servers.get("killdevil").unwrap().dispatch_remotely);
    assert!(servers.get("longleaf").unwrap().dispatch_remotely);
    assert!(!servers.get("workstation").unwrap().dispatch_remotely);
    assert!(servers.get("hydra").is_err());
}

#[test]
fn test_remote_server_without_identity_is_rejected() {
    let contents = "storage_dir: /tmp\nexecution_servers:\n  grid:\n    engine: pbs\n    remote: true\n    hostname: grid.example.edu\n    user: ops\n    source_dir: /opt/cp\n";
    match load(contents, "development").unwrap_err() {
        ConfigurationError::MissingField { field } => {
            assert_eq!(field, "execution_servers.grid.identity_file")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_execution_server_name_is_rejected() {
    let contents = "storage_dir: /tmp\nexecution_server: elsewhere\nexecution_servers:\n  local:\n    engine: unix\n";
    assert!(matches!(
        load(contents, "development").unwrap_err(),
        ConfigurationError::InvalidValue { .. }
    ));
}

#[test]
fn test_empty_server_list_is_rejected() {
    let contents = "storage_dir: /tmp\nexecution_servers: {}\n";
    assert!(matches!(
        load(contents, "development").unwrap_err(),
        ConfigurationError::MissingField { .. }
    ));
}
