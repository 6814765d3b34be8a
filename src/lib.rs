#![allow(clippy::doc_markdown)] // Allow technical terms like CouchDB, SLURM in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Clusterpost Core
//!
//! Cluster-agnostic job execution: drives job documents from a revisioned
//! document store through LSF, PBS/Torque, SLURM or plain local processes.
//!
//! ## Overview
//!
//! A job document names an executable, its parameters, the input files to
//! stage in and the outputs to publish, and the execution server it targets.
//! Job ids are put on one of four deduplicated queues (submit, status, kill,
//! delete); a periodic tick drains them in that order and runs the matching
//! lifecycle handler, which moves the document through its ten states:
//!
//! ```text
//! CREATE -> QUEUE -> DOWNLOADING -> RUN -> UPLOADING -> DONE
//!                                   |          \-> FAIL
//!                                   \-> KILL -> EXIT       (any) -> DELETE
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - one contract over the four batch backends
//! - [`staging`] - input download and output publication
//! - [`remote`] - ssh dispatch to peer servers, tokens, tunnels
//! - [`queue`] - the four queues and the periodic scheduler
//! - [`orchestration`] - submit/status/kill/delete handlers
//! - [`state_machine`] - job states and legal transitions
//! - [`store`] - document store boundary (CouchDB and in-memory)
//! - [`models`] - the job document
//! - [`config`] - YAML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clusterpost_core::config::ClusterpostConfig;
//! use clusterpost_core::engine::SystemCommandRunner;
//! use clusterpost_core::orchestration::LifecycleOrchestrator;
//! use clusterpost_core::store::InMemoryDocumentStore;
//!
//! # async fn example() -> clusterpost_core::Result<()> {
//! let config = ClusterpostConfig::local("/tmp/clusterpost");
//! let orchestrator = LifecycleOrchestrator::new(
//!     &config,
//!     Arc::new(InMemoryDocumentStore::new()),
//!     Arc::new(SystemCommandRunner),
//! );
//! let job = orchestrator.submit_job("job-id", false).await?;
//! println!("{} is {}", job.id, job.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod queue;
pub mod remote;
pub mod staging;
pub mod state_machine;
pub mod store;
pub mod test_helpers;

pub use config::{ClusterpostConfig, ConfigManager, EngineKind, ExecutionServerConfig};
pub use engine::{Engine, ExecutionEngine, ExecutionServers};
pub use error::{ClusterpostError, Result};
pub use models::JobDocument;
pub use orchestration::{JobRequests, LifecycleOrchestrator};
pub use queue::{QueueManager, Scheduler};
pub use state_machine::{JobEvent, JobState};
pub use store::DocumentStore;
