//! # Error Types
//!
//! Crate-wide error type. Backend failures are not errors here: they are
//! recorded into the job document as `FAIL`/`EXIT` outcomes. `ClusterpostError`
//! covers the failures that must be surfaced to the caller of a handler.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::state_machine::StateMachineError;

#[derive(Error, Debug)]
pub enum ClusterpostError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Document store error: {operation}: {message}")]
    Store { operation: String, message: String },

    #[error("Revision conflict for document {id}: the document was modified concurrently")]
    RevisionConflict { id: String },

    #[error("Document not found: {id}")]
    NotFound { id: String },

    #[error("Engine error ({engine}): {message}")]
    Engine { engine: String, message: String },

    #[error("Staging error: {message}")]
    Staging { message: String },

    #[error("Remote execution error on {server}: {message}")]
    Remote { server: String, message: String },

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Token signing error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Unknown execution server: {0}")]
    UnknownExecutionServer(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterpostError {
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn revision_conflict(id: impl Into<String>) -> Self {
        Self::RevisionConflict { id: id.into() }
    }

    pub fn engine(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            engine: engine.into(),
            message: message.into(),
        }
    }

    pub fn staging(message: impl Into<String>) -> Self {
        Self::Staging {
            message: message.into(),
        }
    }

    pub fn remote(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Documents and backend jobs that no longer exist are terminal
    /// successes for delete and kill paths.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::RevisionConflict { .. })
    }
}

impl From<reqwest::Error> for ClusterpostError {
    fn from(err: reqwest::Error) -> Self {
        ClusterpostError::store("http", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClusterpostError>;
