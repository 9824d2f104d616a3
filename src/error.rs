// src/error.rs
//! Error taxonomy for collaborators and the pipeline engine.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by an external collaborator (generation APIs, ffmpeg, storage).
///
/// Only `Transient` is retried by the unit retry policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("transient collaborator error: {0}")]
    Transient(String),
    #[error("permanent collaborator error: {0}")]
    Permanent(String),
    #[error("malformed collaborator output: {0}")]
    Parse(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }

    /// Classify an HTTP status the way the upstream vendors signal back-pressure.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("API error ({}): {}", status, body);
        match status {
            429 | 500 | 502 | 503 | 504 => CollaboratorError::Transient(message),
            _ => CollaboratorError::Permanent(message),
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            CollaboratorError::Transient(format!("Connection error: {}", e))
        } else if e.is_decode() {
            CollaboratorError::Parse(format!("Failed to decode response: {}", e))
        } else {
            CollaboratorError::Permanent(format!("Request error: {}", e))
        }
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(e: std::io::Error) -> Self {
        CollaboratorError::Permanent(format!("I/O error: {}", e))
    }
}

/// Engine-level failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("no successful units in {stage} round ({dispatched} dispatched)")]
    AggregationEmpty { stage: String, dispatched: usize },
    #[error("graph error: {0}")]
    Graph(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("pipeline cancelled")]
    Cancelled,
    #[error("stage '{node}' timed out after {limit:?}")]
    StageTimeout { node: String, limit: Duration },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
