//! Error types for routescout.

use std::io;

use thiserror::Error;

/// Result type alias for routescout operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for routescout.
#[derive(Error, Debug)]
pub enum Error {
    // Measurement errors
    #[error("probe failed for {target}: {reason}")]
    ProbeFailure { target: String, reason: String },

    #[error("route discovery failed: {0}")]
    DiscoveryFailure(String),

    // Selection errors
    #[error("no routes available")]
    NoRoutesAvailable,

    #[error("route {0} not found")]
    RouteNotFound(String),

    // Precondition violations
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("already connected via {0}")]
    AlreadyConnected(String),

    #[error("a disconnect is in progress")]
    DisconnectInProgress,

    #[error("route analysis is already running")]
    AlreadyRunning,

    // Tunnel collaborator errors
    #[error("tunnel provisioning failed: {0}")]
    ProvisioningFailure(String),

    #[error("tunnel teardown failed: {0}")]
    TeardownFailure(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for a probe failure against `target`.
    pub fn probe(target: impl ToString, reason: impl ToString) -> Self {
        Self::ProbeFailure {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check if the error is a rejected precondition (no state was changed).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::AlreadyConnecting
                | Error::AlreadyConnected(_)
                | Error::DisconnectInProgress
                | Error::AlreadyRunning
        )
    }

    /// Check if the error was reported by an external collaborator.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Error::ProbeFailure { .. }
                | Error::DiscoveryFailure(_)
                | Error::ProvisioningFailure(_)
                | Error::TeardownFailure(_)
        )
    }
}
