//! Crate-wide error taxonomy and result alias.
//!
//! Every recoverable failure is logged where it happens and the flow
//! continues with a safe fallback. Only `Install` and `CriticalUpdate`
//! may terminate the process, and both are presented to the user on an
//! error surface first.

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::pki::InstallError;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, TrustError>;

/// Error types for trust bootstrap and consent mediation
#[derive(Debug, Error)]
pub enum TrustError {
    /// Bad or missing local configuration (recovered with defaults)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing, expired or unparsable certificate material (triggers regeneration)
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Trust-store registration failed (fatal for the run, files rolled back)
    #[error("Trust store installation failed: {0}")]
    Install(#[from] InstallError),

    /// Remote fetch failed (recovered from cached or bundled data)
    #[error("Network error: {0}")]
    Network(String),

    /// Envelope failed verification (treated as absent data)
    #[error("Signature error: {0}")]
    Signature(#[from] EnvelopeError),

    /// Version string could not be handled
    #[error("Version error: {0}")]
    Version(String),

    /// Empty or invalid human input (request rejected)
    #[error("Consent error: {0}")]
    Consent(String),

    /// Running version is below the remote-mandated minimum (fatal)
    #[error("Critical update required: {0}")]
    CriticalUpdate(String),

    /// Protocol violation on the secure-server event channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Filesystem failure underneath one of the flows
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrustError {
    /// Whether this error is allowed to terminate the process.
    ///
    /// Everything else must be logged and recovered from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Install(_) | Self::CriticalUpdate(_))
    }
}
