//! Error types for chaincode lifecycle operations
//!
//! Every remote call and local validation step reports one of these variants.
//! `Transport` and `ServiceUnavailable` are the only transient kinds; everything
//! else propagates to the orchestrator unretried.

use std::time::Duration;

/// Main error type for lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Channel already exists: {channel_id}")]
    AlreadyExists { channel_id: String },

    #[error("Failed to join channel {channel_id} for {organization}: {reason}")]
    Join {
        channel_id: String,
        organization: String,
        reason: String,
    },

    #[error("Package error: {0}")]
    Package(String),

    #[error("Chaincode {name} already instantiated on channel {channel_id}; use upgrade")]
    AlreadyInstantiated { channel_id: String, name: String },

    #[error("Endorsement policy error: {0}")]
    Policy(String),

    #[error("Chaincode {name}:{version} is not installed on {organization}")]
    NotInstalled {
        name: String,
        version: String,
        organization: String,
    },

    #[error("Endorsement error: {0}")]
    Endorsement(String),

    #[error("Ordering error: {0}")]
    Ordering(String),

    #[error("Chaincode error (status {status}): {message}")]
    Chaincode { status: i32, message: String },

    #[error("Unknown identity {user} in organization {organization}")]
    Identity { organization: String, user: String },

    #[error("Did not receive event matching '{pattern}' within {waited:?} (transaction unconfirmed)")]
    TimedOut { pattern: String, waited: Duration },

    #[error("Verification failed: before {before}, after {after}, expected delta {expected_delta}")]
    Verification {
        before: String,
        after: String,
        expected_delta: i64,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Operation {operation} cancelled")]
    Cancelled { operation: String },

    #[error("Event subscription error: {0}")]
    Subscription(String),
}

impl LifecycleError {
    /// Whether a retry has any chance of a different outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ServiceUnavailable(_))
    }

    /// Short machine-friendly name, used in reports and remote error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authorization(_) => "authorization",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Join { .. } => "join",
            Self::Package(_) => "package",
            Self::AlreadyInstantiated { .. } => "already_instantiated",
            Self::Policy(_) => "policy",
            Self::NotInstalled { .. } => "not_installed",
            Self::Endorsement(_) => "endorsement",
            Self::Ordering(_) => "ordering",
            Self::Chaincode { .. } => "chaincode",
            Self::Identity { .. } => "identity",
            Self::TimedOut { .. } => "timed_out",
            Self::Verification { .. } => "verification",
            Self::Transport(_) => "transport",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Cancelled { .. } => "cancelled",
            Self::Subscription(_) => "subscription",
        }
    }
}

impl From<std::io::Error> for LifecycleError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for LifecycleError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LifecycleError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Subscription(err.to_string())
    }
}

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
