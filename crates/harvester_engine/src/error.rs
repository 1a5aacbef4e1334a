use std::time::Duration;

use harvester_core::ConfigError;

use crate::CapabilityError;

/// Setup errors surfaced synchronously by [`crate::Orchestrator::start`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a harvest run is already active")]
    AlreadyRunning,
    #[error("no credentials available for the work source")]
    MissingCredentials,
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Why a single session ended as `failed`. The display text is what gets
/// reported to the work source.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    #[error("context creation failed: {reason}")]
    ContextCreationFailed { reason: String },
    #[error("cancelled")]
    Cancelled,
    #[error("collection timed out after {}s", .0.as_secs_f64())]
    CollectionTimedOut(Duration),
    #[error("collector reported failure: {0}")]
    CollectionRejected(String),
    #[error("collector bridge failed: {0}")]
    Bridge(CapabilityError),
    #[error("upload failed: {0}")]
    Upload(CapabilityError),
}
