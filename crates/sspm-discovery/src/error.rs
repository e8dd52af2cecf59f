//! Error types for the discovery engine.

use std::time::Duration;

use thiserror::Error;

use crate::types::SaasAppId;

/// Errors produced by the reconciliation engine and its collaborators.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// The evidence repository or connector registry failed.
    #[error("Repository error: {0}")]
    Repository(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// A repository call exceeded the configured timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A stored connector kind is not present in the connector catalog.
    #[error("Unknown connector kind: {0}")]
    UnknownConnectorKind(String),

    /// Binding confidence outside of [0, 1].
    #[error("Invalid binding confidence: {0}")]
    InvalidConfidence(f64),

    /// A sighting carried a domain that cannot be normalised into a key.
    #[error("Invalid application domain: {0:?}")]
    InvalidDomain(String),

    /// Discovered application not found.
    #[error("SaaS application not found: {0}")]
    AppNotFound(SaasAppId),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl DiscoveryError {
    /// True for logic errors that concern a single record rather than the
    /// whole pass.
    #[must_use]
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            Self::UnknownConnectorKind(_)
                | Self::InvalidConfidence(_)
                | Self::InvalidDomain(_)
                | Self::AppNotFound(_)
        )
    }

    /// True for failures that may succeed when retried by the next pass.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Repository(_) | Self::Timeout { .. })
    }
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
