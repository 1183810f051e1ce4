//! Error types for `StreamBus`.
//!
//! Each subsystem has its own error enum so callers can handle failures at
//! the right granularity:
//!
//! - **`BrokerError`**: the typed contract every broker client implementation
//!   returns. The reconciler and consumer loops branch on its variants
//!   instead of matching message substrings, so broker version skew is
//!   absorbed at the client boundary.
//! - **`ReconcileError`**: fatal topology-convergence failures; these abort
//!   startup.
//! - **`PublishError`**: per-publish failures surfaced synchronously to the
//!   publishing code path.
//!
//! Handler-side errors and their retry classification live in [`crate::retry`].

use crate::types::StreamName;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a broker client implementation.
///
/// Implementations must map their transport's native error taxonomy onto
/// these variants. In particular, a missing stream must surface as
/// [`BrokerError::StreamNotFound`] and a create request carrying a field the
/// broker does not understand must surface as
/// [`BrokerError::InvalidStreamConfig`] naming that field.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The requested stream does not exist on the broker.
    #[error("Stream '{0}' not found")]
    StreamNotFound(StreamName),

    /// The broker rejected a create/update because it does not understand a
    /// configuration field. Older broker versions reject fields newer than
    /// themselves; the reconciler's fallback ladder depends on this variant.
    #[error("Broker rejected stream config field '{field}'")]
    InvalidStreamConfig {
        /// The rejected configuration field, as reported by the broker.
        field: String,
    },

    /// The requested durable consumer does not exist.
    #[error("Consumer '{0}' not found")]
    ConsumerNotFound(String),

    /// The connection to the broker failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The broker is temporarily unavailable.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// An error the client could not classify.
    #[error("Broker error: {0}")]
    Unknown(String),
}

impl BrokerError {
    /// Whether this error is transient infrastructure trouble that a retry
    /// (or broker redelivery) may resolve.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

/// Fatal errors from topology reconciliation.
///
/// Any of these aborts service startup: the process must not begin
/// publishing or consuming against a topology it could not converge.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// Fetching live stream info failed with something other than not-found.
    #[error("Failed to inspect stream '{stream}': {source}")]
    Inspect {
        /// The stream being inspected.
        stream: StreamName,
        /// The underlying broker error.
        source: BrokerError,
    },

    /// Stream creation failed even after the degraded-config fallback ladder.
    #[error("Failed to create stream '{stream}': {source}")]
    Create {
        /// The stream being created.
        stream: StreamName,
        /// The underlying broker error.
        source: BrokerError,
    },

    /// Updating a drifted stream failed.
    #[error("Failed to update stream '{stream}': {source}")]
    Update {
        /// The stream being updated.
        stream: StreamName,
        /// The underlying broker error.
        source: BrokerError,
    },
}

/// Errors surfaced by the validated publish path.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The payload failed schema validation; the broker was never called.
    #[error("{message}")]
    ValidationFailed {
        /// The validator's summary message.
        message: String,
        /// One human-readable message per violated constraint.
        errors: Vec<String>,
    },

    /// The payload could not be serialized for the wire.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The broker rejected or failed the publish call.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors from bus startup, before any publish or consume traffic.
#[derive(Debug, Clone, Error)]
pub enum SetupError {
    /// The configured topology is invalid.
    #[error("Invalid topology: {0}")]
    Topology(#[from] crate::topology::TopologyError),

    /// Converging the topology against the broker failed.
    #[error("Topology reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

/// Errors from establishing a subscription.
#[derive(Debug, Clone, Error)]
pub enum SubscribeError {
    /// The broker could not create or bind the subscription.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Type alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Type alias for reconciliation results.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Type alias for publish results.
pub type PublishResult<T> = Result<T, PublishError>;
