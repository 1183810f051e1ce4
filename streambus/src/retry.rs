//! Retry classification for consumer handler failures.
//!
//! The broker redelivers naked messages on its own backoff schedule; this
//! layer only decides which failures are worth a redelivery. Transient
//! infrastructure trouble is; deterministic validation or business-rule
//! failures are not, since the same message will fail the same way again.

use crate::errors::BrokerError;
use thiserror::Error;

/// What a consumer loop should do with a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Nak the message; the broker will redeliver.
    Retry,
    /// Ack the message despite the failure so it cannot block the
    /// subscription; visible only through logs and metrics.
    Permanent,
}

/// An error returned by an event handler callback.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// A downstream call timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A downstream connection failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The event failed the handler's own validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A business rule rejected the event.
    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    /// An error carrying no recognizable classification.
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Classifies this failure as retryable or permanent.
    ///
    /// Unrecognized errors classify as retryable: favoring redelivery over
    /// silent loss is the safe default when nothing is known about the
    /// failure.
    #[must_use]
    pub const fn classify(&self) -> RetryClass {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::Other(_) => RetryClass::Retry,
            Self::Validation(_) | Self::BusinessRule(_) => RetryClass::Permanent,
        }
    }
}

impl From<BrokerError> for HandlerError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Timeout(d) => Self::Timeout(format!("broker call timed out after {d:?}")),
            BrokerError::ConnectionFailed(msg) => Self::Connection(msg),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn infrastructure_errors_are_retryable() {
        assert_eq!(
            HandlerError::Timeout("db".to_string()).classify(),
            RetryClass::Retry
        );
        assert_eq!(
            HandlerError::Connection("refused".to_string()).classify(),
            RetryClass::Retry
        );
    }

    #[test]
    fn deterministic_failures_are_permanent() {
        assert_eq!(
            HandlerError::Validation("missing field".to_string()).classify(),
            RetryClass::Permanent
        );
        assert_eq!(
            HandlerError::BusinessRule("insufficient funds".to_string()).classify(),
            RetryClass::Permanent
        );
    }

    #[test]
    fn unrecognized_errors_default_to_retry() {
        assert_eq!(
            HandlerError::Other("who knows".to_string()).classify(),
            RetryClass::Retry
        );
    }

    #[test]
    fn broker_errors_convert_with_their_class_intact() {
        let err: HandlerError = BrokerError::Timeout(Duration::from_secs(2)).into();
        assert_eq!(err.classify(), RetryClass::Retry);

        let err: HandlerError = BrokerError::ConnectionFailed("reset".to_string()).into();
        assert_eq!(err.classify(), RetryClass::Retry);
    }
}
