//! Schema-validated publish path.
//!
//! The publisher fails closed: a payload that does not pass its topic's
//! schema never reaches the broker. There is no retry here either way;
//! keeping publish latency predictable means retry policy belongs to the
//! caller.

use crate::broker::BrokerClient;
use crate::errors::{PublishError, PublishResult};
use crate::metrics::BusMetrics;
use crate::schema::SchemaValidator;
use crate::types::TopicName;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Publishes schema-validated events to the broker.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn BrokerClient>,
    validator: Arc<SchemaValidator>,
    metrics: Arc<BusMetrics>,
}

impl Publisher {
    /// Creates a publisher over the given broker and validator.
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        validator: Arc<SchemaValidator>,
        metrics: Arc<BusMetrics>,
    ) -> Self {
        Self {
            broker,
            validator,
            metrics,
        }
    }

    /// Validates `event` against `topic`'s schema, then publishes it to
    /// `wire_subject`.
    ///
    /// On validation failure the broker is never called and the error
    /// carries the validator's message and per-constraint details. The
    /// operation never partially succeeds.
    pub async fn publish<E: Serialize + Sync>(
        &self,
        topic: &TopicName,
        event: &E,
        wire_subject: &str,
    ) -> PublishResult<()> {
        let start = Instant::now();

        let payload = serde_json::to_value(event)
            .map_err(|e| PublishError::SerializationFailed(e.to_string()))?;

        let report = self.validator.validate(topic, &payload).await;
        if !report.valid {
            warn!(
                topic = %topic,
                errors = ?report.errors,
                "refusing to publish schema-invalid event"
            );
            self.metrics.publish.record_rejected(topic);
            return Err(PublishError::ValidationFailed {
                message: report
                    .message
                    .unwrap_or_else(|| format!("Schema validation failed for topic '{topic}'")),
                errors: report.errors,
            });
        }

        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| PublishError::SerializationFailed(e.to_string()))?;

        match self.broker.publish(wire_subject, bytes).await {
            Ok(()) => {
                debug!(topic = %topic, subject = wire_subject, "event published");
                self.metrics.publish.record_published(topic, start.elapsed());
                Ok(())
            }
            Err(err) => {
                warn!(topic = %topic, subject = wire_subject, error = %err, "publish failed");
                self.metrics.publish.record_failed(topic, start.elapsed());
                Err(PublishError::Broker(err))
            }
        }
    }
}
