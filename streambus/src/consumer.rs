//! Shared consumer machinery: the event handler seam, the per-message
//! acknowledgment discipline, and the handle that stops a running loop.
//!
//! Every delivered message terminates in exactly one of ack/nak, on every
//! code path. The decision is computed first and executed once, so no
//! branch can double-settle or leak a message:
//!
//! - deserialization failure: permanent bad data, ack;
//! - schema validation failure: nak — a schema registry race may resolve on
//!   redelivery, and persistent bad producers stay visible in metrics;
//! - handler success: ack;
//! - handler failure: classify; retryable naks, permanent acks so an
//!   unprocessable message can never block the subscription.

use crate::broker::InFlightMessage;
use crate::metrics::BusMetrics;
use crate::retry::{HandlerError, RetryClass};
use crate::schema::SchemaValidator;
use crate::types::TopicName;
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Processes typed events delivered by a consumer loop.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// The typed event this handler consumes.
    type Event: DeserializeOwned + Send;

    /// Handles one event. Failures are classified via
    /// [`HandlerError::classify`] into an ack/nak decision.
    async fn handle(&self, event: Self::Event) -> Result<(), HandlerError>;
}

/// Handle to a running consumer: an explicit shutdown signal plus the
/// spawned task(s).
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub(crate) const fn new(shutdown: watch::Sender<bool>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { shutdown, tasks }
    }

    /// Signals shutdown and waits for the loop (and any sampler) to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "consumer task panicked during shutdown");
            }
        }
    }

    /// Whether every task has already exited.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

/// The single settlement applied to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Nak,
}

/// Processes one delivered message through deserialize, validate, handle,
/// classify, and settles it exactly once.
pub(crate) async fn process_delivery<H: EventHandler>(
    topic: &TopicName,
    validator: &SchemaValidator,
    handler: &H,
    metrics: &BusMetrics,
    message: &dyn InFlightMessage,
) {
    let settlement = decide(topic, validator, handler, metrics, message).await;
    let result = match settlement {
        Settlement::Ack => message.ack().await,
        Settlement::Nak => message.nak().await,
    };
    // Settlement transport errors must not affect processing; the broker
    // will redeliver anything left unacknowledged.
    if let Err(e) = result {
        warn!(topic = %topic, settlement = ?settlement, error = %e, "message settlement failed");
    }
}

async fn decide<H: EventHandler>(
    topic: &TopicName,
    validator: &SchemaValidator,
    handler: &H,
    metrics: &BusMetrics,
    message: &dyn InFlightMessage,
) -> Settlement {
    let payload: serde_json::Value = match serde_json::from_slice(message.payload()) {
        Ok(value) => value,
        Err(e) => {
            error!(topic = %topic, error = %e, "undecodable payload, dropping");
            metrics.consume.deserialization_failures.increment();
            return Settlement::Ack;
        }
    };

    let report = validator.validate(topic, &payload).await;
    if !report.valid {
        warn!(
            topic = %topic,
            delivery_count = message.delivery_count(),
            errors = ?report.errors,
            "consumed payload failed schema validation, requesting redelivery"
        );
        metrics.consume.validation_failures.increment();
        return Settlement::Nak;
    }

    let event: H::Event = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(topic = %topic, error = %e, "payload does not match event type, dropping");
            metrics.consume.deserialization_failures.increment();
            return Settlement::Ack;
        }
    };

    // Panics in handler code must not escape: an uncaught panic would
    // strand the message in flight and kill the consumer task. A panic is
    // a deterministic programming error, so it settles like a permanent
    // failure.
    let start = Instant::now();
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => {
            metrics.consume.record_processed(topic, start.elapsed());
            Settlement::Ack
        }
        Ok(Err(err)) => match err.classify() {
            RetryClass::Retry => {
                warn!(topic = %topic, error = %err, "handler failed, requesting redelivery");
                metrics.consume.naked.increment();
                Settlement::Nak
            }
            RetryClass::Permanent => {
                error!(topic = %topic, error = %err, "handler failed permanently, dropping");
                metrics.consume.permanent_failures.increment();
                Settlement::Ack
            }
        },
        Err(panic) => {
            error!(
                topic = %topic,
                reason = panic_reason(panic.as_ref()),
                "handler panicked, dropping message"
            );
            metrics.consume.permanent_failures.increment();
            Settlement::Ack
        }
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> &str {
    panic.downcast_ref::<&str>().copied().unwrap_or_else(|| {
        panic
            .downcast_ref::<String>()
            .map_or("non-string panic payload", String::as_str)
    })
}

/// Sleeps for `duration` unless shutdown is signaled first.
///
/// Returns `true` when the loop should exit.
pub(crate) async fn sleep_or_shutdown(
    shutdown: &mut watch::Receiver<bool>,
    duration: std::time::Duration,
) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => {
            // A dropped sender means the handle is gone; treat as shutdown.
            changed.is_err() || *shutdown.borrow()
        }
    }
}

/// Whether shutdown has already been signaled.
pub(crate) fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
