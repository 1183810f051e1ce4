//! Push-streaming consumer loop and its lag sampler.
//!
//! The broker drives delivery: the loop selects between the shutdown
//! signal and the next delivered message, applying the same settlement
//! discipline as the pull loop. A companion task periodically samples
//! consumer lag into gauges; sampling failures are logged and skipped so
//! an unreachable broker never disturbs delivery.

use crate::broker::{BrokerClient, PushSubscribeOptions};
use crate::consumer::{process_delivery, sleep_or_shutdown, ConsumerHandle, EventHandler};
use crate::errors::SubscribeError;
use crate::metrics::BusMetrics;
use crate::schema::SchemaValidator;
use crate::types::{DurableName, StreamName, TopicName};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Identity and tuning for one push consumer.
#[derive(Debug, Clone)]
pub struct PushConsumerConfig {
    /// Logical topic, used for schema lookup and metric labels.
    pub topic: TopicName,
    /// Wire subject to subscribe on.
    pub subject: String,
    /// Stream the durable consumer lives on; needed for lag queries.
    pub stream: StreamName,
    /// Durable consumer name.
    pub durable: DurableName,
    /// Optional server-side subject filter.
    pub filter_subject: Option<String>,
    /// How often the lag sampler polls consumer info.
    pub lag_sample_interval: Duration,
}

/// Creates the push subscription and spawns its delivery loop plus the
/// lag sampler task.
///
/// Stopping the handle ends both tasks; the message being processed
/// settles first.
pub async fn spawn_push_consumer<H: EventHandler>(
    broker: Arc<dyn BrokerClient>,
    validator: Arc<SchemaValidator>,
    metrics: Arc<BusMetrics>,
    config: PushConsumerConfig,
    handler: H,
) -> Result<ConsumerHandle, SubscribeError> {
    let mut deliveries = broker
        .push_subscribe(
            &config.subject,
            &PushSubscribeOptions {
                durable: config.durable.clone(),
                filter_subject: config.filter_subject.clone(),
            },
        )
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let delivery_task = {
        let mut shutdown_rx = shutdown_rx.clone();
        let topic = config.topic.clone();
        let durable = config.durable.clone();
        let validator = Arc::clone(&validator);
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            info!(topic = %topic, durable = %durable, "push consumer started");
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    delivered = deliveries.next() => {
                        match delivered {
                            Some(message) => {
                                process_delivery(
                                    &topic,
                                    &validator,
                                    &handler,
                                    &metrics,
                                    message.as_ref(),
                                )
                                .await;
                            }
                            None => {
                                warn!(topic = %topic, durable = %durable, "delivery stream ended");
                                break;
                            }
                        }
                    }
                }
            }
            info!(topic = %topic, durable = %durable, "push consumer stopped");
        })
    };

    let sampler_task = {
        let mut shutdown_rx = shutdown_rx;
        tokio::spawn(async move {
            loop {
                if sleep_or_shutdown(&mut shutdown_rx, config.lag_sample_interval).await {
                    break;
                }
                match broker.consumer_info(&config.stream, &config.durable).await {
                    Ok(lag) => {
                        metrics
                            .consume
                            .set_lag(&config.durable, lag.num_pending, lag.num_ack_pending);
                    }
                    Err(err) => {
                        warn!(
                            stream = %config.stream,
                            durable = %config.durable,
                            error = %err,
                            "lag sample failed, skipping"
                        );
                    }
                }
            }
        })
    };

    Ok(ConsumerHandle::new(
        shutdown_tx,
        vec![delivery_task, sampler_task],
    ))
}
