//! Pull-batch consumer loop.
//!
//! The loop fetches a bounded batch, processes every message concurrently,
//! waits for all of them to settle, then fetches again. Settle-all batching
//! keeps at most `batch_size` messages in flight and never interleaves
//! fetches with unsettled work. A single handler that never returns
//! therefore stalls the whole loop; handlers are expected to bound their
//! own downstream waits.

use crate::broker::{BrokerClient, PullSubscribeOptions};
use crate::config::PullConfig;
use crate::consumer::{
    process_delivery, shutdown_requested, sleep_or_shutdown, ConsumerHandle, EventHandler,
};
use crate::errors::SubscribeError;
use crate::metrics::BusMetrics;
use crate::schema::SchemaValidator;
use crate::types::{DurableName, TopicName};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Identity and tuning for one pull consumer.
#[derive(Debug, Clone)]
pub struct PullConsumerConfig {
    /// Logical topic, used for schema lookup and metric labels.
    pub topic: TopicName,
    /// Wire subject the subscription filters on.
    pub subject: String,
    /// Durable consumer name; the broker tracks progress under it.
    pub durable: DurableName,
    /// Batch size, fetch expiry, and sleep tuning.
    pub pull: PullConfig,
}

/// Creates the durable pull subscription and spawns its processing loop.
///
/// The returned handle stops the loop; in-flight messages settle before
/// the task exits, anything unfetched stays with the broker.
pub async fn spawn_pull_consumer<H: EventHandler>(
    broker: Arc<dyn BrokerClient>,
    validator: Arc<SchemaValidator>,
    metrics: Arc<BusMetrics>,
    config: PullConsumerConfig,
    handler: H,
) -> Result<ConsumerHandle, SubscribeError> {
    let subscription = broker
        .pull_subscribe(
            &config.subject,
            &PullSubscribeOptions {
                durable: config.durable.clone(),
            },
        )
        .await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        info!(
            topic = %config.topic,
            durable = %config.durable,
            subject = %config.subject,
            "pull consumer started"
        );

        loop {
            if shutdown_requested(&shutdown_rx) {
                break;
            }

            match subscription
                .fetch(config.pull.batch_size, config.pull.fetch_expiry())
                .await
            {
                Ok(batch) if batch.is_empty() => {
                    if sleep_or_shutdown(&mut shutdown_rx, config.pull.idle_sleep()).await {
                        break;
                    }
                }
                Ok(batch) => {
                    // All settlements complete before the next fetch.
                    join_all(batch.iter().map(|message| {
                        process_delivery(
                            &config.topic,
                            &validator,
                            &handler,
                            &metrics,
                            message.as_ref(),
                        )
                    }))
                    .await;
                }
                Err(err) => {
                    error!(
                        topic = %config.topic,
                        durable = %config.durable,
                        error = %err,
                        "pull fetch failed, backing off"
                    );
                    metrics.consume.loop_errors.increment();
                    if sleep_or_shutdown(&mut shutdown_rx, config.pull.error_backoff()).await {
                        break;
                    }
                }
            }
        }

        info!(topic = %config.topic, durable = %config.durable, "pull consumer stopped");
    });

    Ok(ConsumerHandle::new(shutdown_tx, vec![task]))
}
