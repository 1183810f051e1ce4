//! The event bus facade.
//!
//! An [`EventBus`] is constructed explicitly by the caller from a broker
//! client, a schema registry, and configuration. There is no global
//! instance; tests and applications compose exactly the bus they need and
//! two buses never share hidden state.

use crate::broker::BrokerClient;
use crate::config::BusConfig;
use crate::consumer::{ConsumerHandle, EventHandler};
use crate::errors::{SetupError, SubscribeError};
use crate::metrics::BusMetrics;
use crate::publisher::Publisher;
use crate::pull_consumer::{spawn_pull_consumer, PullConsumerConfig};
use crate::push_consumer::{spawn_push_consumer, PushConsumerConfig};
use crate::reconciler::StreamReconciler;
use crate::schema::{CacheStats, SchemaRegistry, SchemaValidator};
use crate::topology::desired_streams;
use crate::types::{DurableName, StreamName, TopicName};
use std::sync::Arc;
use tracing::info;

/// A configured event bus over one broker connection.
pub struct EventBus {
    broker: Arc<dyn BrokerClient>,
    validator: Arc<SchemaValidator>,
    metrics: Arc<BusMetrics>,
    config: BusConfig,
}

impl EventBus {
    /// Creates a bus from its three collaborators. No broker calls happen
    /// here; call [`Self::ensure_topology`] before taking traffic.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        registry: Arc<dyn SchemaRegistry>,
        config: BusConfig,
    ) -> Self {
        let validator = Arc::new(SchemaValidator::new(
            registry,
            config.schema_cache_capacity,
            config.validation_enabled,
        ));
        Self {
            broker,
            validator,
            metrics: Arc::new(BusMetrics::new()),
            config,
        }
    }

    /// Converges broker streams toward the configured topology.
    ///
    /// When this instance does not own topology management the call logs
    /// and returns without touching the broker. Any reconciliation failure
    /// is fatal; callers abort startup rather than run against an
    /// unconverged topology.
    pub async fn ensure_topology(&self) -> Result<(), SetupError> {
        if !self.config.manage_topology {
            info!("topology management disabled for this instance, skipping");
            return Ok(());
        }
        let desired = desired_streams(&self.config)?;
        let reconciler =
            StreamReconciler::new(Arc::clone(&self.broker), Arc::clone(&self.metrics));
        reconciler.ensure_all_streams(&desired).await?;
        Ok(())
    }

    /// A publisher sharing this bus's broker, validator, and metrics.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.validator),
            Arc::clone(&self.metrics),
        )
    }

    /// Spawns a pull-batch consumer loop for `topic`.
    pub async fn spawn_pull_consumer<H: EventHandler>(
        &self,
        topic: TopicName,
        subject: impl Into<String>,
        durable: DurableName,
        handler: H,
    ) -> Result<ConsumerHandle, SubscribeError> {
        spawn_pull_consumer(
            Arc::clone(&self.broker),
            Arc::clone(&self.validator),
            Arc::clone(&self.metrics),
            PullConsumerConfig {
                topic,
                subject: subject.into(),
                durable,
                pull: self.config.pull.clone(),
            },
            handler,
        )
        .await
    }

    /// Spawns a push-streaming consumer loop for `topic`, with lag sampling
    /// against `stream`.
    pub async fn spawn_push_consumer<H: EventHandler>(
        &self,
        topic: TopicName,
        subject: impl Into<String>,
        stream: StreamName,
        durable: DurableName,
        filter_subject: Option<String>,
        handler: H,
    ) -> Result<ConsumerHandle, SubscribeError> {
        spawn_push_consumer(
            Arc::clone(&self.broker),
            Arc::clone(&self.validator),
            Arc::clone(&self.metrics),
            PushConsumerConfig {
                topic,
                subject: subject.into(),
                stream,
                durable,
                filter_subject,
                lag_sample_interval: self.config.lag_sample_interval(),
            },
            handler,
        )
        .await
    }

    /// The live metrics surface.
    #[must_use]
    pub fn metrics(&self) -> Arc<BusMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Renders every metric in Prometheus text exposition format.
    #[must_use]
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }

    /// Hit/miss statistics for the compiled-schema cache.
    #[must_use]
    pub fn schema_cache_stats(&self) -> CacheStats {
        self.validator.cache_stats()
    }

    /// Drops every cached compiled schema; the next validation per topic
    /// re-resolves against the registry.
    pub fn reset_schema_cache(&self) {
        self.validator.reset_cache();
    }
}
