//! StreamBus: an event-bus layer over a persistent-stream broker.
//!
//! StreamBus sits between application code and a stream broker, adding the
//! platform conventions the broker itself does not enforce:
//!
//! - **Topology reconciliation**: declared streams are converged on the
//!   broker at startup, with a degraded-config fallback ladder for older
//!   broker versions ([`reconciler`]).
//! - **Schema-validated publishing**: payloads are validated against
//!   per-topic JSON Schemas before they reach the broker; invalid events
//!   fail closed ([`publisher`], [`schema`]).
//! - **Consumer loops**: pull-batch and push-streaming loops with a single
//!   acknowledgment discipline and retry classification for handler
//!   failures ([`pull_consumer`], [`push_consumer`], [`retry`]).
//! - **Metrics**: counters, gauges, and timers for every path, rendered in
//!   Prometheus text format ([`metrics`]).
//!
//! Everything hangs off an explicitly constructed [`EventBus`]; there is no
//! global instance.
//!
//! ```no_run
//! use std::sync::Arc;
//! use streambus::{BusConfig, EventBus};
//! # use streambus::{BrokerClient, SchemaRegistry};
//! # async fn example(broker: Arc<dyn BrokerClient>, registry: Arc<dyn SchemaRegistry>)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::new(broker, registry, BusConfig::default());
//! bus.ensure_topology().await?;
//!
//! let publisher = bus.publisher();
//! let topic = streambus::TopicName::try_new("orders.created")?;
//! publisher
//!     .publish(&topic, &serde_json::json!({"orderId": "o-1"}), "orders.created")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod metrics;
pub mod publisher;
pub mod pull_consumer;
pub mod push_consumer;
pub mod reconciler;
pub mod retry;
pub mod schema;
pub mod topology;
pub mod types;

pub use broker::{
    BrokerClient, ConsumerLag, InFlightMessage, PullSubscribeOptions, PullSubscription,
    PushSubscribeOptions,
};
pub use bus::EventBus;
pub use config::{BusConfig, LogicalStreamConfig, PullConfig, StreamDefaults};
pub use consumer::{ConsumerHandle, EventHandler};
pub use errors::{
    BrokerError, BrokerResult, PublishError, PublishResult, ReconcileError, ReconcileResult,
    SetupError, SubscribeError,
};
pub use metrics::BusMetrics;
pub use publisher::Publisher;
pub use pull_consumer::PullConsumerConfig;
pub use push_consumer::PushConsumerConfig;
pub use reconciler::StreamReconciler;
pub use retry::{HandlerError, RetryClass};
pub use schema::{CacheStats, SchemaCache, SchemaRegistry, SchemaValidator, ValidationReport};
pub use topology::{
    desired_streams, DiscardPolicy, LiveStreamInfo, StorageKind, StreamConfig, StreamSpec,
    TopologyError, TopologyMode,
};
pub use types::{DurableName, StreamName, TopicName};
