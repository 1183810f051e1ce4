//! Parsed configuration values consumed by the bus.
//!
//! Environment parsing and defaulting happen in an external loader; this
//! module only defines the already-parsed shapes. Durations are carried as
//! milliseconds in the serialized form and exposed as [`Duration`] values.

use crate::topology::{DiscardPolicy, StorageKind, TopologyMode};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration for an [`crate::bus::EventBus`] instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Whether payloads are schema-validated on publish and consume.
    pub validation_enabled: bool,
    /// Maximum number of compiled schemas held by the cache.
    pub schema_cache_capacity: usize,
    /// Which stream descriptor set is active.
    pub topology_mode: TopologyMode,
    /// Whether this process owns topology reconciliation. Deployments run
    /// exactly one instance with this enabled; the rest skip convergence.
    pub manage_topology: bool,
    /// Name of the combined stream in [`TopologyMode::Single`].
    pub single_stream_name: String,
    /// The logical stream families and their overrides.
    pub streams: Vec<LogicalStreamConfig>,
    /// Defaults applied where a family carries no override.
    pub stream_defaults: StreamDefaults,
    /// Fixed parameters for pull subscriptions.
    pub pull: PullConfig,
    /// How often push consumers sample broker lag.
    pub lag_sample_interval_ms: u64,
}

impl BusConfig {
    /// The lag sampling interval as a [`Duration`].
    #[must_use]
    pub const fn lag_sample_interval(&self) -> Duration {
        Duration::from_millis(self.lag_sample_interval_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            validation_enabled: true,
            schema_cache_capacity: 100,
            topology_mode: TopologyMode::Multi,
            manage_topology: true,
            single_stream_name: "events".to_string(),
            streams: Vec::new(),
            stream_defaults: StreamDefaults::default(),
            pull: PullConfig::default(),
            lag_sample_interval_ms: 10_000,
        }
    }
}

/// One logical stream family: a name plus the subjects it routes, with
/// optional per-family parameter overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct LogicalStreamConfig {
    /// The logical family name; doubles as the stream name unless overridden.
    pub family: String,
    /// Overrides the broker-side stream name for this family.
    #[serde(default)]
    pub name: Option<String>,
    /// Subject-matching patterns routed into this family.
    pub subjects: Vec<String>,
    /// Overrides [`StreamDefaults::max_age_ms`].
    #[serde(default)]
    pub max_age_ms: Option<u64>,
    /// Overrides [`StreamDefaults::replicas`].
    #[serde(default)]
    pub replicas: Option<u32>,
    /// Overrides [`StreamDefaults::storage`].
    #[serde(default)]
    pub storage: Option<StorageKind>,
    /// Overrides [`StreamDefaults::discard`].
    #[serde(default)]
    pub discard: Option<DiscardPolicy>,
    /// Overrides [`StreamDefaults::duplicate_window_ms`].
    #[serde(default)]
    pub duplicate_window_ms: Option<u64>,
    /// Overrides [`StreamDefaults::compression`].
    #[serde(default)]
    pub compression: Option<bool>,
}

/// Retention and placement defaults shared by all families.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamDefaults {
    /// Maximum message age before retention drops it.
    pub max_age_ms: u64,
    /// Replica count for each stream.
    pub replicas: u32,
    /// Storage backing for each stream.
    pub storage: StorageKind,
    /// Discard order when stream limits are exceeded.
    pub discard: DiscardPolicy,
    /// Broker deduplication window.
    pub duplicate_window_ms: u64,
    /// Whether stream data is compressed at rest.
    pub compression: bool,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            max_age_ms: 7 * 24 * 60 * 60 * 1000,
            replicas: 1,
            storage: StorageKind::File,
            discard: DiscardPolicy::Old,
            duplicate_window_ms: 120_000,
            compression: false,
        }
    }
}

/// Fixed fetch parameters for a pull subscription. These are configuration
/// constants, not dynamically tuned.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Maximum messages requested per fetch.
    pub batch_size: usize,
    /// Expiry on each fetch call, in milliseconds.
    pub fetch_expiry_ms: u64,
    /// Sleep after an empty fetch, in milliseconds.
    pub idle_sleep_ms: u64,
    /// Sleep after a failed fetch or batch iteration, in milliseconds.
    pub error_backoff_ms: u64,
}

impl PullConfig {
    /// The fetch expiry as a [`Duration`].
    #[must_use]
    pub const fn fetch_expiry(&self) -> Duration {
        Duration::from_millis(self.fetch_expiry_ms)
    }

    /// The idle sleep as a [`Duration`].
    #[must_use]
    pub const fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// The error backoff as a [`Duration`].
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            fetch_expiry_ms: 5_000,
            idle_sleep_ms: 1_000,
            error_backoff_ms: 5_000,
        }
    }
}
