//! Stream topology descriptors.
//!
//! A topology is the set of named persistent streams the platform expects to
//! exist on the broker, with their subject routing and retention rules. Two
//! modes select which descriptor set is active: `single` routes every
//! subject family into one combined stream, `multi` gives each family its
//! own stream.
//!
//! [`StreamSpec`] is the immutable desired state; [`StreamConfig`] is the
//! wire-facing create/update request derived from it, with the fields older
//! brokers may reject made optional so the reconciler can degrade them.

use crate::config::BusConfig;
use crate::types::StreamName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// Storage backing for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Messages are persisted to disk.
    File,
    /// Messages are held in broker memory.
    Memory,
}

/// Which messages a stream drops when its limits are exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Drop the oldest messages first.
    Old,
    /// Refuse new messages.
    New,
}

/// Which stream descriptor set is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyMode {
    /// One combined stream carrying every subject family.
    Single,
    /// One stream per logical family.
    Multi,
}

/// Errors from constructing a [`StreamSpec`].
#[derive(Debug, Clone, Error)]
pub enum TopologyError {
    /// A stream must match at least one subject pattern.
    #[error("Stream '{0}' has no subject patterns")]
    NoSubjects(StreamName),

    /// Replica counts start at one.
    #[error("Stream '{stream}' requested {replicas} replicas, minimum is 1")]
    InvalidReplicas {
        /// The offending stream.
        stream: StreamName,
        /// The requested replica count.
        replicas: u32,
    },

    /// A configured stream name failed identifier validation.
    #[error("Invalid stream name '{0}'")]
    InvalidName(String),
}

/// The desired configuration of one persistent stream.
///
/// Immutable once constructed; the constructor enforces that the subject
/// set is non-empty and the replica count is at least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    name: StreamName,
    subjects: BTreeSet<String>,
    max_age: Duration,
    replicas: u32,
    storage: StorageKind,
    discard: DiscardPolicy,
    duplicate_window: Duration,
    compression: bool,
}

impl StreamSpec {
    /// Creates a new stream spec, validating its invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: StreamName,
        subjects: BTreeSet<String>,
        max_age: Duration,
        replicas: u32,
        storage: StorageKind,
        discard: DiscardPolicy,
        duplicate_window: Duration,
        compression: bool,
    ) -> Result<Self, TopologyError> {
        if subjects.is_empty() {
            return Err(TopologyError::NoSubjects(name));
        }
        if replicas == 0 {
            return Err(TopologyError::InvalidReplicas {
                stream: name,
                replicas,
            });
        }
        Ok(Self {
            name,
            subjects,
            max_age,
            replicas,
            storage,
            discard,
            duplicate_window,
            compression,
        })
    }

    /// The stream's broker-side name.
    pub const fn name(&self) -> &StreamName {
        &self.name
    }

    /// The subject patterns routed into this stream.
    pub const fn subjects(&self) -> &BTreeSet<String> {
        &self.subjects
    }

    /// Maximum message age before retention drops it.
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Replica count.
    pub const fn replicas(&self) -> u32 {
        self.replicas
    }

    /// Storage backing.
    pub const fn storage(&self) -> StorageKind {
        self.storage
    }

    /// Discard order.
    pub const fn discard(&self) -> DiscardPolicy {
        self.discard
    }

    /// Broker deduplication window.
    pub const fn duplicate_window(&self) -> Duration {
        self.duplicate_window
    }

    /// Whether stream data is compressed at rest.
    pub const fn compression(&self) -> bool {
        self.compression
    }

    /// The full create/update request for this spec.
    pub fn to_config(&self) -> StreamConfig {
        StreamConfig {
            name: self.name.clone(),
            subjects: self.subjects.clone(),
            max_age: self.max_age,
            replicas: self.replicas,
            storage: self.storage,
            discard: Some(self.discard),
            duplicate_window: Some(self.duplicate_window),
            compression: self.compression,
        }
    }
}

/// A create/update request as handed to the broker client.
///
/// `discard` and `duplicate_window` are optional because older brokers
/// reject them; the reconciler's fallback ladder omits them in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// The stream's broker-side name.
    pub name: StreamName,
    /// Subject patterns routed into this stream.
    pub subjects: BTreeSet<String>,
    /// Maximum message age.
    pub max_age: Duration,
    /// Replica count.
    pub replicas: u32,
    /// Storage backing.
    pub storage: StorageKind,
    /// Discard order; `None` omits the field from the request.
    pub discard: Option<DiscardPolicy>,
    /// Deduplication window; `None` omits the field from the request.
    pub duplicate_window: Option<Duration>,
    /// Whether stream data is compressed at rest.
    pub compression: bool,
}

impl StreamConfig {
    /// Returns this request with the deduplication window omitted.
    #[must_use]
    pub fn without_duplicate_window(mut self) -> Self {
        self.duplicate_window = None;
        self
    }

    /// Returns this request with the discard policy omitted.
    #[must_use]
    pub fn without_discard(mut self) -> Self {
        self.discard = None;
        self
    }
}

/// The broker's reported current configuration for a stream.
///
/// Re-fetched on every reconciliation pass and never cached: the broker is
/// the source of truth for live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStreamInfo {
    /// Subject patterns currently routed into the stream.
    pub subjects: BTreeSet<String>,
    /// Current maximum message age.
    pub max_age: Duration,
    /// Current replica count.
    pub replicas: u32,
    /// Current storage backing.
    pub storage: StorageKind,
    /// Current discard order.
    pub discard: DiscardPolicy,
    /// Current deduplication window.
    pub duplicate_window: Duration,
    /// Whether the stream is currently compressed.
    pub compression: bool,
}

/// Builds the active descriptor set for the configured topology mode.
///
/// In `multi` mode each logical family becomes its own stream, taking the
/// family name unless overridden. In `single` mode one combined stream
/// carries the union of every family's subjects under the configured
/// single-stream name; parameters come from the defaults.
pub fn desired_streams(config: &BusConfig) -> Result<Vec<StreamSpec>, TopologyError> {
    let defaults = &config.stream_defaults;
    match config.topology_mode {
        TopologyMode::Multi => config
            .streams
            .iter()
            .map(|family| {
                let raw_name = family.name.as_ref().unwrap_or(&family.family);
                let name = StreamName::try_new(raw_name.clone())
                    .map_err(|_| TopologyError::InvalidName(raw_name.clone()))?;
                StreamSpec::new(
                    name,
                    family.subjects.iter().cloned().collect(),
                    Duration::from_millis(family.max_age_ms.unwrap_or(defaults.max_age_ms)),
                    family.replicas.unwrap_or(defaults.replicas),
                    family.storage.unwrap_or(defaults.storage),
                    family.discard.unwrap_or(defaults.discard),
                    Duration::from_millis(
                        family
                            .duplicate_window_ms
                            .unwrap_or(defaults.duplicate_window_ms),
                    ),
                    family.compression.unwrap_or(defaults.compression),
                )
            })
            .collect(),
        TopologyMode::Single => {
            let name = StreamName::try_new(config.single_stream_name.clone())
                .map_err(|_| TopologyError::InvalidName(config.single_stream_name.clone()))?;
            let subjects: BTreeSet<String> = config
                .streams
                .iter()
                .flat_map(|family| family.subjects.iter().cloned())
                .collect();
            let spec = StreamSpec::new(
                name,
                subjects,
                Duration::from_millis(defaults.max_age_ms),
                defaults.replicas,
                defaults.storage,
                defaults.discard,
                Duration::from_millis(defaults.duplicate_window_ms),
                defaults.compression,
            )?;
            Ok(vec![spec])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogicalStreamConfig;

    fn family(name: &str, subjects: &[&str]) -> LogicalStreamConfig {
        LogicalStreamConfig {
            family: name.to_string(),
            name: None,
            subjects: subjects.iter().map(ToString::to_string).collect(),
            max_age_ms: None,
            replicas: None,
            storage: None,
            discard: None,
            duplicate_window_ms: None,
            compression: None,
        }
    }

    fn spec(name: &str, subjects: &[&str]) -> StreamSpec {
        StreamSpec::new(
            StreamName::try_new(name).unwrap(),
            subjects.iter().map(ToString::to_string).collect(),
            Duration::from_secs(3600),
            1,
            StorageKind::File,
            DiscardPolicy::Old,
            Duration::from_secs(120),
            false,
        )
        .unwrap()
    }

    #[test]
    fn spec_rejects_empty_subjects() {
        let result = StreamSpec::new(
            StreamName::try_new("events").unwrap(),
            BTreeSet::new(),
            Duration::from_secs(1),
            1,
            StorageKind::File,
            DiscardPolicy::Old,
            Duration::from_secs(1),
            false,
        );
        assert!(matches!(result, Err(TopologyError::NoSubjects(_))));
    }

    #[test]
    fn spec_rejects_zero_replicas() {
        let result = StreamSpec::new(
            StreamName::try_new("events").unwrap(),
            ["events.>".to_string()].into_iter().collect(),
            Duration::from_secs(1),
            0,
            StorageKind::File,
            DiscardPolicy::Old,
            Duration::from_secs(1),
            false,
        );
        assert!(matches!(result, Err(TopologyError::InvalidReplicas { .. })));
    }

    #[test]
    fn full_config_carries_every_field() {
        let spec = spec("orders", &["orders.>"]);
        let config = spec.to_config();
        assert_eq!(config.discard, Some(DiscardPolicy::Old));
        assert_eq!(config.duplicate_window, Some(Duration::from_secs(120)));
        assert_eq!(config.subjects, *spec.subjects());
    }

    #[test]
    fn degraded_configs_drop_fields_in_order() {
        let config = spec("orders", &["orders.>"]).to_config();

        let first = config.clone().without_duplicate_window();
        assert_eq!(first.duplicate_window, None);
        assert_eq!(first.discard, Some(DiscardPolicy::Old));

        let second = first.without_discard();
        assert_eq!(second.duplicate_window, None);
        assert_eq!(second.discard, None);
    }

    #[test]
    fn multi_mode_yields_one_stream_per_family() {
        let config = BusConfig {
            streams: vec![
                family("orders", &["orders.>"]),
                family("payments", &["payments.>"]),
            ],
            ..BusConfig::default()
        };

        let specs = desired_streams(&config).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name().as_ref(), "orders");
        assert_eq!(specs[1].name().as_ref(), "payments");
    }

    #[test]
    fn multi_mode_applies_name_and_parameter_overrides() {
        let mut orders = family("orders", &["orders.>"]);
        orders.name = Some("ORDERS".to_string());
        orders.replicas = Some(3);
        orders.storage = Some(StorageKind::Memory);
        let config = BusConfig {
            streams: vec![orders],
            ..BusConfig::default()
        };

        let specs = desired_streams(&config).unwrap();
        assert_eq!(specs[0].name().as_ref(), "ORDERS");
        assert_eq!(specs[0].replicas(), 3);
        assert_eq!(specs[0].storage(), StorageKind::Memory);
    }

    #[test]
    fn single_mode_unions_all_subjects() {
        let config = BusConfig {
            topology_mode: TopologyMode::Single,
            streams: vec![
                family("orders", &["orders.>"]),
                family("payments", &["payments.>", "refunds.>"]),
            ],
            ..BusConfig::default()
        };

        let specs = desired_streams(&config).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name().as_ref(), "events");
        assert_eq!(specs[0].subjects().len(), 3);
        assert!(specs[0].subjects().contains("refunds.>"));
    }

    #[test]
    fn topology_mode_deserializes_lowercase() {
        assert_eq!(
            serde_json::from_str::<TopologyMode>("\"single\"").unwrap(),
            TopologyMode::Single
        );
        assert_eq!(
            serde_json::from_str::<StorageKind>("\"memory\"").unwrap(),
            StorageKind::Memory
        );
        assert_eq!(
            serde_json::from_str::<DiscardPolicy>("\"new\"").unwrap(),
            DiscardPolicy::New
        );
    }
}
