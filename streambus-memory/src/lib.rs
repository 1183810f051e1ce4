//! In-memory adapters for `StreamBus`.
//!
//! [`InMemoryBroker`] implements the full [`BrokerClient`] contract against
//! process-local state: stream configurations, per-subject message queues
//! with delivery tracking, and consumer lag derived from queue state. It is
//! intended for tests and local development, not production traffic.
//!
//! Failure injection knobs let tests exercise the error paths a real broker
//! would produce: rejecting named configuration fields on create, and
//! failing publishes with a chosen error.
//!
//! [`StaticSchemaRegistry`] serves a fixed map of topic schemas.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use streambus::broker::{
    BrokerClient, ConsumerLag, InFlightMessage, PullSubscribeOptions, PullSubscription,
    PushSubscribeOptions,
};
use streambus::errors::{BrokerError, BrokerResult};
use streambus::schema::SchemaRegistry;
use streambus::topology::{DiscardPolicy, LiveStreamInfo, StreamConfig};
use streambus::types::{DurableName, StreamName, TopicName};

/// Delivery state of one stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Not yet handed to any consumer, or naked back for redelivery.
    Pending,
    /// Handed to a consumer and awaiting acknowledgment.
    InFlight,
    /// Acknowledged; never delivered again.
    Acked,
}

#[derive(Debug)]
struct Slot {
    payload: Arc<Vec<u8>>,
    delivery_count: u64,
    state: SlotState,
}

type SubjectSlots = Arc<Mutex<Vec<Slot>>>;

/// Matches a subject against a broker-style pattern, where `*` matches one
/// token and a trailing `>` matches the remainder.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), _) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A message handed out by the in-memory broker.
///
/// Acking marks the slot consumed; naking returns it to the pending state
/// with an incremented delivery count on its next fetch.
struct MemoryMessage {
    slots: SubjectSlots,
    index: usize,
    payload: Arc<Vec<u8>>,
    delivery_count: u64,
}

#[async_trait]
impl InFlightMessage for MemoryMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_count(&self) -> u64 {
        self.delivery_count
    }

    async fn ack(&self) -> BrokerResult<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| BrokerError::Unknown("queue lock poisoned".to_string()))?;
        if let Some(slot) = slots.get_mut(self.index) {
            slot.state = SlotState::Acked;
        }
        Ok(())
    }

    async fn nak(&self) -> BrokerResult<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| BrokerError::Unknown("queue lock poisoned".to_string()))?;
        if let Some(slot) = slots.get_mut(self.index) {
            slot.state = SlotState::Pending;
        }
        Ok(())
    }
}

type SubjectMap = Arc<RwLock<HashMap<String, SubjectSlots>>>;

/// Takes up to `max` pending messages across every subject matching
/// `pattern`, marking them in flight.
fn take_pending(
    subjects: &SubjectMap,
    pattern: &str,
    max: usize,
) -> Vec<Box<dyn InFlightMessage>> {
    let mut taken: Vec<Box<dyn InFlightMessage>> = Vec::new();
    let Ok(map) = subjects.read() else {
        return taken;
    };
    let mut matching: Vec<(&String, &SubjectSlots)> = map
        .iter()
        .filter(|(subject, _)| subject_matches(pattern, subject))
        .collect();
    matching.sort_by(|a, b| a.0.cmp(b.0));

    for (_, slots) in matching {
        if taken.len() >= max {
            break;
        }
        let Ok(mut guard) = slots.lock() else {
            continue;
        };
        for (index, slot) in guard.iter_mut().enumerate() {
            if taken.len() >= max {
                break;
            }
            if slot.state == SlotState::Pending {
                slot.state = SlotState::InFlight;
                slot.delivery_count += 1;
                taken.push(Box::new(MemoryMessage {
                    slots: Arc::clone(slots),
                    index,
                    payload: Arc::clone(&slot.payload),
                    delivery_count: slot.delivery_count,
                }));
            }
        }
    }
    taken
}

struct MemoryPullSubscription {
    subjects: SubjectMap,
    pattern: String,
}

#[async_trait]
impl PullSubscription for MemoryPullSubscription {
    async fn fetch(
        &self,
        max: usize,
        _expires: Duration,
    ) -> BrokerResult<Vec<Box<dyn InFlightMessage>>> {
        Ok(take_pending(&self.subjects, &self.pattern, max))
    }
}

#[derive(Default)]
struct Failures {
    rejected_fields: HashSet<String>,
    publish_error: Option<BrokerError>,
}

/// A process-local broker holding streams and messages in memory.
///
/// Cheap to clone; clones share all state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    streams: Arc<RwLock<HashMap<StreamName, StreamConfig>>>,
    subjects: SubjectMap,
    failures: Arc<RwLock<Failures>>,
    create_calls: Arc<AtomicU64>,
    update_calls: Arc<AtomicU64>,
    publish_calls: Arc<AtomicU64>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `create_stream` calls reject requests carrying the
    /// named optional field, as an older broker version would.
    ///
    /// Recognized fields: `duplicate_window`, `discard`.
    pub fn reject_config_field(&self, field: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.rejected_fields.insert(field.to_string());
        }
    }

    /// Makes subsequent `publish` calls fail with `error`.
    pub fn fail_publishes_with(&self, error: BrokerError) {
        if let Ok(mut failures) = self.failures.write() {
            failures.publish_error = Some(error);
        }
    }

    /// Clears every injected failure.
    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.write() {
            *failures = Failures::default();
        }
    }

    /// Number of `create_stream` calls observed.
    #[must_use]
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `update_stream` calls observed.
    #[must_use]
    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Number of `publish` calls observed, including failed ones.
    #[must_use]
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// The stored configuration for `name`, if the stream exists.
    #[must_use]
    pub fn stream_config(&self, name: &StreamName) -> Option<StreamConfig> {
        self.streams.read().ok()?.get(name).cloned()
    }

    fn rejected_field(&self, config: &StreamConfig) -> Option<String> {
        let failures = self.failures.read().ok()?;
        if config.duplicate_window.is_some()
            && failures.rejected_fields.contains("duplicate_window")
        {
            return Some("duplicate_window".to_string());
        }
        if config.discard.is_some() && failures.rejected_fields.contains("discard") {
            return Some("discard".to_string());
        }
        None
    }

    fn slots_for(&self, subject: &str) -> SubjectSlots {
        let mut map = self.subjects.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(subject.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Vec::new()))),
        )
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn get_stream_info(&self, name: &StreamName) -> BrokerResult<LiveStreamInfo> {
        let streams = self
            .streams
            .read()
            .map_err(|_| BrokerError::Unknown("stream lock poisoned".to_string()))?;
        let config = streams
            .get(name)
            .ok_or_else(|| BrokerError::StreamNotFound(name.clone()))?;
        Ok(LiveStreamInfo {
            subjects: config.subjects.clone(),
            max_age: config.max_age,
            replicas: config.replicas,
            storage: config.storage,
            // Omitted optional fields land on broker defaults.
            discard: config.discard.unwrap_or(DiscardPolicy::Old),
            duplicate_window: config.duplicate_window.unwrap_or(Duration::ZERO),
            compression: config.compression,
        })
    }

    async fn create_stream(&self, config: &StreamConfig) -> BrokerResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(field) = self.rejected_field(config) {
            return Err(BrokerError::InvalidStreamConfig { field });
        }
        let mut streams = self
            .streams
            .write()
            .map_err(|_| BrokerError::Unknown("stream lock poisoned".to_string()))?;
        streams.insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn update_stream(&self, config: &StreamConfig) -> BrokerResult<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut streams = self
            .streams
            .write()
            .map_err(|_| BrokerError::Unknown("stream lock poisoned".to_string()))?;
        if !streams.contains_key(&config.name) {
            return Err(BrokerError::StreamNotFound(config.name.clone()));
        }
        streams.insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BrokerResult<()> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(failures) = self.failures.read() {
            if let Some(error) = &failures.publish_error {
                return Err(error.clone());
            }
        }
        let slots = self.slots_for(subject);
        let mut guard = slots
            .lock()
            .map_err(|_| BrokerError::Unknown("queue lock poisoned".to_string()))?;
        guard.push(Slot {
            payload: Arc::new(payload),
            delivery_count: 0,
            state: SlotState::Pending,
        });
        Ok(())
    }

    async fn pull_subscribe(
        &self,
        subject: &str,
        _options: &PullSubscribeOptions,
    ) -> BrokerResult<Box<dyn PullSubscription>> {
        Ok(Box::new(MemoryPullSubscription {
            subjects: Arc::clone(&self.subjects),
            pattern: subject.to_string(),
        }))
    }

    async fn push_subscribe(
        &self,
        subject: &str,
        options: &PushSubscribeOptions,
    ) -> BrokerResult<BoxStream<'static, Box<dyn InFlightMessage>>> {
        let pattern = options
            .filter_subject
            .clone()
            .unwrap_or_else(|| subject.to_string());
        let subjects = Arc::clone(&self.subjects);
        // Polls for pending messages; a real broker pushes, but the
        // observable delivery order is the same.
        let stream = futures::stream::unfold((subjects, pattern), |(subjects, pattern)| async {
            loop {
                let mut taken = take_pending(&subjects, &pattern, 1);
                if let Some(message) = taken.pop() {
                    return Some((message, (subjects, pattern)));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        Ok(stream.boxed())
    }

    async fn consumer_info(
        &self,
        _stream: &StreamName,
        _durable: &DurableName,
    ) -> BrokerResult<ConsumerLag> {
        let map = self
            .subjects
            .read()
            .map_err(|_| BrokerError::Unknown("queue lock poisoned".to_string()))?;
        let mut pending = 0;
        let mut ack_pending = 0;
        for slots in map.values() {
            let Ok(guard) = slots.lock() else { continue };
            for slot in guard.iter() {
                match slot.state {
                    SlotState::Pending => pending += 1,
                    SlotState::InFlight => ack_pending += 1,
                    SlotState::Acked => {}
                }
            }
        }
        Ok(ConsumerLag {
            num_pending: pending,
            num_ack_pending: ack_pending,
        })
    }
}

/// A schema registry serving a fixed in-memory map.
#[derive(Clone, Default)]
pub struct StaticSchemaRegistry {
    schemas: Arc<RwLock<HashMap<TopicName, Value>>>,
}

impl StaticSchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the schema for `topic`.
    #[must_use]
    pub fn with_schema(self, topic: TopicName, schema: Value) -> Self {
        if let Ok(mut schemas) = self.schemas.write() {
            schemas.insert(topic, schema);
        }
        self
    }

    /// Adds or replaces the schema for `topic` on a shared registry.
    pub fn register(&self, topic: TopicName, schema: Value) {
        if let Ok(mut schemas) = self.schemas.write() {
            schemas.insert(topic, schema);
        }
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn lookup(&self, topic: &TopicName) -> Option<Value> {
        self.schemas.read().ok()?.get(topic).cloned()
    }
}
