//! Broker client abstraction.
//!
//! This module defines the port interface the core needs from the message
//! broker: stream CRUD, publish, and pull/push subscribe primitives with
//! acknowledgment tokens. Wire transport and connection management live
//! entirely behind these traits; implementations are expected to be
//! thread-safe and shared across every loop and the publisher.

use crate::errors::BrokerResult;
use crate::topology::{LiveStreamInfo, StreamConfig};
use crate::types::{DurableName, StreamName};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// One broker-delivered message during consumer processing.
///
/// Created by the broker client per delivery and terminated by exactly one
/// of [`ack`](Self::ack)/[`nak`](Self::nak); the consumer loops guarantee
/// that discipline on every code path.
#[async_trait]
pub trait InFlightMessage: Send + Sync {
    /// The opaque payload bytes.
    fn payload(&self) -> &[u8];

    /// How many times this message has been delivered, starting at 1.
    fn delivery_count(&self) -> u64;

    /// Positively acknowledges the message, removing it from redelivery.
    async fn ack(&self) -> BrokerResult<()>;

    /// Negatively acknowledges the message, requesting redelivery per the
    /// broker's own backoff policy.
    async fn nak(&self) -> BrokerResult<()>;
}

/// A pull subscription bound to a durable consumer.
#[async_trait]
pub trait PullSubscription: Send + Sync {
    /// Fetches up to `max` undelivered messages, waiting at most `expires`.
    ///
    /// An empty result is normal and means no messages were available
    /// within the expiry.
    async fn fetch(
        &self,
        max: usize,
        expires: Duration,
    ) -> BrokerResult<Vec<Box<dyn InFlightMessage>>>;
}

/// Options for establishing a pull subscription.
#[derive(Debug, Clone)]
pub struct PullSubscribeOptions {
    /// The durable consumer to bind.
    pub durable: DurableName,
}

/// Options for establishing a push subscription.
#[derive(Debug, Clone)]
pub struct PushSubscribeOptions {
    /// The durable consumer to bind.
    pub durable: DurableName,
    /// Narrows delivery to this subject within the subscribed stream.
    pub filter_subject: Option<String>,
}

/// Broker-reported consumer progress, used for lag sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerLag {
    /// Messages not yet delivered to the consumer.
    pub num_pending: u64,
    /// Messages delivered but not yet acknowledged.
    pub num_ack_pending: u64,
}

/// The port interface to the persistent-stream broker.
///
/// Implementations map their transport's native failures onto the
/// [`crate::errors::BrokerError`] taxonomy; in particular `get_stream_info`
/// must return [`crate::errors::BrokerError::StreamNotFound`] for a missing
/// stream, and `create_stream` must return
/// [`crate::errors::BrokerError::InvalidStreamConfig`] when the broker does
/// not understand a config field.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetches the live configuration of a stream.
    async fn get_stream_info(&self, name: &StreamName) -> BrokerResult<LiveStreamInfo>;

    /// Creates a stream with the given configuration.
    async fn create_stream(&self, config: &StreamConfig) -> BrokerResult<()>;

    /// Replaces a stream's configuration.
    async fn update_stream(&self, config: &StreamConfig) -> BrokerResult<()>;

    /// Publishes serialized bytes to a wire subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BrokerResult<()>;

    /// Opens a pull subscription on a subject.
    async fn pull_subscribe(
        &self,
        subject: &str,
        options: &PullSubscribeOptions,
    ) -> BrokerResult<Box<dyn PullSubscription>>;

    /// Opens a push subscription: a broker-driven delivery stream with
    /// explicit acknowledgment.
    async fn push_subscribe(
        &self,
        subject: &str,
        options: &PushSubscribeOptions,
    ) -> BrokerResult<BoxStream<'static, Box<dyn InFlightMessage>>>;

    /// Fetches progress counters for a durable consumer.
    async fn consumer_info(
        &self,
        stream: &StreamName,
        durable: &DurableName,
    ) -> BrokerResult<ConsumerLag>;
}
