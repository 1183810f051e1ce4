//! Declarative stream topology reconciliation.
//!
//! The reconciler converges the broker's live stream topology onto the
//! desired descriptor set before any publish or consume starts. It is
//! idempotent and safe to re-run on every process start: multiple service
//! instances may race to create the same stream, and a repeated run against
//! converged state issues no mutations at all.
//!
//! Creation uses a fallback ladder for brokers of older feature levels:
//! when the broker rejects a config field it does not understand, the
//! request is retried first without the deduplication window, then
//! additionally without the discard policy. Anything else is fatal.

use crate::broker::BrokerClient;
use crate::errors::{BrokerError, ReconcileError, ReconcileResult};
use crate::metrics::BusMetrics;
use crate::topology::{LiveStreamInfo, StreamSpec};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Converges broker stream topology onto a desired descriptor set.
pub struct StreamReconciler {
    broker: Arc<dyn BrokerClient>,
    metrics: Arc<BusMetrics>,
}

impl StreamReconciler {
    /// Creates a reconciler over the given broker client.
    pub fn new(broker: Arc<dyn BrokerClient>, metrics: Arc<BusMetrics>) -> Self {
        Self { broker, metrics }
    }

    /// Ensures every desired stream exists and matches, one at a time.
    ///
    /// Sequential by design: this runs once at startup and simplicity wins
    /// over parallel convergence. The first fatal error aborts the pass.
    pub async fn ensure_all_streams(&self, desired: &[StreamSpec]) -> ReconcileResult<()> {
        for spec in desired {
            self.ensure_stream(spec).await?;
        }
        Ok(())
    }

    /// Ensures one desired stream exists and matches its spec.
    pub async fn ensure_stream(&self, desired: &StreamSpec) -> ReconcileResult<()> {
        match self.broker.get_stream_info(desired.name()).await {
            Ok(live) => {
                if stream_needs_update(desired, &live) {
                    info!(stream = %desired.name(), "stream config drifted, updating");
                    self.broker
                        .update_stream(&desired.to_config())
                        .await
                        .map_err(|source| ReconcileError::Update {
                            stream: desired.name().clone(),
                            source,
                        })?;
                    self.metrics.reconcile.streams_updated.increment();
                } else {
                    debug!(stream = %desired.name(), "stream already matches desired config");
                    self.metrics.reconcile.streams_unchanged.increment();
                }
                Ok(())
            }
            Err(BrokerError::StreamNotFound(_)) => self.create_with_fallback(desired).await,
            Err(source) => Err(ReconcileError::Inspect {
                stream: desired.name().clone(),
                source,
            }),
        }
    }

    /// Creates a stream, degrading the config for older brokers.
    ///
    /// Ladder order: full config, then without the duplicate window, then
    /// additionally without the discard policy. Only an
    /// [`BrokerError::InvalidStreamConfig`] rejection advances the ladder.
    async fn create_with_fallback(&self, desired: &StreamSpec) -> ReconcileResult<()> {
        let full = desired.to_config();
        let attempts = [
            full.clone(),
            full.clone().without_duplicate_window(),
            full.without_duplicate_window().without_discard(),
        ];

        let mut last_error = None;
        for (step, config) in attempts.iter().enumerate() {
            if step > 0 {
                self.metrics.reconcile.create_fallbacks.increment();
                warn!(
                    stream = %desired.name(),
                    step,
                    "broker rejected stream config field, retrying degraded"
                );
            }
            match self.broker.create_stream(config).await {
                Ok(()) => {
                    info!(stream = %desired.name(), degraded = step > 0, "stream created");
                    self.metrics.reconcile.streams_created.increment();
                    return Ok(());
                }
                Err(err @ BrokerError::InvalidStreamConfig { .. }) => {
                    last_error = Some(err);
                }
                Err(source) => {
                    return Err(ReconcileError::Create {
                        stream: desired.name().clone(),
                        source,
                    });
                }
            }
        }

        Err(ReconcileError::Create {
            stream: desired.name().clone(),
            source: last_error
                .unwrap_or_else(|| BrokerError::Unknown("fallback ladder exhausted".to_string())),
        })
    }
}

/// Structural diff between a desired spec and the broker's live state.
///
/// Subjects compare as sets, ignoring order; everything else compares
/// directly in the units the broker reports.
#[must_use]
pub fn stream_needs_update(desired: &StreamSpec, live: &LiveStreamInfo) -> bool {
    *desired.subjects() != live.subjects
        || desired.max_age() != live.max_age
        || desired.replicas() != live.replicas
        || desired.storage() != live.storage
        || desired.discard() != live.discard
        || desired.duplicate_window() != live.duplicate_window
        || desired.compression() != live.compression
}
