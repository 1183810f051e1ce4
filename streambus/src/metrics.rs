//! Observability counters for the bus.
//!
//! Metrics are a pure side channel: every recording path tolerates lock
//! failure and nothing here can affect the correctness of publish, consume,
//! or reconcile. Counters and gauges are grouped per subsystem under
//! [`BusMetrics`], which renders the whole surface in Prometheus text
//! exposition format for an external scraper.

use crate::types::{DurableName, TopicName};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Creates a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Adds one.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `amount`.
    pub fn increment_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Current-value gauge that can move in both directions.
#[derive(Debug, Default)]
pub struct Gauge {
    value: RwLock<f64>,
}

impl Gauge {
    /// Creates a gauge at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: RwLock::new(0.0),
        }
    }

    /// Sets the gauge.
    pub fn set(&self, value: f64) {
        if let Ok(mut v) = self.value.write() {
            *v = value;
        }
    }

    /// Current value.
    pub fn get(&self) -> f64 {
        self.value.read().map_or(0.0, |v| *v)
    }
}

/// Duration tracker keeping a bounded sample window.
#[derive(Debug, Default)]
pub struct Timer {
    samples: RwLock<Vec<Duration>>,
}

const MAX_TIMER_SAMPLES: usize = 1000;

impl Timer {
    /// Creates an empty timer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
        }
    }

    /// Records one duration, dropping the oldest samples past the window.
    pub fn record(&self, duration: Duration) {
        if let Ok(mut samples) = self.samples.write() {
            samples.push(duration);
            if samples.len() > MAX_TIMER_SAMPLES {
                let drain = samples.len() - MAX_TIMER_SAMPLES;
                samples.drain(0..drain);
            }
        }
    }

    /// Mean of the current sample window.
    pub fn mean(&self) -> Option<Duration> {
        let samples = self.samples.read().ok()?;
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / u32::try_from(samples.len()).unwrap_or(1))
    }

    /// Percentile of the current sample window.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let mut samples = self.samples.read().ok()?.clone();
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let index = ((samples.len() as f64 - 1.0) * p / 100.0).round() as usize;
        samples.get(index).copied()
    }
}

/// Per-topic labeled counter family.
#[derive(Debug, Default)]
pub struct TopicCounters {
    counters: RwLock<HashMap<TopicName, Counter>>,
}

impl TopicCounters {
    fn increment(&self, topic: &TopicName) {
        if let Ok(mut counters) = self.counters.write() {
            counters.entry(topic.clone()).or_default().increment();
        }
    }

    /// Value for one topic, zero if never recorded.
    pub fn get(&self, topic: &TopicName) -> u64 {
        self.counters
            .read()
            .ok()
            .and_then(|map| map.get(topic).map(Counter::get))
            .unwrap_or(0)
    }

    fn snapshot(&self) -> Vec<(TopicName, u64)> {
        self.counters.read().map_or_else(
            |_| Vec::new(),
            |map| {
                let mut pairs: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.get())).collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                pairs
            },
        )
    }
}

/// Publish-path metrics.
#[derive(Debug, Default)]
pub struct PublishMetrics {
    /// Events accepted by the broker.
    pub published: Counter,
    /// Events refused before the broker was called (schema rejection).
    pub rejected: Counter,
    /// Events the broker failed to accept.
    pub failed: Counter,
    /// End-to-end publish duration, validation included.
    pub publish_duration: Timer,
    /// Accepted events by topic.
    pub published_by_topic: TopicCounters,
    /// Rejections by topic.
    pub rejected_by_topic: TopicCounters,
    /// Broker-side failures by topic.
    pub failed_by_topic: TopicCounters,
}

impl PublishMetrics {
    /// Records an accepted publish.
    pub fn record_published(&self, topic: &TopicName, duration: Duration) {
        self.published.increment();
        self.published_by_topic.increment(topic);
        self.publish_duration.record(duration);
    }

    /// Records a schema rejection; the broker was never called.
    pub fn record_rejected(&self, topic: &TopicName) {
        self.rejected.increment();
        self.rejected_by_topic.increment(topic);
    }

    /// Records a broker-side publish failure.
    pub fn record_failed(&self, topic: &TopicName, duration: Duration) {
        self.failed.increment();
        self.failed_by_topic.increment(topic);
        self.publish_duration.record(duration);
    }
}

/// Consumer-loop metrics, shared by pull and push loops.
#[derive(Debug, Default)]
pub struct ConsumeMetrics {
    /// Messages whose handler completed successfully (acked).
    pub processed: Counter,
    /// Messages naked for redelivery (retryable failures, schema races).
    pub naked: Counter,
    /// Messages acked despite a permanent failure.
    pub permanent_failures: Counter,
    /// Payloads that failed to deserialize.
    pub deserialization_failures: Counter,
    /// Payloads that failed schema validation.
    pub validation_failures: Counter,
    /// Fetch/iteration machinery errors (not message failures).
    pub loop_errors: Counter,
    /// Handler execution duration.
    pub processing_duration: Timer,
    /// Successful messages by topic.
    pub processed_by_topic: TopicCounters,
    lag_by_durable: RwLock<HashMap<DurableName, Gauge>>,
    ack_pending_by_durable: RwLock<HashMap<DurableName, Gauge>>,
}

impl ConsumeMetrics {
    /// Records a successfully handled message.
    pub fn record_processed(&self, topic: &TopicName, duration: Duration) {
        self.processed.increment();
        self.processed_by_topic.increment(topic);
        self.processing_duration.record(duration);
    }

    /// Updates the lag gauges for a durable consumer.
    pub fn set_lag(&self, durable: &DurableName, pending: u64, ack_pending: u64) {
        #[allow(clippy::cast_precision_loss)]
        {
            if let Ok(mut gauges) = self.lag_by_durable.write() {
                gauges
                    .entry(durable.clone())
                    .or_default()
                    .set(pending as f64);
            }
            if let Ok(mut gauges) = self.ack_pending_by_durable.write() {
                gauges
                    .entry(durable.clone())
                    .or_default()
                    .set(ack_pending as f64);
            }
        }
    }

    /// Current lag gauge for a durable consumer.
    pub fn lag(&self, durable: &DurableName) -> f64 {
        self.lag_by_durable
            .read()
            .ok()
            .and_then(|map| map.get(durable).map(Gauge::get))
            .unwrap_or(0.0)
    }

    fn gauge_snapshot(map: &RwLock<HashMap<DurableName, Gauge>>) -> Vec<(DurableName, f64)> {
        map.read().map_or_else(
            |_| Vec::new(),
            |gauges| {
                let mut pairs: Vec<_> =
                    gauges.iter().map(|(k, v)| (k.clone(), v.get())).collect();
                pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));
                pairs
            },
        )
    }
}

/// Topology reconciliation metrics.
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    /// Streams created this process lifetime.
    pub streams_created: Counter,
    /// Streams updated after drift was detected.
    pub streams_updated: Counter,
    /// Streams already matching their desired spec.
    pub streams_unchanged: Counter,
    /// Degraded-config creation attempts (fallback ladder steps taken).
    pub create_fallbacks: Counter,
}

/// The full metrics surface for one bus instance.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Publish-path counters.
    pub publish: PublishMetrics,
    /// Consumer-loop counters and lag gauges.
    pub consume: ConsumeMetrics,
    /// Reconciliation counters.
    pub reconcile: ReconcileMetrics,
}

impl BusMetrics {
    /// Creates a fresh metrics surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders every metric in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, u64); 10] = [
            (
                "streambus_publish_success_total",
                "Events accepted by the broker",
                self.publish.published.get(),
            ),
            (
                "streambus_publish_rejected_total",
                "Events refused by schema validation",
                self.publish.rejected.get(),
            ),
            (
                "streambus_publish_failed_total",
                "Events the broker failed to accept",
                self.publish.failed.get(),
            ),
            (
                "streambus_consume_processed_total",
                "Messages handled successfully",
                self.consume.processed.get(),
            ),
            (
                "streambus_consume_naked_total",
                "Messages naked for redelivery",
                self.consume.naked.get(),
            ),
            (
                "streambus_consume_permanent_failures_total",
                "Messages acked despite permanent failure",
                self.consume.permanent_failures.get(),
            ),
            (
                "streambus_consume_deserialization_failures_total",
                "Payloads that failed to deserialize",
                self.consume.deserialization_failures.get(),
            ),
            (
                "streambus_consume_validation_failures_total",
                "Payloads that failed schema validation",
                self.consume.validation_failures.get(),
            ),
            (
                "streambus_consume_loop_errors_total",
                "Fetch or iteration machinery errors",
                self.consume.loop_errors.get(),
            ),
            (
                "streambus_reconcile_fallbacks_total",
                "Degraded-config stream creation attempts",
                self.reconcile.create_fallbacks.get(),
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }

        let _ = writeln!(
            out,
            "# HELP streambus_publish_by_topic_total Accepted events by topic"
        );
        let _ = writeln!(out, "# TYPE streambus_publish_by_topic_total counter");
        for (topic, value) in self.publish.published_by_topic.snapshot() {
            let _ = writeln!(
                out,
                "streambus_publish_by_topic_total{{topic=\"{topic}\"}} {value}"
            );
        }

        let _ = writeln!(
            out,
            "# HELP streambus_consume_by_topic_total Handled messages by topic"
        );
        let _ = writeln!(out, "# TYPE streambus_consume_by_topic_total counter");
        for (topic, value) in self.consume.processed_by_topic.snapshot() {
            let _ = writeln!(
                out,
                "streambus_consume_by_topic_total{{topic=\"{topic}\"}} {value}"
            );
        }

        let _ = writeln!(
            out,
            "# HELP streambus_consumer_lag Messages not yet delivered, by durable"
        );
        let _ = writeln!(out, "# TYPE streambus_consumer_lag gauge");
        for (durable, value) in ConsumeMetrics::gauge_snapshot(&self.consume.lag_by_durable) {
            let _ = writeln!(out, "streambus_consumer_lag{{durable=\"{durable}\"}} {value}");
        }

        let _ = writeln!(
            out,
            "# HELP streambus_consumer_ack_pending Delivered but unacknowledged, by durable"
        );
        let _ = writeln!(out, "# TYPE streambus_consumer_ack_pending gauge");
        for (durable, value) in
            ConsumeMetrics::gauge_snapshot(&self.consume.ack_pending_by_durable)
        {
            let _ = writeln!(
                out,
                "streambus_consumer_ack_pending{{durable=\"{durable}\"}} {value}"
            );
        }

        let reconcile_counters = [
            (
                "streambus_streams_created_total",
                self.reconcile.streams_created.get(),
            ),
            (
                "streambus_streams_updated_total",
                self.reconcile.streams_updated.get(),
            ),
            (
                "streambus_streams_unchanged_total",
                self.reconcile.streams_unchanged.get(),
            ),
        ];
        for (name, value) in reconcile_counters {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }

        let timers = [
            (
                "streambus_publish_duration_seconds",
                "End-to-end publish duration, validation included",
                &self.publish.publish_duration,
            ),
            (
                "streambus_consume_processing_duration_seconds",
                "Handler execution duration",
                &self.consume.processing_duration,
            ),
        ];
        for (name, help, timer) in timers {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} gauge");
            let stats = [
                ("mean", timer.mean()),
                ("p95", timer.percentile(95.0)),
                ("p99", timer.percentile(99.0)),
            ];
            for (stat, value) in stats {
                if let Some(duration) = value {
                    let _ = writeln!(
                        out,
                        "{name}{{stat=\"{stat}\"}} {}",
                        duration.as_secs_f64()
                    );
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str) -> TopicName {
        TopicName::try_new(name).unwrap()
    }

    #[test]
    fn counter_increments() {
        let counter = Counter::new();
        counter.increment();
        counter.increment_by(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn gauge_sets_and_reads() {
        let gauge = Gauge::new();
        assert!((gauge.get() - 0.0).abs() < f64::EPSILON);
        gauge.set(12.5);
        assert!((gauge.get() - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn timer_computes_mean_and_percentiles() {
        let timer = Timer::new();
        for i in 1..=100 {
            timer.record(Duration::from_millis(i));
        }
        assert_eq!(timer.mean().unwrap(), Duration::from_micros(50_500));
        let p95 = timer.percentile(95.0).unwrap();
        assert!(p95.as_millis() >= 94 && p95.as_millis() <= 96);
    }

    #[test]
    fn timer_bounds_sample_window() {
        let timer = Timer::new();
        for i in 1..=1500 {
            timer.record(Duration::from_millis(i));
        }
        // Oldest samples dropped; mean reflects the newest 1000.
        assert!(timer.mean().unwrap() > Duration::from_millis(500));
    }

    #[test]
    fn publish_metrics_record_outcomes() {
        let metrics = PublishMetrics::default();
        let t = topic("orders");

        metrics.record_published(&t, Duration::from_millis(3));
        metrics.record_rejected(&t);
        metrics.record_failed(&t, Duration::from_millis(9));

        assert_eq!(metrics.published.get(), 1);
        assert_eq!(metrics.rejected.get(), 1);
        assert_eq!(metrics.failed.get(), 1);
        assert_eq!(metrics.published_by_topic.get(&t), 1);
        assert_eq!(metrics.rejected_by_topic.get(&t), 1);
    }

    #[test]
    fn consume_metrics_track_lag_per_durable() {
        let metrics = ConsumeMetrics::default();
        let durable = DurableName::try_new("orders-worker").unwrap();

        metrics.set_lag(&durable, 42, 7);
        assert!((metrics.lag(&durable) - 42.0).abs() < f64::EPSILON);

        metrics.set_lag(&durable, 0, 0);
        assert!((metrics.lag(&durable) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn render_produces_prometheus_text() {
        let metrics = BusMetrics::new();
        let t = topic("orders");
        let durable = DurableName::try_new("orders-worker").unwrap();

        metrics.publish.record_published(&t, Duration::from_millis(1));
        metrics.consume.record_processed(&t, Duration::from_millis(1));
        metrics.consume.set_lag(&durable, 5, 2);
        metrics.reconcile.streams_created.increment();

        let rendered = metrics.render();
        assert!(rendered.contains("# TYPE streambus_publish_success_total counter"));
        assert!(rendered.contains("streambus_publish_success_total 1"));
        assert!(rendered.contains("streambus_publish_by_topic_total{topic=\"orders\"} 1"));
        assert!(rendered.contains("streambus_consumer_lag{durable=\"orders-worker\"} 5"));
        assert!(rendered.contains("streambus_consumer_ack_pending{durable=\"orders-worker\"} 2"));
        assert!(rendered.contains("streambus_streams_created_total 1"));
        assert!(rendered.contains("streambus_publish_duration_seconds{stat=\"mean\"} 0.001"));
        assert!(rendered.contains("streambus_consume_processing_duration_seconds{stat=\"p99\"}"));
    }

    #[test]
    fn render_omits_duration_lines_before_any_sample() {
        let rendered = BusMetrics::new().render();
        assert!(rendered.contains("# TYPE streambus_publish_duration_seconds gauge"));
        assert!(!rendered.contains("streambus_publish_duration_seconds{"));
    }
}
