//! End-to-end flows through an [`streambus::EventBus`] backed by the
//! in-memory broker.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streambus::{
    BusConfig, EventBus, EventHandler, HandlerError, LogicalStreamConfig, PublishError,
    PullConfig, DurableName, SchemaRegistry, StreamName, TopicName,
};
use streambus_memory::{InMemoryBroker, StaticSchemaRegistry};

/// Routes loop logs through the test writer; `RUST_LOG` filters as usual.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn topic(name: &str) -> TopicName {
    TopicName::try_new(name).unwrap()
}

fn durable(name: &str) -> DurableName {
    DurableName::try_new(name).unwrap()
}

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

fn fast_config(streams: Vec<LogicalStreamConfig>) -> BusConfig {
    BusConfig {
        streams,
        pull: PullConfig {
            batch_size: 10,
            fetch_expiry_ms: 50,
            idle_sleep_ms: 5,
            error_backoff_ms: 5,
        },
        lag_sample_interval_ms: 10,
        ..BusConfig::default()
    }
}

fn order_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "orderId": {"type": "string"},
            "value": {"type": "integer", "maximum": 100}
        },
        "required": ["orderId", "value"]
    })
}

#[derive(Debug, Deserialize)]
struct Order {
    #[serde(rename = "orderId")]
    order_id: String,
    value: i64,
}

/// Fails the first delivery of a chosen order, succeeds afterwards.
struct FlakyHandler {
    fail_once_on: String,
    failures_left: AtomicU64,
    handled: Arc<Mutex<Vec<(String, i64)>>>,
}

#[async_trait]
impl EventHandler for FlakyHandler {
    type Event = Order;

    async fn handle(&self, event: Order) -> Result<(), HandlerError> {
        if event.order_id == self.fail_once_on
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(HandlerError::Timeout("payment service".to_string()));
        }
        self.handled
            .lock()
            .unwrap()
            .push((event.order_id, event.value));
        Ok(())
    }
}

#[tokio::test]
async fn topology_converges_and_second_pass_is_idempotent() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let registry = Arc::new(StaticSchemaRegistry::new());
    let bus = EventBus::new(
        broker.clone(),
        registry,
        fast_config(vec![
            family("orders", &["orders.>"]),
            family("payments", &["payments.>"]),
        ]),
    );

    bus.ensure_topology().await.unwrap();
    assert_eq!(broker.create_calls(), 2);

    bus.ensure_topology().await.unwrap();
    assert_eq!(broker.create_calls(), 2);
    assert_eq!(broker.update_calls(), 0);
    assert_eq!(bus.metrics().reconcile.streams_unchanged.get(), 2);
}

#[tokio::test]
async fn old_broker_gets_a_degraded_stream_config() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    broker.reject_config_field("duplicate_window");
    let bus = EventBus::new(
        broker.clone(),
        Arc::new(StaticSchemaRegistry::new()),
        fast_config(vec![family("orders", &["orders.>"])]),
    );

    bus.ensure_topology().await.unwrap();

    let stored = broker
        .stream_config(&StreamName::try_new("orders").unwrap())
        .unwrap();
    assert!(stored.duplicate_window.is_none());
    assert!(stored.discard.is_some());
    assert_eq!(bus.metrics().reconcile.create_fallbacks.get(), 1);
}

#[tokio::test]
async fn schema_invalid_publish_never_reaches_the_broker() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let registry =
        Arc::new(StaticSchemaRegistry::new().with_schema(topic("orders.created"), order_schema()));
    let bus = EventBus::new(broker.clone(), registry, fast_config(Vec::new()));
    let publisher = bus.publisher();

    let err = publisher
        .publish(
            &topic("orders.created"),
            &json!({"orderId": "o-1", "value": 5000}),
            "orders.created",
        )
        .await
        .unwrap_err();

    let PublishError::ValidationFailed { errors, .. } = err else {
        panic!("expected validation failure");
    };
    assert!(errors.iter().any(|e| e.contains("value")));
    assert_eq!(broker.publish_calls(), 0);
    assert_eq!(bus.metrics().publish.rejected.get(), 1);
}

#[tokio::test]
async fn pull_consumer_processes_a_batch_and_redelivers_retryable_failures() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let registry =
        Arc::new(StaticSchemaRegistry::new().with_schema(topic("orders.created"), order_schema()));
    let bus = EventBus::new(
        broker.clone(),
        registry,
        fast_config(vec![family("orders", &["orders.>"])]),
    );
    bus.ensure_topology().await.unwrap();

    let publisher = bus.publisher();
    for (id, value) in [("o-1", 10), ("o-2", 20), ("o-3", 30)] {
        publisher
            .publish(
                &topic("orders.created"),
                &json!({"orderId": id, "value": value}),
                "orders.created",
            )
            .await
            .unwrap();
    }

    let handled = Arc::new(Mutex::new(Vec::new()));
    let handle = bus
        .spawn_pull_consumer(
            topic("orders.created"),
            "orders.created",
            durable("orders-worker"),
            FlakyHandler {
                fail_once_on: "o-2".to_string(),
                failures_left: AtomicU64::new(1),
                handled: Arc::clone(&handled),
            },
        )
        .await
        .unwrap();

    // o-2 fails once, is naked, and is handled on redelivery.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if handled.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all three orders handled");
    handle.stop().await;

    let mut seen: Vec<String> = handled
        .lock()
        .unwrap()
        .iter()
        .map(|(id, _)| id.clone())
        .collect();
    seen.sort();
    assert_eq!(seen, vec!["o-1", "o-2", "o-3"]);
    assert_eq!(bus.metrics().consume.processed.get(), 3);
    assert_eq!(bus.metrics().consume.naked.get(), 1);
}

#[tokio::test]
async fn push_consumer_samples_lag_and_renders_metrics() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let registry =
        Arc::new(StaticSchemaRegistry::new().with_schema(topic("orders.created"), order_schema()));
    let bus = EventBus::new(
        broker.clone(),
        registry,
        fast_config(vec![family("orders", &["orders.>"])]),
    );
    bus.ensure_topology().await.unwrap();

    bus.publisher()
        .publish(
            &topic("orders.created"),
            &json!({"orderId": "o-9", "value": 9}),
            "orders.created",
        )
        .await
        .unwrap();

    let handled = Arc::new(Mutex::new(Vec::new()));
    let handle = bus
        .spawn_push_consumer(
            topic("orders.created"),
            "orders.created",
            StreamName::try_new("orders").unwrap(),
            durable("orders-live"),
            None,
            FlakyHandler {
                fail_once_on: String::new(),
                failures_left: AtomicU64::new(0),
                handled: Arc::clone(&handled),
            },
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if bus.metrics().consume.processed.get() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("order handled");
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await;

    assert_eq!(handled.lock().unwrap().len(), 1);
    let rendered = bus.render_metrics();
    assert!(rendered.contains("streambus_consume_processed_total 1"));
    assert!(rendered.contains("streambus_consumer_lag{durable=\"orders-live\"}"));
}

// Multi-thread flavor: the consumer loop spins on instant nak redelivery,
// so the test body needs its own worker to observe the metrics.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumed_payload_failing_schema_is_naked_not_lost() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    // Registry starts empty so the bad payload publishes unvalidated.
    let registry = Arc::new(StaticSchemaRegistry::new());
    let bus = EventBus::new(
        broker.clone(),
        Arc::clone(&registry) as Arc<dyn SchemaRegistry>,
        fast_config(vec![family("orders", &["orders.>"])]),
    );
    bus.ensure_topology().await.unwrap();

    bus.publisher()
        .publish(
            &topic("orders.created"),
            &json!({"orderId": "o-1", "value": 5000}),
            "orders.created",
        )
        .await
        .unwrap();

    // The schema arrives before consumption; the consumer now rejects it.
    registry.register(topic("orders.created"), order_schema());

    let handled = Arc::new(Mutex::new(Vec::new()));
    let handle = bus
        .spawn_pull_consumer(
            topic("orders.created"),
            "orders.created",
            durable("orders-worker"),
            FlakyHandler {
                fail_once_on: String::new(),
                failures_left: AtomicU64::new(0),
                handled: Arc::clone(&handled),
            },
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if bus.metrics().consume.validation_failures.get() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("payload naked and redelivered");
    handle.stop().await;

    // Never handled, never acked away.
    assert!(handled.lock().unwrap().is_empty());
    assert_eq!(bus.metrics().consume.processed.get(), 0);
}
