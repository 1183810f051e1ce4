//! Schema cache and payload validation.
//!
//! Schemas are JSON Schema documents resolved from an external registry,
//! compiled once, and held in a bounded cache keyed by topic. Eviction is
//! FIFO: the oldest-inserted entry goes first. This is deliberately not a
//! true recency-based LRU; the bound is what matters, and first-inserted
//! order keeps eviction predictable.
//!
//! Validation is a total function: malformed schemas, registry failures,
//! anything internal is reported as an invalid [`ValidationReport`], never
//! an error the caller has to handle separately.

use crate::types::TopicName;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// External schema registry collaborator: an opaque mapping from topic name
/// to JSON Schema document.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Looks up the schema registered for a topic, if any.
    ///
    /// Schema coverage is opt-in per topic; `None` means the topic is not
    /// validated.
    async fn lookup(&self, topic: &TopicName) -> Option<Value>;
}

/// The structured outcome of one validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Whether the payload passed.
    pub valid: bool,
    /// A summary message when invalid.
    pub message: Option<String>,
    /// One message per violated constraint, prefixed with the offending
    /// field path ("root" for document-level violations).
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// A passing report.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            valid: true,
            message: None,
            errors: Vec::new(),
        }
    }

    /// A failing report with a summary and per-constraint messages.
    #[must_use]
    pub fn failed(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            errors,
        }
    }
}

/// Cache introspection counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Number of compiled schemas currently held.
    pub size: usize,
    /// Cumulative lookup hits.
    pub hits: u64,
    /// Cumulative lookup misses.
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before any lookup.
    pub hit_rate: f64,
}

struct CacheInner {
    entries: HashMap<TopicName, Arc<jsonschema::Validator>>,
    insertion_order: VecDeque<TopicName>,
    hits: u64,
    misses: u64,
}

/// Bounded topic-to-compiled-schema cache with FIFO eviction.
///
/// Safe under concurrent access from multiple consumer loops validating
/// different topics at once.
pub struct SchemaCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl SchemaCache {
    /// Creates a cache bounded to `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
            capacity,
        }
    }

    /// Looks up the compiled schema for a topic, counting hit or miss.
    pub fn get(&self, topic: &TopicName) -> Option<Arc<jsonschema::Validator>> {
        let mut inner = self.inner.lock().ok()?;
        if let Some(schema) = inner.entries.get(topic).cloned() {
            inner.hits += 1;
            Some(schema)
        } else {
            inner.misses += 1;
            None
        }
    }

    /// Inserts a compiled schema, evicting the oldest-inserted entry when
    /// the cache is at capacity. A zero-capacity cache stores nothing.
    pub fn insert(&self, topic: TopicName, schema: Arc<jsonschema::Validator>) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut inner) = self.inner.lock() {
            if inner.entries.contains_key(&topic) {
                inner.entries.insert(topic, schema);
                return;
            }
            while inner.entries.len() >= self.capacity {
                if let Some(oldest) = inner.insertion_order.pop_front() {
                    inner.entries.remove(&oldest);
                } else {
                    break;
                }
            }
            inner.insertion_order.push_back(topic.clone());
            inner.entries.insert(topic, schema);
        }
    }

    /// Drops every cached schema. Hit/miss counters are preserved.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.insertion_order.clear();
        }
    }

    /// Current size and cumulative hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().map_or(
            CacheStats {
                size: 0,
                hits: 0,
                misses: 0,
                hit_rate: 0.0,
            },
            |inner| {
                let lookups = inner.hits + inner.misses;
                #[allow(clippy::cast_precision_loss)]
                let hit_rate = if lookups == 0 {
                    0.0
                } else {
                    inner.hits as f64 / lookups as f64
                };
                CacheStats {
                    size: inner.entries.len(),
                    hits: inner.hits,
                    misses: inner.misses,
                    hit_rate,
                }
            },
        )
    }
}

/// Validates payloads against their topic's registered schema.
pub struct SchemaValidator {
    registry: Arc<dyn SchemaRegistry>,
    cache: SchemaCache,
    enabled: bool,
}

impl SchemaValidator {
    /// Creates a validator backed by `registry` with a cache bounded to
    /// `cache_capacity` compiled schemas.
    pub fn new(registry: Arc<dyn SchemaRegistry>, cache_capacity: usize, enabled: bool) -> Self {
        Self {
            registry,
            cache: SchemaCache::new(cache_capacity),
            enabled,
        }
    }

    /// Validates `payload` against the schema registered for `topic`.
    ///
    /// Returns a passing report when validation is globally disabled or no
    /// schema is registered for the topic. Never fails: internal errors are
    /// reported through the report itself.
    pub async fn validate(&self, topic: &TopicName, payload: &Value) -> ValidationReport {
        if !self.enabled {
            return ValidationReport::ok();
        }

        let schema = match self.cache.get(topic) {
            Some(schema) => schema,
            None => match self.registry.lookup(topic).await {
                Some(document) => match jsonschema::validator_for(&document) {
                    Ok(compiled) => {
                        let compiled = Arc::new(compiled);
                        self.cache.insert(topic.clone(), Arc::clone(&compiled));
                        compiled
                    }
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "schema failed to compile");
                        return ValidationReport::failed(
                            format!("Schema for topic '{topic}' failed to compile: {e}"),
                            vec![format!("root: {e}")],
                        );
                    }
                },
                None => return ValidationReport::ok(),
            },
        };

        let errors: Vec<String> = schema
            .iter_errors(payload)
            .map(|error| {
                let path = error.instance_path.to_string();
                let field = if path.is_empty() { "root" } else { path.as_str() };
                format!("{field}: {error}")
            })
            .collect();

        if errors.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::failed(
                format!("Schema validation failed for topic '{topic}'"),
                errors,
            )
        }
    }

    /// Cache introspection: size, hits, misses, hit rate.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drops every cached compiled schema.
    pub fn reset_cache(&self) {
        self.cache.clear();
    }
}
