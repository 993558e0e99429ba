//! Layered YAML configuration with a canonical provenance hash.
//!
//! Configuration is assembled from an ordered list of YAML files (base first,
//! most specific last).  Each layer is converted to JSON and folded onto the
//! previous ones; the merged tree is then emitted in a canonical text form
//! (object keys sorted, compact separators) and SHA-256 hashed so two
//! deployments can compare what they actually run with, independent of file
//! layout or key order.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

/// A fully assembled configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged tree, for pointer lookups.
    pub config_json: Value,
    /// Canonical text form: sorted keys, compact separators.
    pub canonical_json: String,
    /// SHA-256 of `canonical_json`, hex-encoded.
    pub config_hash: String,
}

/// Assemble a config from YAML layers, later files taking precedence.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in paths {
        merged = merge_layer(merged, read_layer(path)?);
    }

    let mut canonical = String::new();
    write_canonical(&merged, &mut canonical);

    let config_hash = hex::encode(Sha256::digest(canonical.as_bytes()));

    Ok(LoadedConfig {
        config_json: merged,
        canonical_json: canonical,
        config_hash,
    })
}

/// Parse one YAML file into a JSON tree.
fn read_layer(path: &str) -> Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("read config: {path}"))?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&text).with_context(|| format!("parse yaml: {path}"))?;
    serde_json::to_value(yaml).with_context(|| format!("yaml->json conversion failed: {path}"))
}

/// Fold `overlay` onto `base`, consuming both.
///
/// Two objects merge key by key; anything else (array, scalar, or a type
/// change between layers) is replaced wholesale by the overlay value.
fn merge_layer(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = match base_map.remove(&key) {
                    Some(base_value) => merge_layer(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Emit `value` as canonical JSON text: object keys in sorted order, compact
/// separators, leaves in serde_json's standard rendering.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, child)) in ordered.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
                out.push(':');
                write_canonical(child, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Null / Bool / Number / String already have one canonical rendering.
        leaf => out.push_str(&leaf.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Typed publisher settings
// ---------------------------------------------------------------------------

fn cfg_f64(v: &Value, ptr: &str) -> Option<f64> {
    v.pointer(ptr).and_then(|x| x.as_f64())
}

fn cfg_i64(v: &Value, ptr: &str) -> Option<i64> {
    v.pointer(ptr).and_then(|x| x.as_i64())
}

fn cfg_str<'a>(v: &'a Value, ptr: &str) -> Option<&'a str> {
    v.pointer(ptr).and_then(|x| x.as_str())
}

/// Publisher settings extracted from a loaded config.
///
/// Recognized keys (all optional; defaults in parentheses):
///
/// | Key | Effect |
/// |---|---|
/// | `/publisher/poll-interval-ms` | delay between empty scans (1000) |
/// | `/publisher/batch-size` | max rows claimed per scan (50) |
/// | `/publisher/publish-timeout-ms` | per-message ack deadline (10000) |
/// | `/publisher/claim-lease-secs` | stuck-PROCESSING reclamation age (60) |
/// | `/publisher/topic` | destination topic for staged events |
/// | `/publisher/retry/initial-interval-ms` | backoff base (1000) |
/// | `/publisher/retry/multiplier` | backoff growth factor (2.0) |
/// | `/publisher/retry/jitter-ms` | additive jitter upper bound (1000) |
/// | `/publisher/retry/max-interval-ms` | optional backoff ceiling (none) |
/// | `/publisher/retry/max-retries` | budget stamped on newly staged rows (5) |
/// | `/bus/bootstrap-servers` | Kafka bootstrap list (localhost:9092) |
///
/// `max-retries` governs rows at staging time; workers honor the budget
/// stored on each row.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub publish_timeout: Duration,
    pub claim_lease: Duration,
    pub topic: String,
    pub retry_initial_interval: Duration,
    pub retry_multiplier: f64,
    pub retry_jitter: Duration,
    pub retry_max_interval: Option<Duration>,
    pub max_retries: i32,
    pub bootstrap_servers: String,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 50,
            publish_timeout: Duration::from_millis(10_000),
            claim_lease: Duration::from_secs(60),
            topic: "transaction-events".to_string(),
            retry_initial_interval: Duration::from_millis(1000),
            retry_multiplier: 2.0,
            retry_jitter: Duration::from_millis(1000),
            retry_max_interval: None,
            max_retries: 5,
            bootstrap_servers: "localhost:9092".to_string(),
        }
    }
}

impl PublisherSettings {
    /// Read settings out of a merged config, falling back to defaults for
    /// absent keys.
    pub fn from_config(cfg: &Value) -> Self {
        let d = PublisherSettings::default();

        let millis = |ptr: &str, fallback: Duration| {
            cfg_i64(cfg, ptr)
                .map(|ms| Duration::from_millis(ms.max(0) as u64))
                .unwrap_or(fallback)
        };

        Self {
            poll_interval: millis("/publisher/poll-interval-ms", d.poll_interval),
            batch_size: cfg_i64(cfg, "/publisher/batch-size").unwrap_or(d.batch_size),
            publish_timeout: millis("/publisher/publish-timeout-ms", d.publish_timeout),
            claim_lease: cfg_i64(cfg, "/publisher/claim-lease-secs")
                .map(|s| Duration::from_secs(s.max(0) as u64))
                .unwrap_or(d.claim_lease),
            topic: cfg_str(cfg, "/publisher/topic").unwrap_or(&d.topic).to_string(),
            retry_initial_interval: millis(
                "/publisher/retry/initial-interval-ms",
                d.retry_initial_interval,
            ),
            retry_multiplier: cfg_f64(cfg, "/publisher/retry/multiplier")
                .unwrap_or(d.retry_multiplier),
            retry_jitter: millis("/publisher/retry/jitter-ms", d.retry_jitter),
            retry_max_interval: cfg_i64(cfg, "/publisher/retry/max-interval-ms")
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            max_retries: cfg_i64(cfg, "/publisher/retry/max-retries").unwrap_or(d.max_retries as i64)
                as i32,
            bootstrap_servers: cfg_str(cfg, "/bus/bootstrap-servers")
                .unwrap_or(&d.bootstrap_servers)
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let s = PublisherSettings::default();
        assert_eq!(s.poll_interval, Duration::from_secs(1));
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.publish_timeout, Duration::from_secs(10));
        assert_eq!(s.claim_lease, Duration::from_secs(60));
        assert_eq!(s.retry_multiplier, 2.0);
        assert_eq!(s.max_retries, 5);
        assert_eq!(s.topic, "transaction-events");
    }

    #[test]
    fn settings_read_from_config() {
        let cfg = json!({
            "publisher": {
                "poll-interval-ms": 250,
                "batch-size": 10,
                "publish-timeout-ms": 2000,
                "claim-lease-secs": 30,
                "topic": "ledger-events",
                "retry": {
                    "initial-interval-ms": 500,
                    "multiplier": 3.0,
                    "jitter-ms": 0,
                    "max-interval-ms": 60000,
                    "max-retries": 8
                }
            },
            "bus": { "bootstrap-servers": "kafka-1:9092,kafka-2:9092" }
        });

        let s = PublisherSettings::from_config(&cfg);
        assert_eq!(s.poll_interval, Duration::from_millis(250));
        assert_eq!(s.batch_size, 10);
        assert_eq!(s.publish_timeout, Duration::from_secs(2));
        assert_eq!(s.claim_lease, Duration::from_secs(30));
        assert_eq!(s.topic, "ledger-events");
        assert_eq!(s.retry_initial_interval, Duration::from_millis(500));
        assert_eq!(s.retry_multiplier, 3.0);
        assert_eq!(s.retry_jitter, Duration::ZERO);
        assert_eq!(s.retry_max_interval, Some(Duration::from_secs(60)));
        assert_eq!(s.max_retries, 8);
        assert_eq!(s.bootstrap_servers, "kafka-1:9092,kafka-2:9092");
    }

    #[test]
    fn absent_keys_fall_back_to_defaults() {
        let s = PublisherSettings::from_config(&json!({}));
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.bootstrap_servers, "localhost:9092");
    }

    #[test]
    fn merge_layer_overrides_scalars_and_keeps_siblings() {
        let base = json!({"a": {"x": 1, "y": 2}, "keep": true});
        let overlay = json!({"a": {"y": 3, "z": 4}});
        let merged = merge_layer(base, overlay);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 3, "z": 4}, "keep": true}));
    }

    #[test]
    fn merge_layer_replaces_arrays_wholesale() {
        let base = json!({"list": [1, 2, 3]});
        let overlay = json!({"list": [9]});
        assert_eq!(merge_layer(base, overlay), json!({"list": [9]}));
    }

    #[test]
    fn merge_layer_replaces_on_type_change() {
        let base = json!({"node": {"nested": 1}});
        let overlay = json!({"node": "flat"});
        assert_eq!(merge_layer(base, overlay), json!({"node": "flat"}));
    }

    #[test]
    fn canonical_text_sorts_keys_at_every_depth() {
        let v = json!({"b": {"d": 1, "c": [true, null]}, "a": "s"});
        let mut out = String::new();
        write_canonical(&v, &mut out);
        assert_eq!(out, r#"{"a":"s","b":{"c":[true,null],"d":1}}"#);
    }

    #[test]
    fn canonical_text_parses_back_to_the_same_tree() {
        let v = json!({"z": 1, "a": {"m": [1, 2], "k": "v"}});
        let mut out = String::new();
        write_canonical(&v, &mut out);
        let reparsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(reparsed, v);
    }

    #[test]
    fn layered_load_merges_and_hashes_stably() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let env = dir.path().join("env.yaml");

        let mut f = std::fs::File::create(&base).unwrap();
        writeln!(
            f,
            "publisher:\n  batch-size: 50\n  topic: transaction-events\nbus:\n  bootstrap-servers: localhost:9092"
        )
        .unwrap();
        let mut f = std::fs::File::create(&env).unwrap();
        writeln!(f, "publisher:\n  batch-size: 5").unwrap();

        let base_s = base.to_str().unwrap();
        let env_s = env.to_str().unwrap();

        let loaded = load_layered_yaml(&[base_s, env_s]).unwrap();
        let s = PublisherSettings::from_config(&loaded.config_json);
        // env layer overrides batch-size, base keeps topic.
        assert_eq!(s.batch_size, 5);
        assert_eq!(s.topic, "transaction-events");

        // Same inputs, same hash — and the hash is over the canonical text.
        let again = load_layered_yaml(&[base_s, env_s]).unwrap();
        assert_eq!(loaded.config_hash, again.config_hash);
        assert_eq!(
            loaded.config_hash,
            hex::encode(Sha256::digest(loaded.canonical_json.as_bytes()))
        );
    }
}
