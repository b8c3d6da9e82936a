// Snapshot store - Latest known data point per key
use crate::domain::data_point::{now_millis, DataPoint};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::Level;

/// Key reported to the change listener for multi-key batches.
pub const ALL_KEYS: &str = "*";

/// How an incoming batch is combined with what the store already holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Incoming keys overwrite, untouched keys persist.
    #[default]
    Additive,
    /// The store is cleared before the batch is written, so keys the backend
    /// stopped reporting disappear.
    StrictReplace,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("snapshot is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("snapshot top level is {0}, expected an object")]
    NotAnObject(&'static str),
    #[error("snapshot object is empty")]
    Empty,
    #[error("none of the {0} snapshot entries could be coerced")]
    NothingCoercible(usize),
}

pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Thread-safe key -> data point mapping with a monotonic version.
///
/// Writers are serialized. Under additive merge each key is published
/// individually, so a reader running during an apply may see part of the
/// incoming batch. Strict replace swaps the whole map at once. The version is
/// bumped only after every key of the batch is visible.
pub struct SnapshotStore {
    data: RwLock<HashMap<String, Arc<DataPoint>>>,
    version: AtomicU64,
    policy: MergePolicy,
    writer: Mutex<()>,
    on_change: RwLock<Option<ChangeListener>>,
}

impl SnapshotStore {
    pub fn new(policy: MergePolicy) -> Self {
        tracing::debug!(target: "pipeline", ?policy, "snapshot store constructed");
        Self {
            data: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            policy,
            writer: Mutex::new(()),
            on_change: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Number of successful applies so far; 0 means the store was never updated.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Listener called once per successful apply with the written key, or
    /// [`ALL_KEYS`] for a bulk batch. A panicking listener is logged and
    /// otherwise ignored.
    pub fn set_on_change(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_change.write() = Some(Arc::new(listener));
    }

    pub fn clear_on_change(&self) {
        *self.on_change.write() = None;
    }

    pub fn get(&self, key: &str) -> Option<Arc<DataPoint>> {
        self.data.read().get(key).cloned()
    }

    /// Numeric value of `key`, NaN when missing.
    pub fn get_double(&self, key: &str) -> f64 {
        self.data
            .read()
            .get(key)
            .map(|point| point.value)
            .unwrap_or(f64::NAN)
    }

    /// Sorted copy of the whole mapping.
    pub fn snapshot(&self) -> BTreeMap<String, Arc<DataPoint>> {
        self.data
            .read()
            .iter()
            .map(|(key, point)| (key.clone(), point.clone()))
            .collect()
    }

    /// Merge `incoming` into the store according to the policy.
    ///
    /// Returns the new version, or `None` when `incoming` is empty; an empty
    /// batch neither mutates the store nor bumps the version.
    pub fn apply_snapshot(&self, incoming: HashMap<String, DataPoint>) -> Option<u64> {
        if incoming.is_empty() {
            tracing::debug!(target: "pipeline", "empty snapshot ignored");
            return None;
        }

        let changed = match incoming.len() {
            1 => incoming.keys().next().cloned(),
            _ => None,
        };

        let version = {
            let _writer = self.writer.lock();

            match self.policy {
                MergePolicy::Additive => {
                    for (key, point) in incoming {
                        self.data.write().insert(key, Arc::new(point));
                    }
                }
                MergePolicy::StrictReplace => {
                    // Swap the whole map under one guard so keys present in
                    // both generations never read as missing.
                    let fresh: HashMap<_, _> = incoming
                        .into_iter()
                        .map(|(key, point)| (key, Arc::new(point)))
                        .collect();
                    *self.data.write() = fresh;
                }
            }

            let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
            self.log_applied(version);
            version
        };

        self.notify(changed.as_deref().unwrap_or(ALL_KEYS));
        Some(version)
    }

    /// Parse a raw JSON index and apply it.
    ///
    /// Failures are logged and leave the store untouched: parse errors,
    /// non-object payloads, empty objects, and objects where no entry could
    /// be coerced. Individual un-coercible entries are dropped from the batch.
    pub fn apply_snapshot_text(&self, raw: &str) -> Result<u64, IngestError> {
        match self.parse_snapshot(raw) {
            Ok(incoming) => self.apply_snapshot(incoming).ok_or(IngestError::Empty),
            Err(e) => {
                tracing::warn!(target: "pipeline", error = %e, bytes = raw.len(), "snapshot rejected");
                Err(e)
            }
        }
    }

    fn parse_snapshot(&self, raw: &str) -> Result<HashMap<String, DataPoint>, IngestError> {
        let entries = match serde_json::from_str::<Value>(raw)? {
            Value::Object(entries) => entries,
            other => return Err(IngestError::NotAnObject(json_type_name(&other))),
        };
        if entries.is_empty() {
            return Err(IngestError::Empty);
        }

        let total = entries.len();
        let now = now_millis();
        let mut incoming = HashMap::with_capacity(total);
        for (key, raw_value) in entries {
            match DataPoint::from_json(&raw_value, now) {
                Some(point) => {
                    incoming.insert(key, point);
                }
                None => {
                    tracing::debug!(target: "pipeline", key = %key, "dropping un-coercible entry");
                }
            }
        }

        if incoming.is_empty() {
            return Err(IngestError::NothingCoercible(total));
        }
        Ok(incoming)
    }

    fn notify(&self, key: &str) {
        let listener = self.on_change.read().clone();
        let Some(listener) = listener else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| listener(key))).is_err() {
            tracing::warn!(target: "pipeline", key, "change listener panicked");
        }
    }

    fn log_applied(&self, version: u64) {
        tracing::debug!(target: "pipeline", version, size = self.len(), "snapshot applied");
        if tracing::enabled!(target: "pipeline", Level::TRACE) {
            for (key, point) in self.snapshot() {
                tracing::trace!(target: "pipeline", "  {}={}", key, point);
            }
        }
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(MergePolicy::default())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn batch(entries: &[(&str, DataPoint)]) -> HashMap<String, DataPoint> {
        entries
            .iter()
            .map(|(key, point)| (key.to_string(), point.clone()))
            .collect()
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = SnapshotStore::default();
        assert_eq!(store.version(), 0);
        assert!(store.is_empty());
        assert!(store.get("missing").is_none());
        assert!(store.get_double("missing").is_nan());
    }

    #[test]
    fn test_apply_map_bumps_version_once() {
        let store = SnapshotStore::default();
        let incoming = batch(&[
            ("a", DataPoint::new(1.0, 10)),
            ("b", DataPoint::new(2.0, 20).with_kind("gauge")),
            ("c", DataPoint::text("OK", 30)),
        ]);

        assert_eq!(store.apply_snapshot(incoming.clone()), Some(1));
        assert_eq!(store.version(), 1);
        for (key, point) in &incoming {
            assert_eq!(store.get(key).as_deref(), Some(point));
        }
    }

    #[test]
    fn test_additive_merge_keeps_untouched_keys() {
        let store = SnapshotStore::new(MergePolicy::Additive);
        store.apply_snapshot(batch(&[("a", DataPoint::new(1.0, 1)), ("b", DataPoint::new(2.0, 1))]));
        store.apply_snapshot(batch(&[("a", DataPoint::new(5.0, 2))]));

        assert_eq!(store.version(), 2);
        assert_eq!(store.get_double("a"), 5.0);
        assert_eq!(store.get_double("b"), 2.0);
    }

    #[test]
    fn test_strict_replace_drops_unreported_keys() {
        let store = SnapshotStore::new(MergePolicy::StrictReplace);
        store.apply_snapshot(batch(&[("a", DataPoint::new(1.0, 1)), ("b", DataPoint::new(2.0, 1))]));
        store.apply_snapshot(batch(&[("a", DataPoint::new(5.0, 2))]));

        assert_eq!(store.get_double("a"), 5.0);
        assert!(store.get("b").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_map_skips_version_bump() {
        let store = SnapshotStore::default();
        store.apply_snapshot(batch(&[("a", DataPoint::new(1.0, 1))]));

        assert_eq!(store.apply_snapshot(HashMap::new()), None);
        assert_eq!(store.version(), 1);
        assert_eq!(store.get_double("a"), 1.0);
    }

    #[test]
    fn test_apply_text() {
        let store = SnapshotStore::default();
        let version = store
            .apply_snapshot_text(r#"{"current.value": 42, "mode": "AUTO", "temp": {"v": 21.5, "ts": 99}}"#)
            .unwrap();

        assert_eq!(version, 1);
        assert_eq!(store.get_double("current.value"), 42.0);
        assert_eq!(store.get("mode").unwrap().status.as_deref(), Some("AUTO"));
        assert_eq!(*store.get("temp").unwrap(), DataPoint::new(21.5, 99));
    }

    #[test]
    fn test_apply_text_drops_null_entries() {
        let store = SnapshotStore::default();
        store.apply_snapshot_text(r#"{"a": 1, "b": null}"#).unwrap();

        assert_eq!(store.get_double("a"), 1.0);
        assert!(store.get("b").is_none());
    }

    #[test]
    fn test_rejected_text_leaves_store_untouched() {
        let store = SnapshotStore::default();
        store.apply_snapshot_text(r#"{"a": 1}"#).unwrap();

        let cases = [
            r#"{"a": 2, "b": "#,
            "[1, 2, 3]",
            "{}",
            r#"{"a": null, "b": null}"#,
            "",
        ];
        for raw in cases {
            assert!(store.apply_snapshot_text(raw).is_err(), "accepted {raw:?}");
            assert_eq!(store.version(), 1);
            assert_eq!(store.get_double("a"), 1.0);
            assert_eq!(store.len(), 1);
        }
    }

    #[test]
    fn test_rejection_reasons() {
        let store = SnapshotStore::default();
        assert!(matches!(store.apply_snapshot_text("nope"), Err(IngestError::Parse(_))));
        assert!(matches!(
            store.apply_snapshot_text("42"),
            Err(IngestError::NotAnObject("a number"))
        ));
        assert!(matches!(store.apply_snapshot_text("{}"), Err(IngestError::Empty)));
        assert!(matches!(
            store.apply_snapshot_text(r#"{"x": null}"#),
            Err(IngestError::NothingCoercible(1))
        ));
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let store = SnapshotStore::default();
        store.apply_snapshot_text(r#"{"b": 2, "c": 3, "a": 1}"#).unwrap();

        let copy = store.snapshot();
        assert_eq!(copy.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        store.apply_snapshot_text(r#"{"d": 4}"#).unwrap();
        assert_eq!(copy.len(), 3);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_on_change_fires_after_apply() {
        let store = Arc::new(SnapshotStore::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let observer = store.clone();
        let sink = seen.clone();
        store.set_on_change(move |key| {
            sink.lock().push((key.to_string(), observer.version(), observer.get_double(key)));
        });

        store.apply_snapshot_text(r#"{"a": 7}"#).unwrap();
        store.apply_snapshot_text(r#"{"a": 8, "b": 9}"#).unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0], ("a".to_string(), 1, 7.0));
        assert_eq!(seen[1].0, ALL_KEYS);
        assert_eq!(seen[1].1, 2);
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_block_updates() {
        let store = SnapshotStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.set_on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("listener bug");
        });

        store.apply_snapshot_text(r#"{"a": 1}"#).unwrap();
        store.apply_snapshot_text(r#"{"a": 2}"#).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.version(), 2);
        assert_eq!(store.get_double("a"), 2.0);
    }

    #[test]
    fn test_reader_sees_monotonic_values() {
        let store = Arc::new(SnapshotStore::default());
        store.apply_snapshot(batch(&[("k", DataPoint::new(0.0, 0))]));

        let writer_store = store.clone();
        let writer = thread::spawn(move || {
            for i in 1..=500 {
                writer_store.apply_snapshot(batch(&[("k", DataPoint::new(i as f64, i))]));
            }
        });

        let mut last = 0.0;
        while !writer.is_finished() {
            let value = store.get_double("k");
            assert!(value >= last, "went backwards: {value} < {last}");
            last = value;
        }
        writer.join().unwrap();

        assert_eq!(store.get_double("k"), 500.0);
        assert_eq!(store.version(), 501);
    }

    #[test]
    fn test_strict_replace_never_hides_retained_keys() {
        let store = Arc::new(SnapshotStore::new(MergePolicy::StrictReplace));
        let keys: Vec<String> = (0..50).map(|i| format!("k{i}")).collect();
        let full = |i: i64| -> HashMap<String, DataPoint> {
            keys.iter()
                .map(|key| (key.clone(), DataPoint::new(i as f64, i)))
                .collect()
        };
        store.apply_snapshot(full(0));

        let writer_store = store.clone();
        let batches: Vec<_> = (1..=2000).map(full).collect();
        let writer = thread::spawn(move || {
            for batch in batches {
                writer_store.apply_snapshot(batch);
            }
        });

        let mut misses = 0;
        while !writer.is_finished() {
            if store.get("k0").is_none() || store.get("k49").is_none() {
                misses += 1;
            }
        }
        writer.join().unwrap();

        assert_eq!(misses, 0);
        assert_eq!(store.len(), 50);
        assert_eq!(store.version(), 2001);
    }
}
