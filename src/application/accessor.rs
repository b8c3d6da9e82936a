// Typed accessor - Read-only typed view over the snapshot store
use crate::application::snapshot_store::SnapshotStore;
use crate::domain::data_point::DataPoint;
use std::borrow::Cow;
use std::sync::Arc;

/// Threshold under which a value reads as `false`.
const BOOLEAN_EPSILON: f64 = 1e-12;

/// Maps a requested key onto the key stored in the snapshot.
pub type KeyResolver = Arc<dyn Fn(&str) -> Cow<'_, str> + Send + Sync>;

fn verbatim(key: &str) -> Cow<'_, str> {
    Cow::Borrowed(key)
}

/// Typed reads over a [`SnapshotStore`].
///
/// Cheap to clone; every clone reads the same store. Keys are passed through
/// the resolver, which is the identity unless one is installed.
#[derive(Clone)]
pub struct Accessor {
    store: Arc<SnapshotStore>,
    resolve: KeyResolver,
}

impl Accessor {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            store,
            resolve: Arc::new(verbatim),
        }
    }

    pub fn with_key_resolver(mut self, resolve: KeyResolver) -> Self {
        self.resolve = resolve;
        self
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// True once at least one snapshot has been applied.
    pub fn is_ready(&self) -> bool {
        self.store.version() > 0
    }

    pub fn get_raw(&self, key: &str) -> Option<Arc<DataPoint>> {
        let key = (self.resolve)(key);
        let point = self.store.get(&key);
        tracing::trace!(target: "pipeline", key = %key, found = point.is_some(), "get_raw");
        point
    }

    /// NaN when missing.
    pub fn get_double(&self, key: &str) -> f64 {
        let key = (self.resolve)(key);
        let value = self.store.get_double(&key);
        tracing::trace!(target: "pipeline", key = %key, value, "get_double");
        value
    }

    /// Rounded value, halves toward positive infinity. Missing and NaN read as 0.
    pub fn get_int(&self, key: &str) -> i64 {
        let raw = self.get_double(key);
        if raw.is_nan() {
            0
        } else {
            (raw + 0.5).floor() as i64
        }
    }

    /// Nonzero is true; zero, NaN and missing are false.
    pub fn get_boolean(&self, key: &str) -> bool {
        let raw = self.get_double(key);
        !raw.is_nan() && raw.abs() > BOOLEAN_EPSILON
    }

    /// Text payload for `text` points, the decimal form of numeric points
    /// (see [`decimal_string`]), and an empty string for missing or NaN values.
    pub fn get_string(&self, key: &str) -> String {
        let Some(point) = self.get_raw(key) else {
            return String::new();
        };
        if point.is_text() {
            point.status.clone().unwrap_or_default()
        } else if point.value.is_nan() {
            String::new()
        } else {
            decimal_string(point.value)
        }
    }
}

/// Shortest round-trip decimal form with the JVM's `Double.toString` layout:
/// always a fractional digit (`42.0`), and `1.0E-6` style exponents outside
/// `[1e-3, 1e7)`.
pub fn decimal_string(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let magnitude = value.abs();
    if value == 0.0 || (1e-3..1e7).contains(&magnitude) {
        let plain = value.to_string();
        return if plain.contains('.') || plain.contains("NaN") {
            plain
        } else {
            format!("{plain}.0")
        };
    }

    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    if mantissa.contains('.') {
        format!("{mantissa}E{exponent}")
    } else {
        format!("{mantissa}.0E{exponent}")
    }
}
