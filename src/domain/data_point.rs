// Data point domain model and raw JSON coercion
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Kind marking a data point whose payload lives in `status`.
pub const TEXT_KIND: &str = "text";

const VALUE_ALIASES: [&str; 3] = ["v", "value", "val"];
const TIMESTAMP_ALIASES: [&str; 3] = ["ts", "t", "time"];
const KIND_ALIASES: [&str; 3] = ["type", "kind", "k"];
const STATUS_ALIASES: [&str; 2] = ["status", "s"];

/// One named telemetry value.
///
/// `value` is NaN when the producer sent something non-numeric. Equality is
/// structural and treats two NaN values as equal, so a repeated "missing"
/// reading compares equal to the previous one.
#[derive(Debug, Clone, Serialize)]
pub struct DataPoint {
    pub value: f64,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl DataPoint {
    pub fn new(value: f64, timestamp: i64) -> Self {
        Self {
            value,
            timestamp,
            kind: None,
            status: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Text data point: NaN value, kind `text`, payload carried in `status`.
    pub fn text(payload: impl Into<String>, timestamp: i64) -> Self {
        Self::new(f64::NAN, timestamp)
            .with_kind(TEXT_KIND)
            .with_status(payload)
    }

    pub fn is_text(&self) -> bool {
        self.kind.as_deref() == Some(TEXT_KIND)
    }

    /// Coerce one raw wire value into a data point.
    ///
    /// - number: `value = number`, stamped `now_ms`
    /// - object: fields read through their aliases (`v|value|val`,
    ///   `ts|t|time`, `type|kind|k`, `status|s`)
    /// - string or any other literal: text data point
    ///
    /// Returns `None` for `null`, which has no coercion path.
    pub fn from_json(raw: &Value, now_ms: i64) -> Option<Self> {
        match raw {
            Value::Null => None,
            Value::Number(number) => number.as_f64().map(|value| Self::new(value, now_ms)),
            Value::Object(fields) => Some(Self::from_fields(fields, now_ms)),
            other => Some(Self::text(stringify(other), now_ms)),
        }
    }

    fn from_fields(fields: &Map<String, Value>, now_ms: i64) -> Self {
        let value = first_present(fields, &VALUE_ALIASES)
            .map(number_or_nan)
            .unwrap_or(f64::NAN);
        let timestamp = first_present(fields, &TIMESTAMP_ALIASES)
            .and_then(as_millis)
            .unwrap_or(now_ms);

        Self {
            value,
            timestamp,
            kind: first_present(fields, &KIND_ALIASES).map(stringify),
            status: first_present(fields, &STATUS_ALIASES).map(stringify),
        }
    }
}

impl PartialEq for DataPoint {
    fn eq(&self, other: &Self) -> bool {
        same_number(self.value, other.value)
            && self.timestamp == other.timestamp
            && self.kind == other.kind
            && self.status == other.status
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value, self.timestamp)?;
        if let Some(kind) = &self.kind {
            write!(f, " kind={}", kind)?;
        }
        if let Some(status) = &self.status {
            write!(f, " status={}", status)?;
        }
        Ok(())
    }
}

/// Numeric identity: two NaNs are the same reading, otherwise bit equality
/// (so `0.0` and `-0.0` differ).
pub fn same_number(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn first_present<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .find(|value| !value.is_null())
}

fn number_or_nan(raw: &Value) -> f64 {
    match raw {
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => text.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn as_millis(raw: &Value) -> Option<i64> {
    let Value::Number(number) = raw else {
        return None;
    };
    number
        .as_i64()
        .or_else(|| number.as_f64().map(|ms| ms as i64))
}

fn stringify(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
