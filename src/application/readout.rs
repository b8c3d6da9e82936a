// Readout capabilities - How a display accepts live values
use crate::domain::data_point::DataPoint;
use thiserror::Error;

/// A display refused or failed to take a value.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Accepts numeric readings. NaN means "no value".
pub trait NumericSink: Send + Sync {
    fn set_value(&self, value: f64) -> Result<(), SinkError>;
}

/// Accepts the textual form of a reading.
pub trait TextSink: Send + Sync {
    fn set_text(&self, text: &str) -> Result<(), SinkError>;
}

/// Accepts the whole data point, `None` when the key is missing.
pub trait StructuredSink: Send + Sync {
    fn set_data_point(&self, point: Option<&DataPoint>) -> Result<(), SinkError>;
}

/// A visual readout that can be bound to a snapshot key.
///
/// Implementors expose the sinks they support by overriding the matching
/// accessor; one is enough to take part in reconciliation.
pub trait Readout: Send + Sync {
    /// Name used in log lines.
    fn label(&self) -> &str;

    fn numeric(&self) -> Option<&dyn NumericSink> {
        None
    }

    fn text(&self) -> Option<&dyn TextSink> {
        None
    }

    fn structured(&self) -> Option<&dyn StructuredSink> {
        None
    }
}

/// Which sink a binding delivers through. Chosen once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchShape {
    Numeric,
    Text,
    Structured,
}

impl DispatchShape {
    /// Highest-priority sink the readout supports: numeric, then text, then
    /// structured.
    pub fn resolve(readout: &dyn Readout) -> Option<Self> {
        if readout.numeric().is_some() {
            Some(Self::Numeric)
        } else if readout.text().is_some() {
            Some(Self::Text)
        } else if readout.structured().is_some() {
            Some(Self::Structured)
        } else {
            None
        }
    }
}
