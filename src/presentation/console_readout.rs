// Console readout - Logs every value pushed to a configured key
use crate::application::readout::{NumericSink, Readout, SinkError, StructuredSink, TextSink};
use crate::domain::data_point::DataPoint;
use crate::infrastructure::config::{ReadoutConfig, ReadoutKind};
use parking_lot::Mutex;

/// Headless readout. Exposes exactly one sink, picked by its configured kind.
pub struct ConsoleReadout {
    label: String,
    kind: ReadoutKind,
    last: Mutex<Option<String>>,
}

impl ConsoleReadout {
    pub fn new(key: &str, kind: ReadoutKind) -> Self {
        Self {
            label: format!("console:{}", key.trim()),
            kind,
            last: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ReadoutConfig) -> Self {
        Self::new(&config.key, config.kind)
    }

    /// Rendering of the most recent push.
    pub fn last(&self) -> Option<String> {
        self.last.lock().clone()
    }

    fn show(&self, rendered: String) {
        tracing::info!(target: "pipeline", "{} = {}", self.label, rendered);
        *self.last.lock() = Some(rendered);
    }
}

impl NumericSink for ConsoleReadout {
    fn set_value(&self, value: f64) -> Result<(), SinkError> {
        if value.is_nan() {
            self.show("--".to_string());
        } else {
            self.show(value.to_string());
        }
        Ok(())
    }
}

impl TextSink for ConsoleReadout {
    fn set_text(&self, text: &str) -> Result<(), SinkError> {
        self.show(format!("{:?}", text));
        Ok(())
    }
}

impl StructuredSink for ConsoleReadout {
    fn set_data_point(&self, point: Option<&DataPoint>) -> Result<(), SinkError> {
        match point {
            Some(point) => self.show(point.to_string()),
            None => self.show("<missing>".to_string()),
        }
        Ok(())
    }
}

impl Readout for ConsoleReadout {
    fn label(&self) -> &str {
        &self.label
    }

    fn numeric(&self) -> Option<&dyn NumericSink> {
        (self.kind == ReadoutKind::Numeric).then_some(self as &dyn NumericSink)
    }

    fn text(&self) -> Option<&dyn TextSink> {
        (self.kind == ReadoutKind::Text).then_some(self as &dyn TextSink)
    }

    fn structured(&self) -> Option<&dyn StructuredSink> {
        (self.kind == ReadoutKind::Raw).then_some(self as &dyn StructuredSink)
    }
}
