// Binding reconciliation - Pushes changed values to bound readouts each frame
use crate::application::accessor::Accessor;
use crate::application::readout::{DispatchShape, Readout, SinkError};
use crate::domain::data_point::{same_number, DataPoint};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("empty bind key for {0}")]
    EmptyKey(String),
    #[error("{0} exposes no supported sink")]
    NoSupportedSink(String),
    #[error("{label} is already bound to {key}")]
    Duplicate { label: String, key: String },
}

/// Last value delivered to a readout, in the shape it was delivered.
#[derive(Debug, Clone)]
enum Pushed {
    Number(f64),
    Text(String),
    Point(Option<Arc<DataPoint>>),
}

impl Pushed {
    fn same_as(&self, other: &Pushed) -> bool {
        match (self, other) {
            (Pushed::Number(a), Pushed::Number(b)) => same_number(*a, *b),
            (Pushed::Text(a), Pushed::Text(b)) => a == b,
            (Pushed::Point(a), Pushed::Point(b)) => match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Why a binding left the active set.
#[derive(Debug)]
enum Unbind {
    Gone,
    Failed(SinkError),
}

struct Binding {
    readout: Weak<dyn Readout>,
    label: String,
    key: String,
    shape: DispatchShape,
    last: Mutex<Option<Pushed>>,
}

impl Binding {
    /// Pull the current value and push it if it changed. `Ok(true)` when a
    /// value was dispatched.
    fn update(&self, accessor: &Accessor) -> Result<bool, Unbind> {
        let readout = self.readout.upgrade().ok_or(Unbind::Gone)?;

        let candidate = match self.shape {
            DispatchShape::Numeric => Pushed::Number(accessor.get_double(&self.key)),
            DispatchShape::Text => Pushed::Text(accessor.get_string(&self.key)),
            DispatchShape::Structured => Pushed::Point(accessor.get_raw(&self.key)),
        };
        if self.last.lock().as_ref().is_some_and(|last| last.same_as(&candidate)) {
            return Ok(false);
        }

        dispatch(readout.as_ref(), &candidate).map_err(Unbind::Failed)?;
        *self.last.lock() = Some(candidate);
        Ok(true)
    }
}

fn dispatch(readout: &dyn Readout, value: &Pushed) -> Result<(), SinkError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), SinkError> {
        match value {
            Pushed::Number(value) => readout
                .numeric()
                .ok_or_else(|| SinkError::new("numeric sink withdrawn"))?
                .set_value(*value),
            Pushed::Text(text) => readout
                .text()
                .ok_or_else(|| SinkError::new("text sink withdrawn"))?
                .set_text(text),
            Pushed::Point(point) => readout
                .structured()
                .ok_or_else(|| SinkError::new("structured sink withdrawn"))?
                .set_data_point(point.as_deref()),
        }
    }));
    outcome.unwrap_or_else(|_| Err(SinkError::new("setter panicked")))
}

struct LoopInner {
    name: String,
    accessor: Accessor,
    frame: Duration,
    bindings: Mutex<Vec<Arc<Binding>>>,
    ticking: Mutex<()>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LoopInner {
    /// Setters run with only `ticking` held, so they may read or register
    /// bindings on this loop. They must not call `tick` themselves.
    fn tick(&self) -> usize {
        let _ticking = self.ticking.lock();
        let active = self.bindings.lock().clone();

        let mut dispatched = 0;
        let mut dropped = Vec::new();
        for binding in active {
            match binding.update(&self.accessor) {
                Ok(pushed) => dispatched += usize::from(pushed),
                Err(Unbind::Gone) => {
                    tracing::debug!(target: "pipeline", loop_name = %self.name, key = %binding.key, label = %binding.label, "readout gone, binding dropped");
                    dropped.push(binding);
                }
                Err(Unbind::Failed(e)) => {
                    tracing::warn!(target: "pipeline", loop_name = %self.name, key = %binding.key, label = %binding.label, error = %e, "readout failed, binding dropped");
                    dropped.push(binding);
                }
            }
        }

        if !dropped.is_empty() {
            self.bindings
                .lock()
                .retain(|binding| !dropped.iter().any(|gone| Arc::ptr_eq(binding, gone)));
        }
        dispatched
    }
}

/// Per-frame reconciliation between the snapshot and bound readouts.
///
/// Holds only weak references to readouts; a readout that has been dropped
/// is unbound on the next tick. Ticks are serialized, so a manual
/// [`tick`](Self::tick) never overlaps the periodic driver.
#[derive(Clone)]
pub struct ReconcileLoop {
    inner: Arc<LoopInner>,
}

impl ReconcileLoop {
    pub fn new(name: impl Into<String>, accessor: Accessor, frame: Duration) -> Self {
        assert!(!frame.is_zero(), "reconcile frame period must be non-zero");
        Self {
            inner: Arc::new(LoopInner {
                name: name.into(),
                accessor,
                frame,
                bindings: Mutex::new(Vec::new()),
                ticking: Mutex::new(()),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Bind `readout` to `key`, choosing its dispatch shape now.
    ///
    /// The loop keeps only a weak reference, so the caller must keep the
    /// readout alive for as long as it should receive values.
    pub fn register(&self, readout: Arc<dyn Readout>, key: &str) -> Result<DispatchShape, BindError> {
        let label = readout.label().to_string();
        let key = key.trim();
        if key.is_empty() {
            tracing::warn!(target: "pipeline", loop_name = %self.inner.name, label = %label, "skipped empty bind key");
            return Err(BindError::EmptyKey(label));
        }

        let Some(shape) = DispatchShape::resolve(readout.as_ref()) else {
            tracing::warn!(target: "pipeline", loop_name = %self.inner.name, label = %label, key, "readout has no supported sink");
            return Err(BindError::NoSupportedSink(label));
        };

        let weak = Arc::downgrade(&readout);
        let mut bindings = self.inner.bindings.lock();
        if bindings
            .iter()
            .any(|binding| binding.key == key && Weak::ptr_eq(&binding.readout, &weak))
        {
            return Err(BindError::Duplicate {
                label,
                key: key.to_string(),
            });
        }

        tracing::debug!(target: "pipeline", loop_name = %self.inner.name, label = %label, key, ?shape, "readout bound");
        bindings.push(Arc::new(Binding {
            readout: weak,
            label,
            key: key.to_string(),
            shape,
            last: Mutex::new(None),
        }));
        Ok(shape)
    }

    /// Run one reconciliation pass. Returns how many readouts received a value.
    pub fn tick(&self) -> usize {
        self.inner.tick()
    }

    /// Start the periodic driver when there is something to drive, stop it
    /// otherwise. Must be called from within a tokio runtime.
    pub fn ensure_running(&self) {
        if self.is_empty() {
            self.stop();
            return;
        }

        let mut driver = self.inner.driver.lock();
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let frame = self.inner.frame;
        *driver = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(frame);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.tick();
                if inner.bindings.lock().is_empty() {
                    tracing::debug!(target: "pipeline", loop_name = %inner.name, "no bindings left, driver idle");
                    break;
                }
            }
        }));
    }

    /// Halt future ticks. A dispatch already in progress completes.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.driver.lock().take() {
            handle.abort();
        }
    }

    /// Stop the driver and drop every binding.
    pub fn reset(&self) {
        self.stop();
        let cleared = {
            let mut bindings = self.inner.bindings.lock();
            let cleared = bindings.len();
            bindings.clear();
            cleared
        };
        tracing::debug!(target: "pipeline", loop_name = %self.inner.name, cleared, "bindings reset");
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .driver
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.inner.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bindings.lock().is_empty()
    }

    /// Keys of the active bindings, in registration order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .bindings
            .lock()
            .iter()
            .map(|binding| binding.key.clone())
            .collect()
    }
}
