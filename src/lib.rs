//! Live telemetry pipeline: a fetch scheduler polls a JSON index, a snapshot
//! store keeps the latest point per key, a typed accessor reads it, and a
//! reconcile loop pushes changed values to bound readouts.
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
