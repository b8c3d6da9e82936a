// Application layer - Store, accessor, scheduling and reconciliation
pub mod accessor;
pub mod fetch_scheduler;
pub mod pipeline;
pub mod readout;
pub mod reconciler;
pub mod snapshot_source;
pub mod snapshot_store;
