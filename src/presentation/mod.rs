// Presentation layer - Diagnostics HTTP surface and console readouts
pub mod app_state;
pub mod console_readout;
pub mod handlers;
