// Domain layer - Telemetry data model and wire coercion
pub mod data_point;
