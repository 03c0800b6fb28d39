pub mod data;
pub mod security;
pub mod telemetry;
