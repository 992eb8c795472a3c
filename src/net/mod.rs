pub mod aoi;
pub mod config_updates;
pub mod network_quality;
pub mod telemetry;
