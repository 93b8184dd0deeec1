pub mod metrics;

pub use metrics::FleetMetrics;
