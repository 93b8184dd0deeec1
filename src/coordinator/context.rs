use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::config::{AppConfig, SafetyConfig};
use crate::error::Result;
use crate::safety::SafetySupervisor;
use crate::services::FleetMetrics;

/// Process-wide collaborators, built once at startup and passed by
/// reference to every component that needs them.
#[derive(Clone)]
pub struct FleetContext {
    pub audit: Arc<AuditTrail>,
    pub safety: Arc<SafetySupervisor>,
    pub metrics: Arc<FleetMetrics>,
}

impl FleetContext {
    pub fn new(audit: Arc<AuditTrail>, safety_config: SafetyConfig) -> Self {
        let safety = Arc::new(SafetySupervisor::new(safety_config, audit.clone()));
        Self {
            audit,
            safety,
            metrics: Arc::new(FleetMetrics::new()),
        }
    }

    /// Context with a journal-backed audit trail
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let audit = Arc::new(AuditTrail::from_config(&config.audit)?);
        Ok(Self::new(audit, config.safety.clone()))
    }

    /// Context without any durable journal
    pub fn in_memory(safety_config: SafetyConfig) -> Self {
        Self::new(Arc::new(AuditTrail::in_memory(1_000)), safety_config)
    }
}
