use thiserror::Error;

/// Main error type for the fleet supervisor
#[derive(Error, Debug)]
pub enum FleetError {
    // Control-plane rejections (surfaced to the issuer)
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Emergency stop is active - start commands are blocked until cleared")]
    EmergencyActive,

    #[error("Safety interlock tripped: {0}")]
    SafetyTripped(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    // Persistence errors (absorbed by the control path, recorded in the audit trail)
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Validation errors
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Exchange collaborator errors
    #[error("Exchange error: {0}")]
    Exchange(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Whether this error is a rejection that must be reported to the
    /// issuer of a control command rather than absorbed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FleetError::UnknownWorker(_)
                | FleetError::EmergencyActive
                | FleetError::SafetyTripped(_)
                | FleetError::Unauthorized(_)
        )
    }

    /// Short machine-readable tag, used as the audit action for errors
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::UnknownWorker(_) => "unknown_worker",
            FleetError::EmergencyActive => "emergency_active",
            FleetError::SafetyTripped(_) => "safety_tripped",
            FleetError::Unauthorized(_) => "unauthorized",
            FleetError::Persistence(_) => "persistence_error",
            FleetError::ValidationRejected(_) => "validation_rejected",
            FleetError::Config(_) | FleetError::InvalidConfig(_) => "config_error",
            FleetError::Json(_) | FleetError::TomlDe(_) | FleetError::TomlSer(_) => {
                "serialization_error"
            }
            FleetError::Io(_) => "io_error",
            FleetError::Exchange(_) => "exchange_error",
            FleetError::Internal(_) | FleetError::Other(_) => "internal_error",
        }
    }
}
