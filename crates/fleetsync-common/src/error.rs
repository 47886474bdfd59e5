//! Error types shared across FleetSync crates

use thiserror::Error;

/// Result type alias for FleetSync operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that are not specific to a single subsystem
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidSetting { key: String, value: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl FleetError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        FleetError::Config(message.into())
    }

    /// Whether the error comes from configuration rather than runtime I/O
    pub fn is_config(&self) -> bool {
        matches!(self, FleetError::Config(_) | FleetError::InvalidSetting { .. })
    }
}
