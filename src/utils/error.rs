use crate::domain::model::PlatformPosition;
use thiserror::Error;

/// Failure reported by a hardware collaborator (platform stepper, lane bank, load cell).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("{device} fault: {message}")]
    Fault { device: String, message: String },

    #[error("{device} target out of range: {target}")]
    OutOfRange { device: String, target: String },

    #[error("{device} has no known position, homing required")]
    NotHomed { device: String },
}

impl ActuatorError {
    pub fn fault(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault {
            device: device.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DispenseError {
    #[error("Platform failed to reach {target}: {source}")]
    Movement {
        target: PlatformPosition,
        #[source]
        source: ActuatorError,
    },

    #[error("Hardware error: {0}")]
    Hardware(#[from] ActuatorError),

    #[error("Invalid order ({field}): {reason}")]
    InvalidOrder { field: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Hardware,
    Order,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DispenseError {
    pub fn invalid_order(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Movement { .. } | Self::Hardware(_) => ErrorCategory::Hardware,
            Self::InvalidOrder { .. } => ErrorCategory::Order,
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Movement { .. } => ErrorSeverity::Critical,
            Self::Hardware(_) => ErrorSeverity::High,
            Self::InvalidOrder { .. } => ErrorSeverity::Medium,
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorSeverity::High,
            Self::IoError(_) | Self::SerializationError(_) => ErrorSeverity::High,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Movement { target, .. } => {
                format!("The platform could not move to {}. The order was stopped.", target)
            }
            Self::Hardware(e) => format!("A machine component reported a problem: {}", e),
            Self::InvalidOrder { field, reason } => {
                format!("The order was rejected because {} is invalid: {}", field, reason)
            }
            Self::IoError(e) => format!("Could not read or write a file: {}", e),
            Self::SerializationError(e) => format!("Could not parse JSON: {}", e),
            Self::ConfigValidationError { field, message } => {
                format!("Configuration problem in {}: {}", field, message)
            }
            Self::InvalidConfigValueError { field, value, reason } => {
                format!("Configuration value {} = '{}' is invalid: {}", field, value, reason)
            }
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Movement { .. } => {
                "Check the platform for obstructions, then restart so the platform is homed again"
            }
            Self::Hardware(_) => "Inspect the wiring and power of the reporting component",
            Self::InvalidOrder { .. } => {
                "Fix the order payload: quantities, weights and volumes must be positive and slots must exist"
            }
            Self::IoError(_) => "Make sure the file exists and is readable",
            Self::SerializationError(_) => "Make sure the order payload is valid JSON",
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => {
                "Correct the machine configuration file and restart"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DispenseError>;
