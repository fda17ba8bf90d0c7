//! Unified error handling system
//!
//! Structured error types with context and proper error chaining. Every
//! storage and SCM failure surfaces as a [`ConveyorError`] so the auth layer
//! can decide between "not found" and "upstream failure".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type ConveyorResult<T> = Result<T, ConveyorError>;

/// Error context providing additional information for debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for correlating client-visible failures with logs
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Main error type for the Conveyor system
#[derive(Error, Debug)]
pub enum ConveyorError {
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("SCM error: {message}")]
    Scm {
        message: String,
        /// HTTP status returned by the provider, when one was received
        status: Option<u16>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl ConveyorError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            ConveyorError::Storage { context, .. } => Some(context),
            ConveyorError::Scm { context, .. } => Some(context),
            ConveyorError::Config { context, .. } => Some(context),
            ConveyorError::Validation { context, .. } => Some(context),
            ConveyorError::NotFound { context, .. } => Some(context),
            ConveyorError::Timeout { context, .. } => Some(context),
            ConveyorError::Internal { context, .. } => Some(context),
            ConveyorError::Io(_) | ConveyorError::Serialization(_) => None,
        }
    }

    /// True when the referenced resource does not exist, either locally or
    /// on the SCM side (a provider 404).
    pub fn is_not_found(&self) -> bool {
        match self {
            ConveyorError::NotFound { .. } => true,
            ConveyorError::Scm { status, .. } => *status == Some(404),
            _ => false,
        }
    }

    /// HTTP status reported by the SCM provider, if any
    pub fn scm_status(&self) -> Option<u16> {
        match self {
            ConveyorError::Scm { status, .. } => *status,
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            ConveyorError::NotFound { .. } | ConveyorError::Validation { .. } => {
                warn!(error_id = ?error_id, error = %self, "Request error");
            }
            ConveyorError::Scm { .. } | ConveyorError::Timeout { .. } => {
                warn!(error_id = ?error_id, error = %self, "Upstream SCM error");
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Error occurred");
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::ConveyorError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::ConveyorError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! scm_error {
    ($msg:expr, $component:expr) => {
        $crate::ConveyorError::Scm {
            message: $msg.to_string(),
            status: None,
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, status = $status:expr) => {
        $crate::ConveyorError::Scm {
            message: $msg.to_string(),
            status: Some($status),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::ConveyorError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component).with_operation("validate"),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::ConveyorError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}
