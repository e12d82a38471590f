//! Error types for client and helper operations.

use std::time::Duration;
use thiserror::Error;

/// Error reported by a handler while processing a delivered message.
///
/// Any handler failure turns the whole delivered batch into a delayed
/// redelivery; the error itself is carried back to the client library.
pub type ProcessingError = anyhow::Error;

/// Errors reported by the message queue client library.
///
/// The helper never wraps or translates these: construction, start and send
/// failures reach the caller exactly as the provider produced them.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid client settings for {field}: {message}")]
    InvalidSettings { field: String, message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("{client} has not been started")]
    NotStarted { client: String },

    #[error("{client} has already been shut down")]
    AlreadyShutdown { client: String },

    #[error("Start failed: {message}")]
    StartFailed { message: String },

    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    #[error("Subscription to '{topic}' failed: {message}")]
    SubscriptionFailed { topic: String, message: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Operation cancelled by caller")]
    Cancelled,

    #[error("Broker error: {code} - {message}")]
    Broker { code: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl ClientError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidSettings { .. } => false,
            Self::AuthenticationFailed { .. } => false,
            Self::NotStarted { .. } => false,
            Self::AlreadyShutdown { .. } => false,
            Self::StartFailed { .. } => true,
            Self::InvalidMessage { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::TopicNotFound { .. } => false,
            Self::SubscriptionFailed { .. } => false,
            Self::Timeout { .. } => true,
            Self::Cancelled => false,
            Self::Broker { .. } => true, // Broker-side errors are usually transient
            Self::ValidationError(_) => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::StartFailed { .. } => Some(Duration::from_secs(5)),
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::Broker { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Unsupported {field}: {message}")]
    Unsupported { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
