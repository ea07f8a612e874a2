//! Error types for tailship-logging

use thiserror::Error;

/// Errors raised while setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory or file could not be created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The rolling file appender could not be created
    #[error("Appender error: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    /// A global subscriber is already installed
    #[error("Subscriber init error: {0}")]
    Init(String),
}

/// Result type for logging setup
pub type LoggingResult<T> = Result<T, LoggingError>;
