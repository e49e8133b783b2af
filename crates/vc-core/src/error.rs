//! Core error types for kubevirt-console

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a console provider while opening a stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The VMI (or its namespace) does not exist
    #[error("virtual machine instance not found: {0}")]
    NotFound(String),

    /// The credentials are not allowed to open the console
    #[error("access to the serial console is forbidden: {0}")]
    Forbidden(String),

    /// The console did not become available within the connection timeout
    #[error("timed out after {}s waiting for the serial console", .0.as_secs())]
    Timeout(Duration),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The configured endpoint cannot be turned into a request
    #[error("invalid console endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Failure of an established console stream
#[derive(Error, Debug)]
pub enum StreamError {
    /// The remote side went away without a closing handshake
    #[error("the console connection was closed abnormally")]
    AbnormalClosure,

    /// The remote side closed with a non-normal close code
    #[error("the console connection was closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    /// Protocol or transport failure
    #[error("console transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote-side failure, either while opening or after the stream was established
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The provider could not open the stream
    #[error(transparent)]
    Establish(#[from] ProviderError),

    /// The open stream failed
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Errors returned by pipe operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// The conduit was closed before the data was consumed
    #[error("write on closed pipe")]
    Closed,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
