//! # Probe Error Types
//!
//! This module defines error types for probing operations.

use thiserror::Error;

/// Result type alias for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Comprehensive error type for probe operations
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The inference server could not be reached at startup
    #[error("Cannot connect to inference server at {endpoint}: {message}")]
    Connectivity { endpoint: String, message: String },

    /// A request failed in transit (connection reset, DNS, body decode)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A request exceeded its deadline
    #[error("Operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The server answered with a non-success HTTP status
    #[error("Server returned HTTP {status}")]
    ServerStatus { status: u16 },

    /// The server answered with a payload we could not interpret
    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },

    /// Invalid configuration
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfiguration { field: String, message: String },

    /// IO related errors
    #[error("IO error: {message}")]
    IoError { message: String },
}

impl ProbeError {
    /// Create a new connectivity error
    pub fn connectivity<T: Into<String>, U: Into<String>>(endpoint: T, message: U) -> Self {
        Self::Connectivity {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new invalid response error
    pub fn invalid_response<T: Into<String>>(details: T) -> Self {
        Self::InvalidResponse {
            details: details.into(),
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run rather than one model's sweep.
    ///
    /// Connectivity problems at startup and invalid configuration stop everything;
    /// transport, timeout and server failures only end the current model.
    #[must_use]
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::InvalidConfiguration { .. }
        )
    }

    /// Map a `reqwest` failure onto the taxonomy, keeping timeouts distinct.
    #[must_use]
    pub fn from_reqwest(error: &reqwest::Error, timeout_secs: u64) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                seconds: timeout_secs,
            }
        } else if error.is_decode() {
            Self::invalid_response(error.to_string())
        } else {
            Self::transport(error.to_string())
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse {
            details: error.to_string(),
        }
    }
}
