//! Error type definitions for the tuner proxy
//!
//! Each layer owns a small `thiserror` enum. The web layer only ever sees
//! [`AppError`], which wraps the layer errors and carries the mapping to HTTP
//! status codes.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Origin resolution and fetch errors
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Tuner allocation and lifecycle errors
    #[error("Tuner error: {0}")]
    Tuner(#[from] TunerError),

    /// Requested channel is not part of the registry
    #[error("Channel not found: {number}")]
    ChannelNotFound { number: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while talking to the HLS origin
///
/// `Clone` so that a single in-flight resolve can hand the same outcome to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Transport failure, timeout or non-2xx response
    #[error("Upstream unavailable: {url} - {message}")]
    Unavailable {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Expected markup or playlist structure was not found
    #[error("Parse error: {context} - {message}")]
    Parse { context: String, message: String },

    /// A key proxy path that does not decode to an absolute URL
    #[error("Invalid key path: {path}")]
    InvalidKeyPath { path: String },
}

/// Errors raised by the remuxing subprocess wrapper
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process output unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process has not been started")]
    NotStarted,
}

/// Errors raised by the tuner pool and individual tuners
#[derive(Error, Debug)]
pub enum TunerError {
    /// Pool is full and the channel has no live tuner to share
    #[error("No tuner available for channel {channel} ({max_tuners} in use)")]
    NoCapacity { channel: String, max_tuners: usize },

    /// The remuxing process could not be started
    #[error("Failed to start stream for channel {channel}: {message}")]
    ProcessSpawn { channel: String, message: String },

    /// The tuner was torn down before the operation completed
    #[error("Tuner for channel {channel} is stopped")]
    Stopped { channel: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn channel_not_found<S: Into<String>>(number: S) -> Self {
        Self::ChannelNotFound {
            number: number.into(),
        }
    }
}

impl UpstreamError {
    /// Create an unavailable error for a URL
    pub fn unavailable<U: ToString, M: Into<String>>(url: U, message: M) -> Self {
        Self::Unavailable {
            url: url.to_string(),
            status: None,
            message: message.into(),
        }
    }

    /// Create a parse error with the stage that failed
    pub fn parse<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn from_reqwest(url: &url::Url, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        Self::Unavailable {
            url: url.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message,
        }
    }
}
