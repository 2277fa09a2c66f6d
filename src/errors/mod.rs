//! Centralized error handling for the tuner proxy
//!
//! # Error Categories
//!
//! - **Upstream Errors**: origin connectivity, playlist parsing, key paths
//! - **Transcode Errors**: remuxing subprocess spawn and pipe failures
//! - **Tuner Errors**: pool capacity and tuner lifecycle
//!
//! # Usage
//!
//! ```rust
//! use hdhr_proxy::errors::{AppError, AppResult};
//!
//! fn lookup(number: &str) -> AppResult<String> {
//!     Err(AppError::channel_not_found(number))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for origin Results
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Convenience type alias for tuner Results
pub type TunerResult<T> = Result<T, TunerError>;
