//! Error types for the segmerge library.
//!
//! All errors are represented by the [`SegmergeError`] enum. The variants
//! follow the merge engine's failure taxonomy: configuration problems are
//! detected before any I/O happens, invariant violations abort reclaim-map
//! construction, and I/O failures surface from the reducers that hit them.
//!
//! # Examples
//!
//! ```
//! use segmerge::error::{SegmergeError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(SegmergeError::config("output segment count must be positive"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for segmerge operations.
#[derive(Error, Debug)]
pub enum SegmergeError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed merge plan, strategy or engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invariant violation while building merge state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A truncate profile could not be produced.
    #[error("Truncation error: {0}")]
    Truncation(String),

    /// The collaborator does not implement the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A worker thread panicked while running a task.
    #[error("Thread join error: {0}")]
    ThreadJoin(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SegmergeError.
pub type Result<T> = std::result::Result<T, SegmergeError>;

impl SegmergeError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Config(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        SegmergeError::InvalidOperation(msg.into())
    }

    /// Create a new truncation error.
    pub fn truncation<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Truncation(msg.into())
    }

    /// Create a new unsupported operation error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Unsupported(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Storage(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Other(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Storage(format!("Not found: {}", msg.into()))
    }

    /// Whether this error was raised before any output was written.
    pub fn is_config(&self) -> bool {
        matches!(self, SegmergeError::Config(_))
    }

    /// Whether this error came from reading sources or writing outputs.
    pub fn is_io(&self) -> bool {
        matches!(self, SegmergeError::Io(_) | SegmergeError::Storage(_))
    }
}
