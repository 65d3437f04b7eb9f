//! Error handling for BusBridge-RS
//!
//! Each layer owns a focused error enum (signature parsing, value conversion,
//! bus connection, pipeline blocks). [`BridgeError`] wraps all of them and is
//! the error type of the crate-wide [`Result`] alias.

use thiserror::Error;

use crate::blocks::BlockError;
use crate::bus::ConnectionError;
use crate::signature::{ConversionError, SignatureError};

/// Main error type for BusBridge-RS operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed type signature
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// A value could not be coerced into the requested bus type
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Bus connection or bus call failure
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Invalid pipeline message or block parameter
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BridgeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context layers and return the underlying error
    pub fn root(&self) -> &BridgeError {
        match self {
            BridgeError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for BusBridge-RS operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<BridgeError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
