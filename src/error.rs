// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::io;

/// Errors surfaced by the panel driver.
#[derive(Debug, thiserror::Error)]
pub enum TexecomError {
    /// Serial link I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// UDL codes on Premier panels are always six characters.
    #[error("invalid UDL code length {len}, expected 6 characters")]
    InvalidCodeLength { len: usize },

    /// The configured code store could not be read or written.
    #[error("code store error: {0}")]
    CodeStore(#[source] io::Error),
}

impl TexecomError {
    /// Returns true if the error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TexecomError::Io(_))
    }
}

/// Result type for panel operations.
pub type Result<T> = std::result::Result<T, TexecomError>;
