//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID is longer than the allowed maximum.
    #[error("ID too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },

    /// The ID contains a character outside the allowed set.
    #[error("invalid character {found:?} in ID '{id}'")]
    InvalidCharacter { id: String, found: char },

    /// The ID is a reserved path component.
    #[error("ID '{0}' is reserved")]
    Reserved(String),

    /// The UUID portion of the ID is invalid.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
