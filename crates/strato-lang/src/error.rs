//! Error types for the language front end

use crate::ast::Location;
use thiserror::Error;

/// Errors produced while lexing or parsing a source file
#[derive(Error, Debug, Clone)]
#[error("{location}: {message}")]
pub struct ParseError {
    /// What went wrong
    pub message: String,
    /// Where it went wrong
    pub location: Location,
}

impl ParseError {
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

/// Result type for parse operations
pub type Result<T> = std::result::Result<T, ParseError>;
