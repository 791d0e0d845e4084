use std::fmt;

use serde::{Deserialize, Serialize};

/// A formula parse error.
///
/// `position` is the character offset (not byte offset) of the token where
/// parsing failed, counted from the start of the source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        ParseError {
            position,
            message: message.into(),
        }
    }

    pub fn lex(position: usize, message: impl Into<String>) -> Self {
        ParseError::new(position, message)
    }

    /// Shift the position by `offset` characters. Used when a sub-expression
    /// (a template interpolation) is parsed out of a larger source text.
    pub fn offset_by(mut self, offset: usize) -> Self {
        self.position += offset;
        self
    }

    /// Serialize to a JSON object with both fields always present.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "position": self.position,
            "message":  self.message,
        })
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}
