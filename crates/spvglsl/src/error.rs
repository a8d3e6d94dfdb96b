//! Error taxonomy for the decompiler.
//!
//! Every failure that reaches a caller falls into one of four categories.
//! Soft emission failures (an invalidated forwarded expression, a loop
//! header fold that had a side effect) never show up here; they are
//! consumed by the retry loop in [`crate::Compiler::compile`].

use crate::ir::Id;
use std::fmt;
use thiserror::Error;

/// Where in the input module an error was detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    /// Offending result ID, if one is known.
    pub id: Option<Id>,
    /// Word offset of the offending instruction in the module.
    pub offset: Option<usize>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.id, self.offset) {
            (None, None) => Ok(()),
            (Some(id), None) => write!(f, " (id %{id})"),
            (None, Some(offset)) => write!(f, " (at word {offset})"),
            (Some(id), Some(offset)) => write!(f, " (id %{id} at word {offset})"),
        }
    }
}

/// Errors produced while decoding, analyzing or emitting a module.
#[derive(Debug, Error)]
pub enum Error {
    /// Header, magic, version or instruction-length violations.
    #[error("malformed module: {message}{location}")]
    MalformedModule { message: String, location: Location },

    /// Semantically inconsistent IR: unresolvable IDs, wrong operand counts,
    /// disallowed capabilities.
    #[error("invalid module: {message}{location}")]
    InvalidModule { message: String, location: Location },

    /// The module needs a target-dialect feature that the requested
    /// version cannot provide, even through an extension.
    #[error("unsupported construct: {message}{location}")]
    UnsupportedConstruct { message: String, location: Location },

    /// An analysis or emission pass reached a state it cannot reconcile.
    #[error("internal invariant violated: {message}{location}")]
    InternalInvariantViolation { message: String, location: Location },
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedModule {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidModule {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedConstruct {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalInvariantViolation {
            message: message.into(),
            location: Location::default(),
        }
    }

    fn location_mut(&mut self) -> &mut Location {
        match self {
            Error::MalformedModule { location, .. }
            | Error::InvalidModule { location, .. }
            | Error::UnsupportedConstruct { location, .. }
            | Error::InternalInvariantViolation { location, .. } => location,
        }
    }

    /// The location attached to this error.
    pub fn location(&self) -> Location {
        match self {
            Error::MalformedModule { location, .. }
            | Error::InvalidModule { location, .. }
            | Error::UnsupportedConstruct { location, .. }
            | Error::InternalInvariantViolation { location, .. } => *location,
        }
    }

    /// Attach the offending ID unless one is already recorded.
    pub fn at_id(mut self, id: Id) -> Self {
        let location = self.location_mut();
        location.id.get_or_insert(id);
        self
    }

    /// Attach the instruction word offset unless one is already recorded.
    pub fn at_offset(mut self, offset: usize) -> Self {
        let location = self.location_mut();
        location.offset.get_or_insert(offset);
        self
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedModule { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::InvalidModule { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedConstruct { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_is_rendered_only_when_known() {
        let err = Error::invalid("no block in scope");
        assert_eq!(err.to_string(), "invalid module: no block in scope");

        let err = Error::invalid("no block in scope").at_id(7).at_offset(42);
        assert_eq!(
            err.to_string(),
            "invalid module: no block in scope (id %7 at word 42)"
        );
    }

    #[test]
    fn first_attached_location_wins() {
        let err = Error::malformed("bad").at_offset(5).at_offset(9);
        assert_eq!(err.location().offset, Some(5));
        assert!(err.is_malformed());
    }
}
