//! Error types for the resource compiler and the transport layer.
//!
//! - [`LexError`]: malformed resource text, always carrying the offending position
//! - [`ResourceError`]: any failure turning resource text into a [`Message`](crate::Message)
//! - [`TransportError`]: failures reading or writing framed messages

use thiserror::Error;

/// Grammar failure raised by the resource lexer.
///
/// Positions are character offsets into the resource text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LexError {
    /// The resource does not start with an event identifier.
    #[error("empty event id at position {position}")]
    EmptyEventId {
        /// Offset where the event id was expected.
        position: usize,
    },

    /// A `?` or `&` is not followed by a property key.
    #[error("empty property key at position {position}")]
    EmptyKey {
        /// Offset where the key was expected.
        position: usize,
    },

    /// A property key is not followed by `=`.
    #[error("property '{key}' has no value (expected '=' at position {position})")]
    MissingAssignment {
        /// The key missing its assignment.
        key: String,
        /// Offset where `=` was expected.
        position: usize,
    },

    /// An `=` is followed by nothing usable as a value.
    #[error("empty property value at position {position}")]
    EmptyValue {
        /// Offset where the value was expected.
        position: usize,
    },

    /// A quoted literal reached the end of input without its closing quote.
    #[error("unterminated string literal starting at position {position}")]
    UnterminatedLiteral {
        /// Offset of the opening quote.
        position: usize,
    },

    /// A character appeared where the grammar does not allow it.
    #[error("unexpected '{found}' at position {position}")]
    UnexpectedCharacter {
        /// The offending character.
        found: char,
        /// Offset of the offending character.
        position: usize,
    },
}

impl LexError {
    /// Offset of the failure in the resource text.
    pub fn position(&self) -> usize {
        match self {
            Self::EmptyEventId { position }
            | Self::EmptyKey { position }
            | Self::MissingAssignment { position, .. }
            | Self::EmptyValue { position }
            | Self::UnterminatedLiteral { position }
            | Self::UnexpectedCharacter { position, .. } => *position,
        }
    }
}

/// Failure compiling resource text into a message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// The text does not follow the resource grammar.
    #[error("failed to lex resource '{resource}': {source}")]
    Lex {
        /// The resource text that failed.
        resource: String,
        /// The grammar failure.
        #[source]
        source: LexError,
    },

    /// A reserved control key carried a value it cannot interpret.
    #[error("bad value for '{key}' in resource (value: '{value}')")]
    InvalidControlValue {
        /// The reserved key.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// The same property key appeared twice.
    #[error("duplicate property '{key}' in resource")]
    DuplicateProperty {
        /// The repeated key.
        key: String,
    },
}

/// Failure moving a message across a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying socket failed.
    #[error("connection i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A frame arrived whose payload is not a message.
    #[error("received packet, but the format was not expected: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A message could not be encoded.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The connection has been closed.
    #[error("failed to send request due to connection being dead")]
    Closed,
}

impl TransportError {
    /// Whether the receive loop may skip this error and keep reading.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}
