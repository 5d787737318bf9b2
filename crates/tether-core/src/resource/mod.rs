//! Resource strings: a query-string-like grammar compiled into messages.
//!
//! ```text
//! resource := identifier ( '?' property ( '&' property )* )?
//! property := identifier '=' value
//! value    := bare | quoted
//! ```
//!
//! Examples:
//!
//! - `onready`
//! - `onready?token=kdwadjaww82`
//! - `display?text='Hello, World!'`
//! - `notify?text=hi&iiwr=true` (the reserved `iiwr` key sets `wantsResponse`)

pub mod engine;
pub mod lexer;
pub mod token;

/// Starts the property list.
pub const QUESTION_MARK: char = '?';
/// Separates properties.
pub const AMPERSAND: char = '&';
/// Separates a key from its value.
pub const ASSIGNMENT: char = '=';
/// Delimits a literal value that may contain reserved characters.
pub const STRING_LITERAL_DELIM: char = '\'';

/// Characters with grammatical meaning outside quoted literals.
pub const RESERVED_CHARACTERS: [char; 3] = [QUESTION_MARK, AMPERSAND, ASSIGNMENT];

/// Characters allowed in event ids and property keys by default.
pub const VALID_IDENTIFIER_CHARACTERS: &str =
    "_abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Property key that controls `wantsResponse` instead of becoming a property.
pub const WANTS_RESPONSE_KEY: &str = "iiwr";

/// Whether `c` has grammatical meaning.
pub fn is_reserved(c: char) -> bool {
    RESERVED_CHARACTERS.contains(&c)
}
