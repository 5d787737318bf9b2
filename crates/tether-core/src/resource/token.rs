//! Tokens produced by the resource lexer.

use std::fmt;

/// Kind of a resource token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// The leading event identifier.
    EventId,
    /// A property key.
    Identifier,
    /// A property value, right of `=`.
    Value,
    /// `&`
    Ampersand,
    /// `=`
    Equals,
    /// `?`, introduces the first property.
    QuestionMark,
    /// End of the resource text.
    EndOfInput,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EventId => "EventId",
            Self::Identifier => "Identifier",
            Self::Value => "Value",
            Self::Ampersand => "Ampersand",
            Self::Equals => "Equals",
            Self::QuestionMark => "QuestionMark",
            Self::EndOfInput => "EndOfInput",
        };
        f.write_str(name)
    }
}

/// A lexeme with its kind and character offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// The text of the token. Quoted values hold their contents without quotes.
    pub lexeme: String,
    /// Character offset where the token starts.
    pub position: usize,
    /// What the token is.
    pub kind: TokenKind,
}

impl Token {
    /// Create a token.
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, position: usize) -> Self {
        Self {
            lexeme: lexeme.into(),
            position,
            kind,
        }
    }

    /// Terminal token at `position`.
    pub fn end(position: usize) -> Self {
        Self::new(TokenKind::EndOfInput, "", position)
    }

    /// Whether this is the terminal token.
    pub fn is_end(&self) -> bool {
        self.kind == TokenKind::EndOfInput
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) '{}' at {}", self.kind, self.lexeme, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let token = Token::new(TokenKind::EventId, "display", 0);
        assert_eq!(token.to_string(), "(EventId) 'display' at 0");
    }

    #[test]
    fn end_token() {
        let token = Token::end(9);
        assert!(token.is_end());
        assert_eq!(token.position, 9);
        assert!(token.lexeme.is_empty());
    }
}
