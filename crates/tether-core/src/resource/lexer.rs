//! Resource lexer: text to a flat token sequence.
//!
//! The lexer never backtracks and consumes at least one character per token,
//! so it emits at most `len + 1` tokens and always terminates.

use tracing::warn;

use super::token::{Token, TokenKind};
use super::{
    AMPERSAND, ASSIGNMENT, QUESTION_MARK, STRING_LITERAL_DELIM, VALID_IDENTIFIER_CHARACTERS,
    is_reserved,
};
use crate::errors::LexError;

/// Tunables for the resource lexer.
#[derive(Clone, Debug)]
pub struct LexerConfig {
    /// Characters allowed in event ids and property keys.
    pub identifier_chars: String,
    /// Character delimiting literal values.
    pub quote: char,
}

impl Default for LexerConfig {
    fn default() -> Self {
        Self {
            identifier_chars: VALID_IDENTIFIER_CHARACTERS.to_owned(),
            quote: STRING_LITERAL_DELIM,
        }
    }
}

impl LexerConfig {
    fn is_identifier_char(&self, c: char) -> bool {
        self.identifier_chars.contains(c)
    }
}

/// Converts resource text into [`Token`]s.
#[derive(Debug, Default)]
pub struct ResourceLexer {
    config: LexerConfig,
    source: String,
    chars: Vec<char>,
    position: usize,
    tokens: Vec<Token>,
}

impl ResourceLexer {
    /// Lexer with the default character sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lexer with custom character sets.
    pub fn with_config(config: LexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Lex `text` into tokens ending with [`TokenKind::EndOfInput`].
    pub fn lex(&mut self, text: &str) -> Result<Vec<Token>, LexError> {
        text.clone_into(&mut self.source);
        self.chars = text.chars().collect();
        self.position = 0;
        self.tokens.clear();

        self.lex_event_id()?;

        match self.peek() {
            None => {}
            Some(QUESTION_MARK) => {
                self.punctuation(TokenKind::QuestionMark, QUESTION_MARK);
                self.lex_property()?;
                while let Some(c) = self.peek() {
                    if c != AMPERSAND {
                        return Err(self.unexpected(c));
                    }
                    self.punctuation(TokenKind::Ampersand, AMPERSAND);
                    self.lex_property()?;
                }
            }
            Some(c) => return Err(self.unexpected(c)),
        }

        self.tokens.push(Token::end(self.chars.len()));
        Ok(std::mem::take(&mut self.tokens))
    }

    fn lex_event_id(&mut self) -> Result<(), LexError> {
        let start = self.position;
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if !self.config.is_identifier_char(c) {
                break;
            }
            lexeme.push(c);
            self.position += 1;
        }

        if lexeme.is_empty() {
            // '?property=value' or ''
            return Err(LexError::EmptyEventId { position: start });
        }

        self.tokens.push(Token::new(TokenKind::EventId, lexeme, start));
        Ok(())
    }

    fn lex_property(&mut self) -> Result<(), LexError> {
        let start = self.position;
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if is_reserved(c) {
                break;
            }
            if !self.config.is_identifier_char(c) {
                warn!(
                    position = self.position,
                    character = %c,
                    resource = %self.source,
                    "disallowed character in property identifier"
                );
            }
            key.push(c);
            self.position += 1;
        }

        if key.is_empty() {
            // 'resource?=value'
            return Err(LexError::EmptyKey { position: start });
        }

        if self.peek() != Some(ASSIGNMENT) {
            return Err(LexError::MissingAssignment {
                key,
                position: self.position,
            });
        }

        self.tokens.push(Token::new(TokenKind::Identifier, key, start));
        self.punctuation(TokenKind::Equals, ASSIGNMENT);
        self.lex_value()
    }

    fn lex_value(&mut self) -> Result<(), LexError> {
        let start = self.position;
        let mut lexeme = String::new();

        if self.peek() == Some(self.config.quote) {
            self.position += 1;
            loop {
                match self.peek() {
                    None => return Err(LexError::UnterminatedLiteral { position: start }),
                    Some(c) if c == self.config.quote => {
                        self.position += 1;
                        break;
                    }
                    Some(c) => {
                        lexeme.push(c);
                        self.position += 1;
                    }
                }
            }
            // An explicit '' is an empty value, not a missing one.
            self.tokens.push(Token::new(TokenKind::Value, lexeme, start));
            return Ok(());
        }

        while let Some(c) = self.peek() {
            if is_reserved(c) {
                break;
            }
            lexeme.push(c);
            self.position += 1;
        }

        if lexeme.is_empty() {
            // 'resource?property='
            return Err(LexError::EmptyValue { position: start });
        }

        self.tokens.push(Token::new(TokenKind::Value, lexeme, start));
        Ok(())
    }

    fn punctuation(&mut self, kind: TokenKind, c: char) {
        self.tokens
            .push(Token::new(kind, c.to_string(), self.position));
        self.position += 1;
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn unexpected(&self, found: char) -> LexError {
        LexError::UnexpectedCharacter {
            found,
            position: self.position,
        }
    }
}
