//! Conversion engine: token sequence to [`Message`].

use tracing::debug;

use super::WANTS_RESPONSE_KEY;
use super::lexer::{LexerConfig, ResourceLexer};
use super::token::{Token, TokenKind};
use crate::errors::ResourceError;
use crate::message::Message;

/// Compiles resource text into messages.
///
/// The engine keeps the tokens and cursor of the last parse until
/// [`reset`](Self::reset) or the next [`parse`](Self::parse), which starts
/// from a clean cursor.
#[derive(Debug, Default)]
pub struct ResourceEngine {
    lexer: ResourceLexer,
    tokens: Vec<Token>,
    index: usize,
}

impl ResourceEngine {
    /// Engine with the default lexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with a custom lexer configuration.
    pub fn with_lexer_config(config: LexerConfig) -> Self {
        Self {
            lexer: ResourceLexer::with_config(config),
            ..Self::default()
        }
    }

    /// One-shot parse with a fresh engine.
    pub fn parse_resource(resource: &str) -> Result<Message, ResourceError> {
        Self::new().parse(resource)
    }

    /// Compile `resource` into a message.
    pub fn parse(&mut self, resource: &str) -> Result<Message, ResourceError> {
        self.reset();
        self.tokens = self
            .lexer
            .lex(resource)
            .map_err(|source| ResourceError::Lex {
                resource: resource.to_owned(),
                source,
            })?;

        let mut message = Message::default();
        while let Some(kind) = self.current().map(|t| t.kind) {
            match kind {
                TokenKind::EventId => message.event_id.clone_from(&self.tokens[self.index].lexeme),
                TokenKind::Identifier => self.process_property(&mut message)?,
                TokenKind::EndOfInput => break,
                _ => {}
            }
            self.index += 1;
        }

        debug!(event_id = %message.event_id, properties = message.properties.len(), "parsed resource");
        Ok(message)
    }

    /// Drop retained tokens and rewind the cursor.
    pub fn reset(&mut self) {
        self.tokens.clear();
        self.index = 0;
    }

    /// Tokens of the last parse.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    fn process_property(&mut self, message: &mut Message) -> Result<(), ResourceError> {
        // key, '=', value
        let key = self.tokens[self.index].lexeme.clone();
        self.index += 2;
        let value = self
            .current()
            .filter(|t| t.kind == TokenKind::Value)
            .map(|t| t.lexeme.clone())
            .unwrap_or_default();

        if key == WANTS_RESPONSE_KEY {
            message.wants_response = parse_flag(&key, &value)?;
            return Ok(());
        }

        if message.properties.contains_key(&key) {
            return Err(ResourceError::DuplicateProperty { key });
        }
        let _ = message.properties.insert(key, value.into());
        Ok(())
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }
}

/// Interpret a control value as a boolean: `true`/`false`, or `1`/`0`.
fn parse_flag(key: &str, value: &str) -> Result<bool, ResourceError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        Ok(false)
    } else {
        Err(ResourceError::InvalidControlValue {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LexError;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn display_with_quoted_text() {
        let msg = ResourceEngine::parse_resource("display?text='Hello, World!'").unwrap();
        assert_eq!(msg.event_id, "display");
        assert_eq!(msg.properties.len(), 1);
        assert_eq!(msg.property_str("text"), Some("Hello, World!"));
        assert!(!msg.wants_response);
        assert!(msg.identity.is_none());
    }

    #[test]
    fn disconnect_with_bare_values() {
        let msg = ResourceEngine::parse_resource("disconnect?reason=0x999&code=-1").unwrap();
        assert_eq!(msg.event_id, "disconnect");
        assert_eq!(msg.properties["reason"], json!("0x999"));
        assert_eq!(msg.properties["code"], json!("-1"));
    }

    #[test]
    fn long_resource() {
        let msg = ResourceEngine::parse_resource(
            "disconnect?reason=0x999&msgType=MessageType.Failure&code=-1&msg=Failed to establish connection",
        )
        .unwrap();
        assert_eq!(msg.event_id, "disconnect");
        assert_eq!(msg.property_str("reason"), Some("0x999"));
        assert_eq!(msg.property_str("msgType"), Some("MessageType.Failure"));
        assert_eq!(msg.property_str("code"), Some("-1"));
        assert_eq!(msg.property_str("msg"), Some("Failed to establish connection"));
    }

    #[test]
    fn bare_event_id() {
        let msg = ResourceEngine::parse_resource("onready").unwrap();
        assert_eq!(msg.event_id, "onready");
        assert!(msg.properties.is_empty());
    }

    #[test]
    fn iiwr_true_sets_flag() {
        for value in ["true", "1", "True"] {
            let msg = ResourceEngine::parse_resource(&format!("ping?iiwr={value}")).unwrap();
            assert!(msg.wants_response, "iiwr={value}");
            assert!(!msg.has_property("iiwr"));
        }
    }

    #[test]
    fn iiwr_false_clears_flag() {
        for value in ["false", "0", "FALSE"] {
            let msg = ResourceEngine::parse_resource(&format!("ping?a=b&iiwr={value}")).unwrap();
            assert!(!msg.wants_response, "iiwr={value}");
            assert!(!msg.has_property("iiwr"));
            assert_eq!(msg.property_str("a"), Some("b"));
        }
    }

    #[test]
    fn iiwr_unknown_value_fails() {
        assert_matches!(
            ResourceEngine::parse_resource("ping?iiwr=maybe"),
            Err(ResourceError::InvalidControlValue { ref value, .. }) if value == "maybe"
        );
    }

    #[test]
    fn duplicate_key_fails() {
        assert_matches!(
            ResourceEngine::parse_resource("a?k=1&k=2"),
            Err(ResourceError::DuplicateProperty { ref key }) if key == "k"
        );
    }

    #[test]
    fn lex_failure_surfaces() {
        assert_matches!(
            ResourceEngine::parse_resource(""),
            Err(ResourceError::Lex { source: LexError::EmptyEventId { .. }, .. })
        );
        assert_matches!(
            ResourceEngine::parse_resource("display?text='open"),
            Err(ResourceError::Lex { source: LexError::UnterminatedLiteral { .. }, .. })
        );
    }

    #[test]
    fn engine_reuse_does_not_leak_state() {
        let mut engine = ResourceEngine::new();
        let first = engine.parse("a?x=1&iiwr=1").unwrap();
        let second = engine.parse("b?y=2").unwrap();
        assert!(first.wants_response);
        assert_eq!(second.event_id, "b");
        assert!(!second.has_property("x"));
        assert!(!second.wants_response);
    }

    #[test]
    fn reset_clears_tokens() {
        let mut engine = ResourceEngine::new();
        let _ = engine.parse("a?x=1").unwrap();
        assert_eq!(engine.tokens().len(), 6);
        engine.reset();
        assert!(engine.tokens().is_empty());
    }

    #[test]
    fn failed_parse_leaves_engine_usable() {
        let mut engine = ResourceEngine::new();
        assert!(engine.parse("a?x=").is_err());
        let msg = engine.parse("a?x=1").unwrap();
        assert_eq!(msg.property_str("x"), Some("1"));
    }

    #[test]
    fn quoted_literal_with_spaces_and_reserved_characters() {
        let msg = ResourceEngine::parse_resource("say?text='a b & c = d ? e'&n=1").unwrap();
        assert_eq!(msg.property_str("text"), Some("a b & c = d ? e"));
        assert_eq!(msg.property_str("n"), Some("1"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn event_id() -> impl Strategy<Value = String> {
            "[a-zA-Z_]{1,12}"
        }

        fn key() -> impl Strategy<Value = String> {
            "[a-zA-Z_]{1,8}".prop_filter("reserved key", |k| k != "iiwr")
        }

        fn bare_value() -> impl Strategy<Value = String> {
            "[a-zA-Z0-9 .,:!_-]{1,16}"
        }

        fn quoted_value() -> impl Strategy<Value = String> {
            "[a-zA-Z0-9 ?&=.,!]{0,16}"
        }

        proptest! {
            #[test]
            fn bare_properties_roundtrip(
                id in event_id(),
                props in proptest::collection::btree_map(key(), bare_value(), 0..6),
            ) {
                let mut resource = id.clone();
                for (i, (k, v)) in props.iter().enumerate() {
                    resource.push(if i == 0 { '?' } else { '&' });
                    resource.push_str(&format!("{k}={v}"));
                }
                let msg = ResourceEngine::parse_resource(&resource).unwrap();
                prop_assert_eq!(&msg.event_id, &id);
                prop_assert_eq!(msg.properties.len(), props.len());
                for (k, v) in &props {
                    prop_assert_eq!(msg.property_str(k), Some(v.as_str()));
                }
            }

            #[test]
            fn quoted_properties_roundtrip(
                id in event_id(),
                props in proptest::collection::btree_map(key(), quoted_value(), 1..6),
            ) {
                let mut resource = id.clone();
                for (i, (k, v)) in props.iter().enumerate() {
                    resource.push(if i == 0 { '?' } else { '&' });
                    resource.push_str(&format!("{k}='{v}'"));
                }
                let msg = ResourceEngine::parse_resource(&resource).unwrap();
                prop_assert_eq!(&msg.event_id, &id);
                for (k, v) in &props {
                    prop_assert_eq!(msg.property_str(k), Some(v.as_str()));
                }
            }

            #[test]
            fn parse_never_yields_empty_event_id(text in ".{0,40}") {
                if let Ok(msg) = ResourceEngine::parse_resource(&text) {
                    prop_assert!(!msg.event_id.is_empty());
                    prop_assert!(!msg.has_property("iiwr"));
                }
            }
        }
    }
}
