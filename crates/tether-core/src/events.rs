//! Event table: event ids to ordered handler lists.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::message::Message;

/// Callback invoked for a matching inbound message.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Maps event ids to the handlers registered for them.
///
/// Handlers for one event run in registration order. An event id with no
/// handlers is a no-op.
#[derive(Clone, Default)]
pub struct EventTable {
    handlers: HashMap<String, Vec<Handler>>,
}

impl EventTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `event_id`.
    pub fn add<F>(&mut self, event_id: impl Into<String>, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.add_handler(event_id, Arc::new(handler));
    }

    /// Append an already shared handler for `event_id`.
    pub fn add_handler(&mut self, event_id: impl Into<String>, handler: Handler) {
        let event_id = event_id.into();
        trace!(event_id = %event_id, "registered handler");
        self.handlers.entry(event_id).or_default().push(handler);
    }

    /// Handlers registered for `event_id`, in registration order.
    pub fn handlers_for(&self, event_id: &str) -> &[Handler] {
        self.handlers.get(event_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// First handler for `event_id`.
    pub fn first_for(&self, event_id: &str) -> Option<&Handler> {
        self.handlers_for(event_id).first()
    }

    /// Whether any handler is registered for `event_id`.
    pub fn contains(&self, event_id: &str) -> bool {
        !self.handlers_for(event_id).is_empty()
    }

    /// Invoke every handler for the message's event id. Returns how many ran.
    pub fn dispatch(&self, message: &Message) -> usize {
        let handlers = self.handlers_for(&message.event_id);
        if handlers.is_empty() {
            debug!(event_id = %message.event_id, "no handler for event");
            return 0;
        }
        for handler in handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Registered event ids, sorted.
    pub fn event_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(&str, usize)> = self
            .handlers
            .iter()
            .map(|(id, hs)| (id.as_str(), hs.len()))
            .collect();
        f.debug_struct("EventTable").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn dispatch_runs_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut table = EventTable::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            table.add("display", move |_msg: &Message| seen.lock().push(tag));
        }

        let ran = table.dispatch(&Message::display("hi"));
        assert_eq!(ran, 3);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn dispatch_unknown_event_is_noop() {
        let table = EventTable::new();
        assert_eq!(table.dispatch(&Message::new("nothing")), 0);
    }

    #[test]
    fn handlers_only_see_their_event() {
        let hits = Arc::new(Mutex::new(0_u32));
        let mut table = EventTable::new();
        let counter = Arc::clone(&hits);
        table.add("connected", move |_msg: &Message| *counter.lock() += 1);

        let _ = table.dispatch(&Message::display("x"));
        let _ = table.dispatch(&Message::connected());
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn handler_reads_properties() {
        let text = Arc::new(Mutex::new(String::new()));
        let mut table = EventTable::new();
        let sink = Arc::clone(&text);
        table.add("display", move |msg: &Message| {
            if let Some(t) = msg.property_str("text") {
                sink.lock().push_str(t);
            }
        });

        let _ = table.dispatch(&Message::display("Hello, World!"));
        assert_eq!(*text.lock(), "Hello, World!");
    }

    #[test]
    fn first_for_and_contains() {
        let mut table = EventTable::new();
        assert!(table.first_for("a").is_none());
        assert!(!table.contains("a"));
        table.add("a", |_msg: &Message| {});
        assert!(table.first_for("a").is_some());
        assert!(table.contains("a"));
        assert_eq!(table.handlers_for("a").len(), 1);
    }

    #[test]
    fn event_ids_sorted() {
        let mut table = EventTable::new();
        table.add("zeta", |_msg: &Message| {});
        table.add("alpha", |_msg: &Message| {});
        table.add("alpha", |_msg: &Message| {});
        assert_eq!(table.event_ids(), vec!["alpha", "zeta"]);
    }
}
