//! Lifecycle notifications delivered by the host event source.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::HostMessage;

/// A message lifecycle notification.
///
/// Serialized with an `event` tag so host feeds can be recorded as JSON
/// lines: `{"event":"new_message","thread_id":"t1","message":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A message arrived in a thread.
    NewMessage {
        thread_id: String,
        message: HostMessage,
    },
    /// Something about an existing message changed (reaction, edit,
    /// retraction, ...). The event itself does not say what.
    UpdatedMessage {
        thread_id: String,
        message_id: String,
        #[serde(default)]
        source: Option<String>,
    },
}

impl LifecycleEvent {
    /// Stable kind name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::UpdatedMessage { .. } => "updated_message",
        }
    }

    /// Id of the message the event is about.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::NewMessage { message, .. } => &message.message_id,
            Self::UpdatedMessage { message_id, .. } => message_id,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.message_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_feed_lines() {
        let line = r#"{"event":"updated_message","thread_id":"t1","message_id":"m1"}"#;
        let event: LifecycleEvent = serde_json::from_str(line).expect("parse");
        assert_eq!(
            event,
            LifecycleEvent::UpdatedMessage {
                thread_id: "t1".into(),
                message_id: "m1".into(),
                source: None,
            }
        );
        assert_eq!(event.to_string(), "updated_message(m1)");
    }

    #[test]
    fn new_message_exposes_inner_id() {
        let event = LifecycleEvent::NewMessage {
            thread_id: "t1".into(),
            message: HostMessage::text("m9", "t1", "fbid:1", "yo", 5),
        };
        assert_eq!(event.kind(), "new_message");
        assert_eq!(event.message_id(), "m9");
    }
}
