//! Messages delivered by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A message queued for asynchronous delivery to plugins.
///
/// Messages without an action are broadcast to activated plugins through
/// [`Plugin::handle`](crate::Plugin::handle); messages with an action go to
/// every registered plugin through
/// [`Plugin::handle_action`](crate::Plugin::handle_action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier, for log correlation.
    pub id: Uuid,
    /// Optional action name.
    pub action: Option<String>,
    /// Opaque payload.
    pub payload: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates an action message. An empty action name yields a plain payload message.
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        let action = action.into();
        Self {
            id: Uuid::new_v4(),
            action: (!action.is_empty()).then_some(action),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Creates a message carrying only a payload.
    pub fn payload(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: None,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Returns the action name, if any.
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Whether this message carries an action.
    pub fn is_action(&self) -> bool {
        self.action.is_some()
    }
}

impl From<Value> for Message {
    fn from(payload: Value) -> Self {
        Self::payload(payload)
    }
}
