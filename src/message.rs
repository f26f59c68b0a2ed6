// ABOUTME: Message value handed from the chat transport to the dispatch queue.
// ABOUTME: Each message is consumed exactly once; the conversation key routes the reply.

use serde::{Deserialize, Serialize};

/// What kind of content the transport received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Voice,
    Photo,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

/// A user prompt on its way to a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Identifies the conversation the reply belongs to
    pub conversation_key: i64,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
}

impl Message {
    pub fn text(conversation_key: i64, content: impl Into<String>) -> Self {
        Self {
            conversation_key,
            content: content.into(),
            kind: MessageKind::Text,
        }
    }
}
