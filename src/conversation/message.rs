// src/conversation/message.rs — Message entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credit::CreditCount;
use crate::provider::ToolCallRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Reference to an uploaded file whose embedding chunks live in the
/// vector store under the file's unit id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: Uuid,
    pub name: String,
}

/// An inline image attachment on a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
    pub width: u32,
    pub height: u32,
}

/// One node of a conversation. `content` and `reasoning` are mutable only
/// by appending streamed increments until the message is finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub reasoning: Option<String>,
    /// None only for the first message of a conversation.
    pub parent: Option<MessageId>,
    /// The tool invocation currently pending on this message; cleared
    /// once resolved.
    pub call: Option<ToolCallRecord>,
    pub file: Option<FileRef>,
    pub image: Option<ImageRef>,
    /// Quoted-text reference the user replied to.
    pub quote: Option<String>,
    pub model: Option<String>,
    /// Credits consumed producing this message, set once known.
    pub cost: Option<CreditCount>,
    pub in_progress: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>, parent: Option<MessageId>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            reasoning: None,
            parent,
            call: None,
            file: None,
            image: None,
            quote: None,
            model: None,
            cost: None,
            in_progress: false,
            created_at: Utc::now(),
        }
    }

    /// An empty assistant message that a generation session streams into.
    pub fn assistant_placeholder(parent: MessageId, model: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            reasoning: None,
            parent: Some(parent),
            call: None,
            file: None,
            image: None,
            quote: None,
            model: Some(model.into()),
            cost: None,
            in_progress: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_file(mut self, file: FileRef) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    pub fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    pub fn append_reasoning(&mut self, delta: &str) {
        self.reasoning.get_or_insert_with(String::new).push_str(delta);
    }
}
