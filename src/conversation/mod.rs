// src/conversation/mod.rs — Conversations and the branchable message tree

pub mod message;
pub mod tree;

pub use message::{FileRef, ImageRef, Message, MessageId, Role};
pub use tree::{MessageTree, PathStep};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::WorkspaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Conversation metadata. The message set itself lives in a
/// [`MessageTree`]; the repository layer persists messages and the
/// `last_active_leaf` pointer the tree reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub workspace: WorkspaceId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(workspace: WorkspaceId) -> Self {
        Self {
            id: ConversationId::new(),
            workspace,
            title: None,
            created_at: Utc::now(),
        }
    }
}
