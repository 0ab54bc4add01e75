// src/tenant.rs — Workspace, user and assistant profiles
//
// Identity, authentication and subscription logic live outside this
// crate; these are the slices of tenant state the generation engine
// actually consumes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(WorkspaceId);
id_type!(UserId);
id_type!(AssistantId);

/// The billing boundary: one credit balance per workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    /// When set, settlement may push the balance below zero instead of
    /// clamping the charge.
    pub allow_negative_balance: bool,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkspaceId::new(),
            name: name.into(),
            allow_negative_balance: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
        }
    }
}

/// A named assistant profile. Its knowledge base lives in the vector
/// store under the assistant's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: AssistantId,
    pub name: String,
    pub instructions: Option<String>,
}

impl Assistant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AssistantId::new(),
            name: name.into(),
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}
