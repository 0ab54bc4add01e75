// src/infra/errors.rs — Error types for Weft

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeftError {
    // Credit errors (recoverable by the caller, no external call was made)
    #[error("Insufficient credit in workspace '{workspace}': requested {requested}, available {available}")]
    InsufficientCredit {
        workspace: String,
        requested: f64,
        available: f64,
    },

    // Provider errors (retriable)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    // Configuration errors (fail fast, before any reservation)
    #[error("Model '{model}' is not supported")]
    ModelNotSupported { model: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Conversation tree errors
    #[error("Message '{id}' already exists in the conversation")]
    DuplicateMessage { id: String },

    #[error("Parent message '{id}' not found in the conversation")]
    ParentNotFound { id: String },

    #[error("Conversation already has a root message")]
    RootExists,

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WeftError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            WeftError::Provider {
                retriable: true,
                ..
            } | WeftError::RateLimited { .. }
        )
    }
}
