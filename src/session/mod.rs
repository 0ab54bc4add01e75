// src/session/mod.rs — Generation sessions

pub mod context;
pub mod engine;

pub use context::{assemble_context, image_token_estimate, AssembledContext};
pub use engine::{GenerationSession, SessionOutcome};

use tokio::sync::broadcast;

use crate::conversation::Message;

/// Events pushed to the presentation layer while a session runs — the
/// only interface a renderer needs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ContentDelta(String),
    ReasoningDelta(String),
    ToolInvoked {
        name: String,
        arguments: serde_json::Value,
    },
    FinalMessage(Box<Message>),
    Error(String),
}

/// Lifecycle of one generation session.
///
/// `Streaming` and `ResolvingTools` alternate once per tool round until
/// the model stops calling tools or the round cap forces settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Assembling,
    Reserving,
    Streaming,
    ResolvingTools,
    Settling,
    Completed,
    Failed,
}

impl SessionPhase {
    /// Legal transitions of the state machine. Cancellation is a forced
    /// move to `Settling`, never to `Failed` — partial answers are still
    /// billable and displayable.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Assembling, Reserving)
                | (Assembling, Failed)
                | (Reserving, Streaming)
                | (Reserving, Failed)
                | (Streaming, ResolvingTools)
                | (Streaming, Settling)
                | (Streaming, Failed)
                | (ResolvingTools, Streaming)
                | (ResolvingTools, Settling)
                | (ResolvingTools, Failed)
                | (Settling, Completed)
                | (Settling, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }
}

/// Push-based delivery to the caller, built on a bounded broadcast
/// channel. A slow renderer lags and loses the oldest deltas; the
/// provider read loop never blocks. Authoritative content lives in the
/// message tree and is never dropped.
pub struct EventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: a session with no connected renderer still runs.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}
