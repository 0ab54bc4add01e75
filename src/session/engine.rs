// src/session/engine.rs — The streaming generation state machine
//
// One session per in-flight request:
//
//   Assembling → Reserving → Streaming → {ResolvingTools → Streaming}*
//             → Settling → {Completed | Failed}
//
// Credit is reserved from an estimate before the provider call and
// settled from real usage after it; no exit path leaves the reservation
// held. Tool calls buffered during a stream are resolved sequentially so
// the function-output ordering in the next round's input stays
// deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{EventSink, SessionEvent, SessionPhase};
use crate::conversation::{Conversation, Message, MessageId, MessageTree};
use crate::credit::{CreditCount, CreditLedger, Reservation, UsageEvent};
use crate::infra::config::GenerationConfig;
use crate::infra::errors::WeftError;
use crate::provider::registry::{CostCalculator, ModelRegistry};
use crate::provider::{
    ContentBlock, GenerationRequest, ModelProvider, StreamEvent, TokenUsage, ToolCallRecord,
};
use crate::tenant::{Assistant, User, Workspace};
use crate::tools::{ToolContext, ToolRegistry};
use crate::util::preview;

/// What a finished session reports back for persistence and display.
#[derive(Debug)]
pub struct SessionOutcome {
    pub message: MessageId,
    pub phase: SessionPhase,
    pub usage: TokenUsage,
    pub cost: CreditCount,
    pub tool_rounds: u32,
    pub cancelled: bool,
    /// Accounting record; absent when the call ran on a custom key.
    pub accounting: Option<UsageEvent>,
}

/// Ephemeral driver for one generation request.
pub struct GenerationSession {
    config: GenerationConfig,
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ModelRegistry>,
    calculator: CostCalculator,
    ledger: Arc<CreditLedger>,
    tools: Arc<ToolRegistry>,
    tree: Arc<RwLock<MessageTree>>,
    conversation: Conversation,
    workspace: Workspace,
    user: User,
    assistant: Option<Assistant>,
    sink: EventSink,
    cancel: Arc<AtomicBool>,
}

impl GenerationSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GenerationConfig,
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ModelRegistry>,
        ledger: Arc<CreditLedger>,
        tools: Arc<ToolRegistry>,
        tree: Arc<RwLock<MessageTree>>,
        conversation: Conversation,
        workspace: Workspace,
        user: User,
        assistant: Option<Assistant>,
    ) -> Self {
        let sink = EventSink::new(config.render_buffer);
        let calculator = CostCalculator::new(Arc::clone(&registry));
        Self {
            config,
            provider,
            registry,
            calculator,
            ledger,
            tools,
            tree,
            conversation,
            workspace,
            user,
            assistant,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Receive the caller-facing event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.sink.subscribe()
    }

    /// Flag checked cooperatively between stream reads. Cancellation
    /// settles with whatever usage accumulated; it is not a failure.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Generate an answer attached to `target_parent`.
    pub async fn run(
        &self,
        target_parent: MessageId,
        model: &str,
    ) -> Result<SessionOutcome, WeftError> {
        let mut phase = SessionPhase::Assembling;

        // Unknown model is a configuration error; nothing was reserved
        // and no message was created.
        let entry = self.registry.resolve(model)?;
        let supports_tools = entry.supports_tools;

        let assembled = {
            let tree = self.tree.read().unwrap();
            super::assemble_context(&tree, target_parent, self.assistant.as_ref(), &self.tools)?
        };
        let mut blocks = assembled.blocks;
        let files = assembled.files;

        advance(&mut phase, SessionPhase::Reserving);
        let estimate = self.calculator.estimate(model, assembled.image_tokens)?;
        let reservation = self.ledger.reserve(self.workspace.id, estimate)?;

        let message_id = {
            let mut tree = self.tree.write().unwrap();
            match tree.attach(Message::assistant_placeholder(target_parent, model)) {
                Ok(id) => id,
                Err(e) => {
                    self.ledger.release(&reservation);
                    return Err(e);
                }
            }
        };

        let mut usage = TokenUsage::default();
        let mut tool_cost = CreditCount::ZERO;
        let mut tool_rounds = 0u32;
        let mut cancelled = false;

        loop {
            advance(&mut phase, SessionPhase::Streaming);
            let request = GenerationRequest {
                model: model.to_string(),
                blocks: blocks.clone(),
                tools: if supports_tools {
                    self.tools.definitions()
                } else {
                    Vec::new()
                },
                max_output_tokens: Some(self.config.max_output_tokens),
                temperature: Some(self.config.temperature),
            };

            let mut stream = match self.provider.stream_message(request).await {
                Ok(stream) => stream,
                Err(e) => return self.fail(&mut phase, &reservation, message_id, e),
            };

            let mut calls: Vec<ToolCallRecord> = Vec::new();
            let mut round_text = String::new();

            loop {
                if self.cancel.load(Ordering::Relaxed) {
                    info!(message = %message_id, "cancelled, settling with accumulated usage");
                    cancelled = true;
                    break;
                }
                match stream.next().await {
                    None => break,
                    Some(Ok(StreamEvent::ContentDelta(delta))) => {
                        self.tree.write().unwrap().append_content(message_id, &delta);
                        round_text.push_str(&delta);
                        self.sink.emit(SessionEvent::ContentDelta(delta));
                    }
                    Some(Ok(StreamEvent::ReasoningDelta(delta))) => {
                        self.tree
                            .write()
                            .unwrap()
                            .append_reasoning(message_id, &delta);
                        self.sink.emit(SessionEvent::ReasoningDelta(delta));
                    }
                    Some(Ok(StreamEvent::ToolCallComplete(call))) => {
                        calls.push(call);
                    }
                    Some(Ok(StreamEvent::UsageFinal(u))) => {
                        usage.accumulate(&u);
                    }
                    Some(Err(e)) => {
                        return self.fail(&mut phase, &reservation, message_id, e);
                    }
                }
            }

            // The answer so far becomes an output block for any further
            // rounds.
            if !round_text.is_empty() {
                blocks.push(ContentBlock::OutputText(round_text));
            }

            if cancelled || calls.is_empty() {
                break;
            }
            if tool_rounds >= self.config.max_tool_rounds {
                warn!(
                    rounds = tool_rounds,
                    "tool round cap reached, settling with best available answer"
                );
                break;
            }

            advance(&mut phase, SessionPhase::ResolvingTools);
            let ctx = ToolContext {
                conversation: &self.conversation,
                workspace: &self.workspace,
                user: &self.user,
                assistant: self.assistant.as_ref(),
                files: &files,
            };

            let mut resolved_any = false;
            for call in calls {
                blocks.push(ContentBlock::ToolCall(call.clone()));
                self.sink.emit(SessionEvent::ToolInvoked {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });

                let Some(tool) = self.tools.find(&call.name) else {
                    debug!(tool = %call.name, "call to unknown tool skipped");
                    continue;
                };

                self.tree
                    .write()
                    .unwrap()
                    .set_call(message_id, Some(call.clone()));
                let output = match tool.call(&ctx, &call.arguments).await {
                    Ok(outcome) => {
                        tool_cost += outcome.cost;
                        outcome.content
                    }
                    // A tool's failure is content for the model, not a
                    // session failure.
                    Err(e) => e.to_string(),
                };
                debug!(tool = %call.name, output = %preview(&output, 120), "tool resolved");
                self.tree.write().unwrap().set_call(message_id, None);

                blocks.push(ContentBlock::ToolOutput {
                    call_id: call.id.clone(),
                    output,
                });
                resolved_any = true;
            }

            if !resolved_any {
                break;
            }
            tool_rounds += 1;
        }

        advance(&mut phase, SessionPhase::Settling);
        let custom_key = self.provider.has_custom_key();
        let real_cost = if custom_key {
            CreditCount::ZERO
        } else {
            match self.calculator.calculate(model, &usage) {
                Ok(cost) => cost + tool_cost,
                Err(e) => return self.fail(&mut phase, &reservation, message_id, e),
            }
        };

        let charged = self.ledger.settle(
            &reservation,
            real_cost,
            self.workspace.allow_negative_balance,
        );

        let final_message = {
            let mut tree = self.tree.write().unwrap();
            tree.finish_message(message_id, Some(charged));
            tree.set_active_leaf(message_id);
            tree.get(message_id).cloned()
        };

        let accounting = (!custom_key).then(|| UsageEvent {
            workspace: self.workspace.id,
            user: self.user.id,
            model: model.to_string(),
            usage,
            cost: charged,
            custom_key,
            created_at: Utc::now(),
        });
        info!(
            workspace = %self.workspace.id,
            model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost = charged.value(),
            tool_rounds,
            cancelled,
            "generation settled"
        );

        if let Some(message) = final_message {
            self.sink.emit(SessionEvent::FinalMessage(Box::new(message)));
        }

        advance(&mut phase, SessionPhase::Completed);
        Ok(SessionOutcome {
            message: message_id,
            phase,
            usage,
            cost: charged,
            tool_rounds,
            cancelled,
            accounting,
        })
    }

    /// Terminal failure: release the hold, keep whatever streamed.
    fn fail(
        &self,
        phase: &mut SessionPhase,
        reservation: &Reservation,
        message_id: MessageId,
        err: WeftError,
    ) -> Result<SessionOutcome, WeftError> {
        warn!(error = %err, message = %message_id, "generation failed, releasing reservation");
        self.ledger.release(reservation);
        // Partial content already forwarded stays in the tree, marked
        // terminal — the user must still see what was generated.
        self.tree.write().unwrap().finish_message(message_id, None);
        self.sink.emit(SessionEvent::Error(err.to_string()));
        advance(phase, SessionPhase::Failed);
        Err(err)
    }
}

fn advance(phase: &mut SessionPhase, next: SessionPhase) {
    debug_assert!(
        phase.can_transition_to(next),
        "illegal session transition {phase:?} → {next:?}"
    );
    debug!(from = ?phase, to = ?next, "session phase");
    *phase = next;
}
