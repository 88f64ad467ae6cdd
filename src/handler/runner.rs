//! The capability-invocation loop shared by every handler

use super::{Handler, HAND_OFF};
use crate::budget::StepBudget;
use crate::capabilities::{CapabilityContext, CapabilityOutput};
use crate::generation::{Generation, GenerationRequest, GenerationService};
use crate::llm::LlmError;
use crate::state::{CapabilityRequest, ConversationState, Message, StateError, StateUpdate};
use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Reply used when a handler never produced any text
pub const FALLBACK_REPLY: &str =
    "Désolé, je n'ai pas pu finaliser ma réponse. Peux-tu reformuler ta demande ?";

/// How a handler run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Final answer appended
    Final,
    /// Round cap reached; best-effort answer appended
    Exhausted,
    /// Global step ceiling reached; nothing appended for the unfinished round
    BudgetExceeded,
    /// Caller cancelled; completed rounds are kept
    Cancelled,
}

#[derive(Debug)]
pub struct LoopOutcome {
    pub state: ConversationState,
    pub status: LoopStatus,
    pub generation_calls: u32,
}

/// Fatal loop failures, carrying the state accumulated before the failure
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Generation failed: {source}")]
    Generation {
        source: LlmError,
        state: Box<ConversationState>,
    },
    #[error("{source}")]
    InvalidUpdate {
        source: StateError,
        state: Box<ConversationState>,
    },
}

impl LoopError {
    pub fn into_state(self) -> ConversationState {
        match self {
            LoopError::Generation { state, .. } | LoopError::InvalidUpdate { state, .. } => *state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HandOffInput {
    question: String,
}

/// One executed request: its result message and any delegation it recorded
struct Dispatched {
    result: Message,
    delegation: Option<String>,
}

/// Drives one handler: generate, execute requested capabilities, repeat
pub struct HandlerLoop<'a> {
    handler: &'a Handler,
    generation: &'a dyn GenerationService,
    max_rounds: u32,
    session_id: &'a str,
}

impl<'a> HandlerLoop<'a> {
    pub fn new(
        handler: &'a Handler,
        generation: &'a dyn GenerationService,
        max_rounds: u32,
        session_id: &'a str,
    ) -> Self {
        Self {
            handler,
            generation,
            max_rounds,
            session_id,
        }
    }

    /// Run until a final answer, the round cap, the step ceiling or
    /// cancellation. Each round's update is applied atomically.
    pub async fn run(
        &self,
        state: ConversationState,
        budget: &mut StepBudget,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, LoopError> {
        let kind = self.handler.kind();
        let start = state.transcript.len();
        let definitions = self.handler.definitions();
        let mut state = state;
        let mut rounds = 0u32;

        let outcome = |state, status, rounds| LoopOutcome {
            state,
            status,
            generation_calls: rounds,
        };

        loop {
            if cancel.is_cancelled() {
                tracing::info!(handler = %kind, rounds, "Handler loop cancelled");
                return Ok(outcome(state, LoopStatus::Cancelled, rounds));
            }

            if rounds >= self.max_rounds {
                tracing::warn!(handler = %kind, rounds, "Capability loop exhausted");
                let reply = best_effort_reply(state.transcript.get(start..).unwrap_or_default());
                let update = self.finish(&state, start, reply);
                let state = apply(state, update)?;
                return Ok(outcome(state, LoopStatus::Exhausted, rounds));
            }

            if !budget.consume() {
                tracing::warn!(handler = %kind, rounds, limit = budget.limit(), "Turn step budget exceeded");
                return Ok(outcome(state, LoopStatus::BudgetExceeded, rounds));
            }
            rounds += 1;

            let request = GenerationRequest {
                handler: kind,
                instructions: self.handler.instructions(&state),
                transcript: state.transcript.clone(),
                capabilities: definitions.clone(),
                temperature: self.handler.profile().temperature,
            };
            tracing::debug!(
                handler = %kind,
                step = budget.used(),
                remaining = budget.remaining(),
                round = rounds,
                "Generating"
            );

            let generation = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!(handler = %kind, "Generation cancelled");
                    return Ok(outcome(state, LoopStatus::Cancelled, rounds));
                }
                result = self.generation.generate(&request) => result,
            };
            let generation = match generation {
                Ok(g) => g,
                Err(source) => {
                    return Err(LoopError::Generation {
                        source,
                        state: Box::new(state),
                    })
                }
            };

            match generation {
                Generation::Requests { text, requests } if !requests.is_empty() => {
                    let ctx = CapabilityContext::new(cancel.clone(), self.session_id);
                    // Results are collected in request order regardless of completion order
                    let dispatched =
                        join_all(requests.iter().map(|r| self.dispatch(r, ctx.clone()))).await;

                    let text = text.map(|t| self.screen(&state, t));
                    let mut update = StateUpdate::new()
                        .with_message(Message::assistant_with_requests(text, requests));
                    for d in dispatched {
                        update.messages.push(d.result);
                        if let Some(question) = d.delegation {
                            update = update.set_delegation(question);
                        }
                    }
                    state = apply(state, update)?;
                }
                Generation::Requests { text, .. } => {
                    let update = self.finish(&state, start, text.unwrap_or_default());
                    let state = apply(state, update)?;
                    return Ok(outcome(state, LoopStatus::Final, rounds));
                }
                Generation::Answer(text) => {
                    let update = self.finish(&state, start, text);
                    let state = apply(state, update)?;
                    tracing::debug!(handler = %kind, rounds, "Handler answered");
                    return Ok(outcome(state, LoopStatus::Final, rounds));
                }
            }
        }
    }

    /// Interim text passes the same disclosure filter as the final reply
    fn screen(&self, state: &ConversationState, text: String) -> String {
        match self.handler.profile().post_processor {
            Some(processor) => processor.screen(&state.transcript, text),
            None => text,
        }
    }

    /// Final assistant message plus whatever the post-processor adds
    fn finish(&self, state: &ConversationState, start: usize, reply: String) -> StateUpdate {
        let (reply, extra) = match self.handler.profile().post_processor {
            Some(processor) => processor.process(
                &state.transcript,
                state.transcript.get(start..).unwrap_or_default(),
                reply,
            ),
            None => (reply, StateUpdate::new()),
        };
        StateUpdate::new()
            .with_message(Message::assistant(reply))
            .merge(extra)
    }

    async fn dispatch(&self, request: &CapabilityRequest, ctx: CapabilityContext) -> Dispatched {
        let kind = self.handler.kind();

        if request.name == HAND_OFF && self.handler.may_request(HAND_OFF) {
            return match serde_json::from_value::<HandOffInput>(request.arguments.clone()) {
                Ok(input) if !input.question.trim().is_empty() => {
                    tracing::info!(handler = %kind, correlation_id = %request.id, "Delegation recorded");
                    Dispatched {
                        result: Message::capability_result(
                            request,
                            "Question transmise. Elle sera traitée au prochain message du client.",
                            false,
                        ),
                        delegation: Some(input.question),
                    }
                }
                _ => Dispatched {
                    result: Message::capability_result(request, "Invalid input: question is required", true),
                    delegation: None,
                },
            };
        }

        let output = match self
            .handler
            .capabilities()
            .execute(&request.name, request.arguments.clone(), ctx)
            .await
        {
            Some(output) => output,
            None => CapabilityOutput::error(format!(
                "Capability {} is not available to {kind}",
                request.name
            )),
        };

        tracing::info!(
            handler = %kind,
            capability = %request.name,
            correlation_id = %request.id,
            success = output.success,
            "Capability executed"
        );

        Dispatched {
            result: Message::capability_result(request, output.output, !output.success),
            delegation: None,
        }
    }
}

fn apply(state: ConversationState, update: StateUpdate) -> Result<ConversationState, LoopError> {
    let before = state.clone();
    state.apply(update).map_err(|source| {
        tracing::error!(error = %source, transcript_len = before.transcript.len(), "Rejected state update");
        LoopError::InvalidUpdate {
            source,
            state: Box::new(before),
        }
    })
}

/// Last non-empty assistant text of the run, or the fixed fallback
pub fn best_effort_reply(run: &[Message]) -> String {
    run.iter()
        .rev()
        .filter(|m| m.role == crate::state::Role::Assistant)
        .find_map(Message::text)
        .map_or_else(|| FALLBACK_REPLY.to_string(), str::to_string)
}
