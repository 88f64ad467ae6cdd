//! Per-turn graph driver
//!
//! Composes the router and the four handler loops into one turn:
//! user message in, routing, one handler run, state out. The driver owns the
//! state for the duration of the turn and is its only writer; it keeps
//! nothing between turns.

#[cfg(test)]
mod proptests;

use crate::budget::StepBudget;
use crate::capabilities::CapabilityRegistry;
use crate::generation::GenerationService;
use crate::handler::{Handler, HandlerKind, HandlerLoop, LoopError, LoopStatus, FALLBACK_REPLY};
use crate::router::{Router, RoutingError};
use crate::state::{ConversationState, Message, StateUpdate};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Short reply shown instead of raw error text
pub const APOLOGY: &str =
    "Désolé, je rencontre un souci technique. Peux-tu réessayer dans un instant ?";

pub const DEFAULT_MAX_STEPS: u32 = 20;
pub const DEFAULT_MAX_CAPABILITY_ROUNDS: u32 = 8;

/// Ceilings applied to every turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimits {
    /// Global steps: router evaluations plus generation calls
    pub max_steps: u32,
    /// Generation rounds per handler run
    pub max_capability_rounds: u32,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_capability_rounds: DEFAULT_MAX_CAPABILITY_ROUNDS,
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    /// The handler never converged; a best-effort answer was appended
    CapabilityLoopExhausted,
    /// Global ceiling tripped; state returned as accumulated
    TurnBudgetExceeded,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: ConversationState,
    /// Handler the turn was dispatched to, if routing completed
    pub route: Option<HandlerKind>,
    pub status: TurnStatus,
    pub steps_used: u32,
    turn_start: usize,
}

impl TurnOutcome {
    /// Text to show the user for this turn
    pub fn reply(&self) -> &str {
        match self.status {
            TurnStatus::Completed | TurnStatus::CapabilityLoopExhausted => self
                .turn_messages()
                .iter()
                .rev()
                .find(|m| m.is_final_answer())
                .and_then(Message::text)
                .unwrap_or(FALLBACK_REPLY),
            TurnStatus::TurnBudgetExceeded | TurnStatus::Cancelled => APOLOGY,
        }
    }

    /// Messages appended during this turn, user message included
    pub fn turn_messages(&self) -> &[Message] {
        self.state.transcript.get(self.turn_start..).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnErrorKind {
    /// Classifier returned a label outside the fixed set
    RoutingContract,
    /// Internal contract violation
    InvalidUpdate,
    /// Generation service failed after retries
    Generation,
}

impl fmt::Display for TurnErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnErrorKind::RoutingContract => write!(f, "routing contract violation"),
            TurnErrorKind::InvalidUpdate => write!(f, "invalid state update"),
            TurnErrorKind::Generation => write!(f, "generation failure"),
        }
    }
}

/// Fatal turn failure with the state accumulated before it
#[derive(Debug, Error)]
#[error("Turn failed ({kind}): {message}")]
pub struct TurnError {
    pub kind: TurnErrorKind,
    pub message: String,
    pub state: Box<ConversationState>,
}

impl TurnError {
    fn new(kind: TurnErrorKind, message: impl Into<String>, state: ConversationState) -> Self {
        Self {
            kind,
            message: message.into(),
            state: Box::new(state),
        }
    }

    pub fn apology(&self) -> &'static str {
        APOLOGY
    }

    /// Accumulated state with the apology appended
    pub fn into_degraded_state(self) -> ConversationState {
        let state = *self.state;
        let fallback = state.clone();
        state
            .apply(StateUpdate::new().with_message(Message::assistant(APOLOGY)))
            .unwrap_or(fallback)
    }
}

impl From<LoopError> for TurnError {
    fn from(err: LoopError) -> Self {
        let kind = match &err {
            LoopError::Generation { .. } => TurnErrorKind::Generation,
            LoopError::InvalidUpdate { .. } => TurnErrorKind::InvalidUpdate,
        };
        let message = err.to_string();
        TurnError::new(kind, message, err.into_state())
    }
}

/// Executes exactly one turn per call
pub struct GraphDriver {
    generation: Arc<dyn GenerationService>,
    handlers: HashMap<HandlerKind, Handler>,
    limits: TurnLimits,
    session_id: String,
}

impl GraphDriver {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        registry: &CapabilityRegistry,
        limits: TurnLimits,
    ) -> Self {
        let handlers = HandlerKind::ALL
            .into_iter()
            .map(|kind| (kind, Handler::new(kind, registry)))
            .collect();
        Self {
            generation,
            handlers,
            limits,
            session_id: "default".to_string(),
        }
    }

    /// Session the capability backends scope their data by
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[allow(dead_code)] // The CLI always passes its interrupt token
    pub async fn run_turn(
        &self,
        state: ConversationState,
        user_message: &str,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn_with_cancel(state, user_message, CancellationToken::new())
            .await
    }

    pub async fn run_turn_with_cancel(
        &self,
        state: ConversationState,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let span = tracing::info_span!(
            "turn",
            session = %self.session_id,
            turn_start = state.transcript.len()
        );
        self.turn(state, user_message, cancel).instrument(span).await
    }

    async fn turn(
        &self,
        state: ConversationState,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let turn_start = state.transcript.len();
        let mut budget = StepBudget::new(self.limits.max_steps);

        let state = apply(state, StateUpdate::new().with_message(Message::user(user_message)))?;

        let finish = |state: ConversationState,
                      route: Option<HandlerKind>,
                      status: TurnStatus,
                      budget: &StepBudget| {
            if status == TurnStatus::TurnBudgetExceeded {
                tracing::warn!(steps = budget.used(), limit = budget.limit(), "Turn budget exceeded");
            }
            tracing::info!(status = ?status, steps = budget.used(), "Turn finished");
            debug_assert!(state.is_well_formed(), "turn left an unanswered capability request");
            TurnOutcome {
                state,
                route,
                status,
                steps_used: budget.used(),
                turn_start,
            }
        };

        if cancel.is_cancelled() {
            return Ok(finish(state, None, TurnStatus::Cancelled, &budget));
        }
        if !budget.consume() {
            return Ok(finish(state, None, TurnStatus::TurnBudgetExceeded, &budget));
        }

        let router = Router::new(self.generation.as_ref());
        let routed = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = router.route(&state) => Some(result),
        };
        let Some(routed) = routed else {
            return Ok(finish(state, None, TurnStatus::Cancelled, &budget));
        };
        let decision = match routed {
            Ok(decision) => decision,
            Err(err @ RoutingError::ContractViolation { .. }) => {
                return Err(TurnError::new(TurnErrorKind::RoutingContract, err.to_string(), state));
            }
            Err(err @ RoutingError::Generation(_)) => {
                return Err(TurnError::new(TurnErrorKind::Generation, err.to_string(), state));
            }
        };

        let handler_kind = decision.handler;
        let state = apply(state, decision.update)?;

        let Some(handler) = self.handlers.get(&handler_kind) else {
            let message = format!("No handler configured for {handler_kind}");
            tracing::error!(handler = %handler_kind, "Missing handler");
            return Err(TurnError::new(TurnErrorKind::InvalidUpdate, message, state));
        };

        let outcome = HandlerLoop::new(
            handler,
            self.generation.as_ref(),
            self.limits.max_capability_rounds,
            &self.session_id,
        )
        .run(state, &mut budget, &cancel)
        .await?;

        let status = match outcome.status {
            LoopStatus::Final => TurnStatus::Completed,
            LoopStatus::Exhausted => TurnStatus::CapabilityLoopExhausted,
            LoopStatus::BudgetExceeded => TurnStatus::TurnBudgetExceeded,
            LoopStatus::Cancelled => TurnStatus::Cancelled,
        };
        Ok(finish(outcome.state, Some(handler_kind), status, &budget))
    }
}

fn apply(state: ConversationState, update: StateUpdate) -> Result<ConversationState, TurnError> {
    let before = state.clone();
    state.apply(update).map_err(|err| {
        tracing::error!(error = %err, transcript_len = before.transcript.len(), "Rejected state update");
        TurnError::new(TurnErrorKind::InvalidUpdate, err.to_string(), before)
    })
}
