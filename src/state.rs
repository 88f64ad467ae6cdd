//! Shared conversation state
//!
//! `ConversationState` is the only value with cross-turn lifetime. Handlers
//! and the router never mutate it; they return a `StateUpdate` which is
//! merged by [`ConversationState::apply`], the single mutation path.

mod listing;
mod message;

pub use listing::{ordinal_listing, PropertySummary, Transaction, MAX_DISPLAYED_RESULTS};
pub use message::{CapabilityRequest, Message, Role};

use crate::handler::HandlerKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while merging an update
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
}

/// State carried across turns by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub transcript: Vec<Message>,
    /// Last routing decision
    pub next_handler: Option<HandlerKind>,
    /// Last property reference resolved (24-character hex id)
    pub active_entity_id: Option<String>,
    /// Sub-question a handler wants redirected; consumed by the router
    pub pending_delegation: Option<String>,
    /// Most recent listings shown to the user, for ordinal references
    #[serde(default)]
    pub last_search_results: Vec<PropertySummary>,
}

/// Partial update returned by the router and by each handler iteration.
///
/// Scalar fields are only overwritten when set. The nested `Option`s
/// distinguish "leave as is" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub next_handler: Option<HandlerKind>,
    pub active_entity_id: Option<Option<String>>,
    pub pending_delegation: Option<Option<String>>,
    pub last_search_results: Option<Vec<PropertySummary>>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn route_to(mut self, handler: HandlerKind) -> Self {
        self.next_handler = Some(handler);
        self
    }

    pub fn set_active_entity(mut self, id: impl Into<String>) -> Self {
        self.active_entity_id = Some(Some(id.into()));
        self
    }

    pub fn clear_active_entity(mut self) -> Self {
        self.active_entity_id = Some(None);
        self
    }

    pub fn set_delegation(mut self, question: impl Into<String>) -> Self {
        self.pending_delegation = Some(Some(question.into()));
        self
    }

    pub fn clear_delegation(mut self) -> Self {
        self.pending_delegation = Some(None);
        self
    }

    pub fn set_search_results(mut self, results: Vec<PropertySummary>) -> Self {
        self.last_search_results = Some(results);
        self
    }

    /// Fold a later update into this one, later fields winning
    pub fn merge(mut self, later: StateUpdate) -> Self {
        self.messages.extend(later.messages);
        if later.next_handler.is_some() {
            self.next_handler = later.next_handler;
        }
        if later.active_entity_id.is_some() {
            self.active_entity_id = later.active_entity_id;
        }
        if later.pending_delegation.is_some() {
            self.pending_delegation = later.pending_delegation;
        }
        if later.last_search_results.is_some() {
            self.last_search_results = later.last_search_results;
        }
        self
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of the latest user message (synthetic ones included)
    pub fn latest_user_text(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.as_deref())
    }

    /// Last non-empty assistant text
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(Message::text)
    }

    /// True when every capability request has its matching result
    pub fn is_well_formed(&self) -> bool {
        let mut open: HashSet<&str> = HashSet::new();
        for msg in &self.transcript {
            match msg.role {
                Role::Assistant => {
                    if !open.is_empty() {
                        return false;
                    }
                    open = msg.capability_requests.iter().map(|r| r.id.as_str()).collect();
                }
                Role::CapabilityResult => {
                    let Some(id) = msg.correlation_id.as_deref() else {
                        return false;
                    };
                    if !open.remove(id) {
                        return false;
                    }
                }
                Role::User => {}
            }
        }
        open.is_empty()
    }

    /// Merge an update. Messages are appended, set scalar fields overwrite.
    ///
    /// Fails with [`StateError::InvalidUpdate`] when a capability result does
    /// not answer an outstanding request of the most recent assistant
    /// message. Validation happens before any mutation.
    pub fn apply(mut self, update: StateUpdate) -> Result<Self, StateError> {
        self.validate(&update)?;

        self.transcript.extend(update.messages);
        if let Some(handler) = update.next_handler {
            self.next_handler = Some(handler);
        }
        if let Some(active) = update.active_entity_id {
            self.active_entity_id = active;
        }
        if let Some(delegation) = update.pending_delegation {
            self.pending_delegation = delegation;
        }
        if let Some(results) = update.last_search_results {
            self.last_search_results = results;
        }
        Ok(self)
    }

    fn validate(&self, update: &StateUpdate) -> Result<(), StateError> {
        // Requests of the most recent assistant message, minus those answered
        let mut outstanding: HashSet<&str> = HashSet::new();
        if let Some(pos) = self
            .transcript
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        {
            outstanding = self.transcript[pos]
                .capability_requests
                .iter()
                .map(|r| r.id.as_str())
                .collect();
            for answered in &self.transcript[pos + 1..] {
                if let Some(id) = answered.correlation_id.as_deref() {
                    outstanding.remove(id);
                }
            }
        }

        for msg in &update.messages {
            match msg.role {
                Role::Assistant => {
                    outstanding = msg.capability_requests.iter().map(|r| r.id.as_str()).collect();
                }
                Role::CapabilityResult => {
                    let id = msg.correlation_id.as_deref().ok_or_else(|| {
                        StateError::InvalidUpdate(
                            "capability result without correlation id".to_string(),
                        )
                    })?;
                    if !outstanding.remove(id) {
                        return Err(StateError::InvalidUpdate(format!(
                            "capability result {id} does not match an outstanding request of the most recent assistant message"
                        )));
                    }
                }
                Role::User => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str) -> CapabilityRequest {
        CapabilityRequest::new(id, "search_properties", json!({"city": "Rabat"}))
    }

    #[test]
    fn test_apply_appends_and_keeps_unset_fields() {
        let mut state = ConversationState::new();
        state.active_entity_id = Some("507f1f77bcf86cd799439011".to_string());
        state.transcript.push(Message::user("Bonjour"));

        let state = state
            .apply(StateUpdate::new().with_message(Message::assistant("Salut !")))
            .unwrap();

        assert_eq!(state.transcript.len(), 2);
        assert_eq!(
            state.active_entity_id.as_deref(),
            Some("507f1f77bcf86cd799439011")
        );
        assert_eq!(state.last_assistant_text(), Some("Salut !"));
    }

    #[test]
    fn test_apply_overwrites_and_clears() {
        let mut state = ConversationState::new();
        state.active_entity_id = Some("aaaaaaaaaaaaaaaaaaaaaaaa".to_string());
        state.pending_delegation = Some("taxe ?".to_string());

        let state = state
            .apply(
                StateUpdate::new()
                    .route_to(HandlerKind::Search)
                    .clear_active_entity()
                    .clear_delegation(),
            )
            .unwrap();

        assert_eq!(state.next_handler, Some(HandlerKind::Search));
        assert!(state.active_entity_id.is_none());
        assert!(state.pending_delegation.is_none());
    }

    #[test]
    fn test_result_must_answer_latest_assistant() {
        let state = ConversationState::new()
            .apply(
                StateUpdate::new()
                    .with_message(Message::user("Cherche à Rabat"))
                    .with_message(Message::assistant_with_requests(None, vec![request("c1")])),
            )
            .unwrap();

        let bad = StateUpdate::new().with_message(Message::capability_result(
            &request("c2"),
            "[]",
            false,
        ));
        let err = state.clone().apply(bad).unwrap_err();
        assert!(matches!(err, StateError::InvalidUpdate(_)));

        let good = StateUpdate::new().with_message(Message::capability_result(
            &request("c1"),
            "[]",
            false,
        ));
        let state = state.apply(good).unwrap();
        assert!(state.is_well_formed());
    }

    #[test]
    fn test_duplicate_result_is_rejected() {
        let state = ConversationState::new()
            .apply(
                StateUpdate::new()
                    .with_message(Message::assistant_with_requests(None, vec![request("c1")]))
                    .with_message(Message::capability_result(&request("c1"), "[]", false)),
            )
            .unwrap();

        let again = StateUpdate::new().with_message(Message::capability_result(
            &request("c1"),
            "[]",
            false,
        ));
        assert!(state.apply(again).is_err());
    }

    #[test]
    fn test_result_against_older_assistant_is_rejected() {
        let state = ConversationState::new()
            .apply(
                StateUpdate::new()
                    .with_message(Message::assistant_with_requests(None, vec![request("old")]))
                    .with_message(Message::capability_result(&request("old"), "[]", false))
                    .with_message(Message::assistant("Voilà")),
            )
            .unwrap();

        let stale = StateUpdate::new().with_message(Message::capability_result(
            &request("old"),
            "[]",
            false,
        ));
        assert!(state.apply(stale).is_err());
    }

    #[test]
    fn test_failed_apply_leaves_no_partial_state() {
        let state = ConversationState::new();
        let update = StateUpdate::new()
            .with_message(Message::user("x"))
            .with_message(Message::capability_result(&request("nope"), "", false));
        // apply consumes the state; a clone shows validation precedes mutation
        assert!(state.clone().apply(update).is_err());
        assert!(state.transcript.is_empty());
    }

    #[test]
    fn test_merge_later_wins() {
        let merged = StateUpdate::new()
            .set_active_entity("aaaaaaaaaaaaaaaaaaaaaaaa")
            .with_message(Message::user("a"))
            .merge(
                StateUpdate::new()
                    .clear_active_entity()
                    .with_message(Message::assistant("b")),
            );
        assert_eq!(merged.messages.len(), 2);
        assert_eq!(merged.active_entity_id, Some(None));
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let state = ConversationState {
            transcript: vec![Message::user("Salam")],
            next_handler: Some(HandlerKind::GeneralChat),
            ..Default::default()
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_dangling_request_is_not_well_formed() {
        let state = ConversationState {
            transcript: vec![Message::assistant_with_requests(None, vec![request("c1")])],
            ..Default::default()
        };
        assert!(!state.is_well_formed());
    }
}
