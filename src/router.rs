//! Routing cascade
//!
//! Three tiers evaluated in order, first match wins:
//! 1. reflex: a 24-character hex property id in the latest user message
//!    routes to negotiation and becomes the active entity;
//! 2. delegation: a pending hand-off is replayed as a synthetic user message
//!    to the legal advisor (legal vocabulary) or general chat;
//! 3. classification by the generation service, label validated.
//!
//! Every evaluation clears `pending_delegation`, whichever tier decides.

#[cfg(test)]
mod proptests;

use crate::generation::{ClassificationRequest, GenerationService};
use crate::handler::{prompts, HandlerKind};
use crate::llm::LlmError;
use crate::state::{ConversationState, Message, StateUpdate};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Temperature of the classification call
const ROUTER_TEMPERATURE: f32 = 0.0;

/// Vocabulary sending a delegated question to the legal advisor
pub const LEGAL_VOCABULARY: [&str; 7] =
    ["loi", "taxe", "contrat", "notaire", "légal", "bail", "procédure"];

static PROPERTY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-f0-9]{24}\b").expect("property id pattern is valid"));

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Classifier returned {label:?}, expected one of {expected:?}")]
    ContractViolation {
        label: String,
        expected: Vec<&'static str>,
    },
    #[error("Classification failed: {0}")]
    Generation(#[from] LlmError),
}

/// Which tier decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTier {
    Reflex,
    Delegation,
    Classification,
}

/// Routing decision and the state update that goes with it
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub handler: HandlerKind,
    pub tier: RouteTier,
    pub update: StateUpdate,
}

/// First property id in `text`, as written
pub fn detect_property_id(text: &str) -> Option<&str> {
    PROPERTY_ID.find(text).map(|m| m.as_str())
}

/// Handler receiving a delegated question
///
/// Matches vocabulary as substrings so inflected forms ("lois", "contrats")
/// count. Unrelated words that embed a term route to legal too: "emploi"
/// and "exploitation" both contain "loi".
pub fn delegation_target(question: &str) -> HandlerKind {
    let lowered = question.to_lowercase();
    if LEGAL_VOCABULARY.iter().any(|w| lowered.contains(w)) {
        HandlerKind::Legal
    } else {
        HandlerKind::GeneralChat
    }
}

pub struct Router<'a> {
    generation: &'a dyn GenerationService,
}

impl<'a> Router<'a> {
    pub fn new(generation: &'a dyn GenerationService) -> Self {
        Self { generation }
    }

    pub async fn route(&self, state: &ConversationState) -> Result<RouteDecision, RoutingError> {
        let latest = state.latest_user_text().unwrap_or_default();

        if let Some(id) = detect_property_id(latest) {
            if state.pending_delegation.is_some() {
                tracing::debug!(
                    property_id = id,
                    "Property id pre-empted a pending delegation; possible false positive"
                );
            }
            tracing::info!(tier = "reflex", handler = %HandlerKind::Negotiation, property_id = id, "Routed");
            return Ok(RouteDecision {
                handler: HandlerKind::Negotiation,
                tier: RouteTier::Reflex,
                update: StateUpdate::new()
                    .route_to(HandlerKind::Negotiation)
                    .set_active_entity(id)
                    .clear_delegation(),
            });
        }

        if let Some(question) = &state.pending_delegation {
            let handler = delegation_target(question);
            tracing::info!(tier = "delegation", handler = %handler, "Routed");
            return Ok(RouteDecision {
                handler,
                tier: RouteTier::Delegation,
                update: StateUpdate::new()
                    .route_to(handler)
                    .with_message(Message::synthetic_user(question.clone()))
                    .clear_delegation(),
            });
        }

        let labels = HandlerKind::labels();
        let request = ClassificationRequest {
            instructions: prompts::router(&labels),
            transcript: state.transcript.clone(),
            labels: labels.iter().map(ToString::to_string).collect(),
            temperature: ROUTER_TEMPERATURE,
        };
        let label = self.generation.classify(&request).await?;

        let Some(handler) = HandlerKind::from_label(&label) else {
            tracing::error!(
                label = %label,
                expected = ?labels,
                transcript_len = state.transcript.len(),
                "Classifier violated the label contract"
            );
            return Err(RoutingError::ContractViolation {
                label,
                expected: labels,
            });
        };

        tracing::info!(tier = "classification", handler = %handler, "Routed");
        Ok(RouteDecision {
            handler,
            tier: RouteTier::Classification,
            update: StateUpdate::new().route_to(handler).clear_delegation(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGeneration;

    fn state_with(text: &str) -> ConversationState {
        ConversationState {
            transcript: vec![Message::user(text)],
            ..Default::default()
        }
    }

    #[test]
    fn test_detect_property_id() {
        assert_eq!(
            detect_property_id("507f1f77bcf86cd799439011 je veux négocier"),
            Some("507f1f77bcf86cd799439011")
        );
        assert_eq!(
            detect_property_id("ref 507F1F77BCF86CD799439011."),
            Some("507F1F77BCF86CD799439011")
        );
        // 25 hex characters is not an id
        assert_eq!(detect_property_id("507f1f77bcf86cd7994390110"), None);
        assert_eq!(detect_property_id("2 chambres, 5000 MAD"), None);
    }

    #[test]
    fn test_delegation_target() {
        assert_eq!(delegation_target("Quelle TAXE pour un achat ?"), HandlerKind::Legal);
        assert_eq!(delegation_target("Le bail est-il renouvelable ?"), HandlerKind::Legal);
        assert_eq!(delegation_target("Quel temps fait-il à Rabat ?"), HandlerKind::GeneralChat);
    }

    #[test]
    fn test_delegation_target_matches_inside_words() {
        assert_eq!(delegation_target("Quelles LOIS s'appliquent ?"), HandlerKind::Legal);
        // False positives of substring matching
        assert_eq!(delegation_target("J'ai changé d'emploi"), HandlerKind::Legal);
        assert_eq!(delegation_target("Une exploitation agricole ?"), HandlerKind::Legal);
    }

    #[tokio::test]
    async fn test_reflex_tier_skips_classification() {
        let generation = MockGeneration::new();
        let mut state = state_with("507f1f77bcf86cd799439011 je veux négocier");
        state.pending_delegation = Some("Quelle loi ?".to_string());
        state.active_entity_id = Some("aaaaaaaaaaaaaaaaaaaaaaaa".to_string());

        let decision = Router::new(&generation).route(&state).await.unwrap();

        assert_eq!(decision.handler, HandlerKind::Negotiation);
        assert_eq!(decision.tier, RouteTier::Reflex);
        assert_eq!(
            decision.update.active_entity_id,
            Some(Some("507f1f77bcf86cd799439011".to_string()))
        );
        assert_eq!(decision.update.pending_delegation, Some(None));
        assert!(decision.update.messages.is_empty());
        assert!(generation.recorded_classifications().is_empty());
    }

    #[tokio::test]
    async fn test_delegation_replays_question() {
        let generation = MockGeneration::new();
        let mut state = state_with("D'accord, et sinon ?");
        state.pending_delegation = Some("Combien coûte le notaire ?".to_string());

        let decision = Router::new(&generation).route(&state).await.unwrap();

        assert_eq!(decision.handler, HandlerKind::Legal);
        assert_eq!(decision.tier, RouteTier::Delegation);
        assert_eq!(decision.update.messages.len(), 1);
        assert!(decision.update.messages[0].synthetic);
        assert_eq!(decision.update.messages[0].text(), Some("Combien coûte le notaire ?"));
        assert_eq!(decision.update.pending_delegation, Some(None));
        assert!(generation.recorded_classifications().is_empty());
    }

    #[tokio::test]
    async fn test_classification_tier() {
        let generation = MockGeneration::new();
        generation.queue_label("SEARCH_AGENT");
        let state = state_with("Je cherche un appartement à Casablanca, 2 chambres, budget 5000 MAD");

        let decision = Router::new(&generation).route(&state).await.unwrap();

        assert_eq!(decision.handler, HandlerKind::Search);
        assert_eq!(decision.tier, RouteTier::Classification);
        assert_eq!(decision.update.next_handler, Some(HandlerKind::Search));
        assert_eq!(decision.update.pending_delegation, Some(None));

        let sent = &generation.recorded_classifications()[0];
        assert_eq!(sent.labels.len(), 4);
        assert_eq!(sent.transcript.len(), 1);
        assert!(sent.temperature.abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_invalid_label_is_contract_violation() {
        let generation = MockGeneration::new();
        generation.queue_label("REAL_ESTATE");
        let state = state_with("Bonjour");

        let err = Router::new(&generation).route(&state).await.unwrap_err();
        match err {
            RoutingError::ContractViolation { label, expected } => {
                assert_eq!(label, "REAL_ESTATE");
                assert_eq!(expected.len(), 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_classification_error_propagates() {
        let generation = MockGeneration::new();
        generation.queue_classification_error(LlmError::Auth("bad key".to_string()));
        let err = Router::new(&generation).route(&state_with("Salut")).await.unwrap_err();
        assert!(matches!(err, RoutingError::Generation(_)));
    }
}
