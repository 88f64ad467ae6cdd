//! Property-based tests for the routing cascade

use super::*;
use crate::testing::MockGeneration;
use proptest::prelude::*;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn arb_property_id() -> impl Strategy<Value = String> {
    "[a-fA-F0-9]{24}"
}

/// Free text that cannot contain a property id
fn arb_words() -> impl Strategy<Value = String> {
    "[g-zG-Z éèàç,.?!]{0,40}"
}

fn arb_history() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(
        prop_oneof![
            "[a-z ]{1,20}".prop_map(Message::user),
            "[a-z ]{1,20}".prop_map(Message::assistant),
        ],
        0..6,
    )
}

fn arb_label() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("SEARCH_AGENT"),
        Just("NEGOTIATION_AGENT"),
        Just("JURIDIQUE_ADVISOR"),
        Just("GENERAL_CHAT"),
    ]
}

proptest! {
    #[test]
    fn prop_reflex_always_routes_to_negotiation(
        history in arb_history(),
        before in arb_words(),
        id in arb_property_id(),
        after in arb_words(),
        delegation in prop::option::of("[a-z ]{1,20}"),
    ) {
        let mut transcript = history;
        transcript.push(Message::user(format!("{before} {id} {after}")));
        let state = ConversationState {
            transcript,
            pending_delegation: delegation,
            ..Default::default()
        };

        let generation = MockGeneration::new();
        let decision = block_on(Router::new(&generation).route(&state)).unwrap();

        prop_assert_eq!(decision.handler, HandlerKind::Negotiation);
        prop_assert_eq!(decision.update.active_entity_id, Some(Some(id)));
        prop_assert!(generation.recorded_classifications().is_empty());
    }

    #[test]
    fn prop_delegation_cleared_by_every_evaluation(
        text in arb_words(),
        with_id in any::<bool>(),
        delegation in prop::option::of("[a-z ]{1,20}"),
        label in arb_label(),
    ) {
        let text = if with_id { format!("{text} 507f1f77bcf86cd799439011") } else { text };
        let state = ConversationState {
            transcript: vec![Message::user(text)],
            pending_delegation: delegation,
            ..Default::default()
        };
        let generation = MockGeneration::new();
        generation.queue_label(label);

        let decision = block_on(Router::new(&generation).route(&state)).unwrap();
        let next = state.apply(decision.update).unwrap();

        prop_assert!(next.pending_delegation.is_none());
        prop_assert_eq!(next.next_handler, Some(decision.handler));
    }
}
