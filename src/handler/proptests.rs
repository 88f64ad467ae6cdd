//! Property-based tests for handler policy and the capability loop

use super::policy::{amounts_in, evaluate_offer, redact_amounts, OfferDecision};
use super::*;
use crate::budget::StepBudget;
use crate::capabilities::CapabilityRegistry;
use crate::state::{ConversationState, Message, Role};
use crate::testing::{test_backends, MockGeneration};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// (floor, listing) with floor <= listing
fn arb_prices() -> impl Strategy<Value = (u64, u64)> {
    (1_000u64..10_000_000, 0u64..5_000_000).prop_map(|(floor, margin)| (floor, floor + margin))
}

fn grouped(amount: u64, sep: &str) -> String {
    let digits = amount.to_string();
    if sep.is_empty() {
        return digits;
    }
    let mut groups: Vec<String> = Vec::new();
    let mut rest = digits.as_str();
    while rest.len() > 3 {
        let (head, tail) = rest.split_at(rest.len() - 3);
        groups.insert(0, tail.to_string());
        rest = head;
    }
    groups.insert(0, rest.to_string());
    groups.join(sep)
}

/// The amount written with one of the separators a reply may use
fn arb_written_amount(amount: u64) -> impl Strategy<Value = String> {
    prop_oneof![Just(""), Just(" "), Just("."), Just(","), Just("\u{a0}")]
        .prop_map(move |sep| grouped(amount, sep))
}

/// A whole number of thousands written with a scale word or suffix
fn arb_scaled_amount() -> impl Strategy<Value = (u64, String)> {
    (1u64..100_000, 0usize..5).prop_map(|(thousands, form)| {
        let floor = thousands * 1_000;
        let (millions, tenths) = (thousands / 1_000, thousands % 1_000 / 100);
        let whole_tenths = thousands % 100 == 0;
        let written = match form {
            0 => format!("{thousands}K"),
            1 => format!("{thousands} k"),
            2 => format!("{} mille", grouped(thousands, " ")),
            3 if whole_tenths && tenths == 0 => format!("{millions} millions"),
            3 if whole_tenths => format!("{millions},{tenths} million"),
            4 if whole_tenths => format!("{millions}.{tenths} M"),
            _ => format!("{thousands}k"),
        };
        (floor, written)
    })
}

fn arb_reply_with_floor() -> impl Strategy<Value = (u64, String)> {
    let digits = (1_000u64..100_000_000)
        .prop_flat_map(|floor| (Just(floor), arb_written_amount(floor)));
    (
        prop_oneof![digits, arb_scaled_amount()],
        "[a-zA-Zéà ]{0,30}",
        "[a-zA-Zéà ]{0,30}",
    )
        .prop_map(|((floor, written), before, after)| (floor, format!("{before} {written} MAD {after}")))
}

// ============================================================================
// Offer policy
// ============================================================================

proptest! {
    #[test]
    fn prop_offer_decision_partitions((floor, listing) in arb_prices(), offer in 0u64..20_000_000) {
        let decision = evaluate_offer(offer, floor, listing);
        match decision {
            OfferDecision::Accept => prop_assert!(offer >= listing),
            OfferDecision::Decline => prop_assert!(offer < floor),
            OfferDecision::CounterOffer { price } => {
                prop_assert!(floor <= offer && offer < listing);
                prop_assert!(price > offer && price <= listing);
                prop_assert!(price >= floor);
            }
        }
        // pure: same inputs, same decision
        prop_assert_eq!(decision, evaluate_offer(offer, floor, listing));
    }

    #[test]
    fn prop_redaction_removes_floor((floor, reply) in arb_reply_with_floor()) {
        let redacted = redact_amounts(&reply, &HashSet::from([floor]));
        prop_assert!(!amounts_in(&redacted).contains(&floor), "{} -> {}", reply, redacted);
    }

    #[test]
    fn prop_redaction_without_floors_is_identity(reply in "[a-zA-Z0-9 .,]{0,60}") {
        prop_assert_eq!(redact_amounts(&reply, &HashSet::new()), reply);
    }
}

// ============================================================================
// Capability loop
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// N capability rounds then a final answer: N+1 generations, 2N+1 messages
    #[test]
    fn prop_loop_growth(n in 0usize..6, prior in 0usize..4) {
        let registry = CapabilityRegistry::standard(&test_backends().backends()).unwrap();
        let handler = Handler::new(HandlerKind::Legal, &registry);
        let generation = MockGeneration::new();
        for i in 0..n {
            generation.queue_requests(vec![(
                format!("call_{i}").as_str(),
                "query_legal_knowledge",
                json!({"question": "bail"}),
            )]);
        }
        generation.queue_answer("Réponse");

        let mut state = ConversationState::new();
        for i in 0..prior {
            state.transcript.push(Message::user(format!("q{i}")));
            state.transcript.push(Message::assistant(format!("r{i}")));
        }
        state.transcript.push(Message::user("Quel préavis ?"));
        let before = state.transcript.len();

        let mut budget = StepBudget::new(100);
        let out = block_on(
            HandlerLoop::new(&handler, &generation, 100, "s")
                .run(state, &mut budget, &CancellationToken::new()),
        )
        .unwrap();

        prop_assert_eq!(out.status, LoopStatus::Final);
        prop_assert_eq!(generation.recorded_generations().len(), n + 1);
        prop_assert_eq!(out.state.transcript.len() - before, 2 * n + 1);
        prop_assert!(out.state.is_well_formed());
    }

    /// Any step ceiling leaves a well-formed transcript
    #[test]
    fn prop_budget_leaves_well_formed_state(n in 1usize..8, limit in 0u32..8) {
        let registry = CapabilityRegistry::standard(&test_backends().backends()).unwrap();
        let handler = Handler::new(HandlerKind::Search, &registry);
        let generation = MockGeneration::new();
        for i in 0..n {
            generation.queue_requests(vec![
                (format!("a{i}").as_str(), "search_properties", json!({})),
                (format!("b{i}").as_str(), "list_my_alerts", json!({})),
            ]);
        }
        generation.queue_answer("Fin");

        let mut budget = StepBudget::new(limit);
        let state = ConversationState {
            transcript: vec![Message::user("Cherche")],
            ..Default::default()
        };
        let out = block_on(
            HandlerLoop::new(&handler, &generation, 100, "s")
                .run(state, &mut budget, &CancellationToken::new()),
        )
        .unwrap();

        prop_assert!(out.state.is_well_formed());
        prop_assert!(budget.used() <= limit);
        if (limit as usize) <= n {
            prop_assert_eq!(out.status, LoopStatus::BudgetExceeded);
            prop_assert!(out.state.transcript.iter().all(|m| m.role != Role::Assistant || !m.capability_requests.is_empty()));
        } else {
            prop_assert_eq!(out.status, LoopStatus::Final);
        }
    }
}
