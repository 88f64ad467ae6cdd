//! Property-based tests for whole turns

use super::*;
use crate::testing::{test_backends, MockGeneration};
use proptest::prelude::*;
use serde_json::json;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn arb_prior_transcript() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(
        ("[a-z ]{1,20}", "[a-z ]{1,20}").prop_map(|(q, a)| vec![Message::user(q), Message::assistant(a)]),
        0..4,
    )
    .prop_map(|pairs| pairs.into_iter().flatten().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Any ceiling leaves a well-formed state whose prior transcript is intact
    #[test]
    fn prop_turn_budget_is_safe(
        prior in arb_prior_transcript(),
        rounds in 0usize..6,
        max_steps in 0u32..10,
    ) {
        let generation = Arc::new(MockGeneration::new());
        generation.queue_label("SEARCH_AGENT");
        for i in 0..rounds {
            generation.queue_requests(vec![(
                format!("call_{i}").as_str(),
                "search_properties",
                json!({"city": "Rabat"}),
            )]);
        }
        generation.queue_answer("Voilà");

        let registry = CapabilityRegistry::standard(&test_backends().backends()).unwrap();
        let limits = TurnLimits { max_steps, max_capability_rounds: 100 };
        let driver = GraphDriver::new(generation.clone(), &registry, limits);

        let state = ConversationState { transcript: prior.clone(), ..Default::default() };
        let out = block_on(driver.run_turn(state, "Un studio à Rabat")).unwrap();

        prop_assert!(out.state.is_well_formed());
        prop_assert!(out.steps_used <= max_steps);
        prop_assert_eq!(&out.state.transcript[..prior.len()], prior.as_slice());

        // router + (rounds + 1) generations
        let needed = u32::try_from(rounds).unwrap() + 2;
        if max_steps >= needed {
            prop_assert_eq!(out.status, TurnStatus::Completed);
            prop_assert_eq!(out.state.transcript.len(), prior.len() + 2 * rounds + 2);
        } else {
            prop_assert_eq!(out.status, TurnStatus::TurnBudgetExceeded);
            prop_assert_eq!(out.reply(), APOLOGY);
        }
    }
}
