// tests/routing_properties.rs

use std::time::Duration;

use proptest::prelude::*;

use interchange::channel::routing::{routes, topic_matches};
use interchange::engine::{Lifecycle, LifecycleState};
use interchange::registration::Backoff;
use interchange::types::ExchangeType;

// Routing keys made of 1..5 short lowercase words.
fn routing_key_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z]{1,6}", 1..5)
}

proptest! {
    #[test]
    fn hash_binding_matches_every_key(words in routing_key_strategy()) {
        let key = words.join(".");
        prop_assert!(topic_matches("#", &key));
        prop_assert!(routes(ExchangeType::Topic, "#", &key));
    }

    #[test]
    fn exact_binding_matches_itself(words in routing_key_strategy()) {
        let key = words.join(".");
        prop_assert!(topic_matches(&key, &key));
        prop_assert!(routes(ExchangeType::Direct, &key, &key));
    }

    #[test]
    fn star_replaces_exactly_one_word(
        words in routing_key_strategy(),
        idx in any::<prop::sample::Index>(),
    ) {
        let key = words.join(".");
        let i = idx.index(words.len());

        let mut pattern = words.clone();
        pattern[i] = "*".to_string();
        prop_assert!(topic_matches(&pattern.join("."), &key));

        // One word too many is never matched by `*`.
        let longer = format!("{key}.extra");
        prop_assert!(!topic_matches(&pattern.join("."), &longer));
    }

    #[test]
    fn trailing_hash_matches_any_suffix(
        prefix in routing_key_strategy(),
        suffix in proptest::collection::vec("[a-z]{1,6}", 0..4),
    ) {
        let pattern = format!("{}.#", prefix.join("."));
        let mut key = prefix.clone();
        key.extend(suffix);
        prop_assert!(topic_matches(&pattern, &key.join(".")));
    }

    #[test]
    fn direct_routing_is_exact(a in "[a-z.]{1,12}", b in "[a-z.]{1,12}") {
        prop_assert_eq!(routes(ExchangeType::Direct, &a, &b), a == b);
    }

    #[test]
    fn exponential_backoff_is_monotonic_and_capped(
        initial_ms in 1u64..1_000,
        extra_ms in 0u64..60_000,
        failures in 1u32..64,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let max = Duration::from_millis(initial_ms + extra_ms);
        let backoff = Backoff::exponential(initial, max);

        let this = backoff.delay_for(failures);
        let next = backoff.delay_for(failures + 1);
        prop_assert!(this <= next);
        prop_assert!(next <= max);
        prop_assert!(backoff.delay_for(1) <= max);
    }
}

#[test]
fn topic_edge_cases() {
    assert!(topic_matches("ep.*", "ep.results"));
    assert!(!topic_matches("ep.*", "ep"));
    assert!(topic_matches("ep.#", "ep"));
    assert!(topic_matches("#.results", "a.b.results"));
    assert!(!topic_matches("ep.results", "ep.tasks"));
    assert!(!routes(ExchangeType::Direct, "#", "anything"));
}

const ALL_STATES: [LifecycleState; 5] = [
    LifecycleState::Initialized,
    LifecycleState::Registering,
    LifecycleState::Running,
    LifecycleState::Quiescing,
    LifecycleState::Stopped,
];

#[test]
fn stopped_is_terminal_and_nothing_moves_backwards() {
    use LifecycleState::*;

    for to in ALL_STATES {
        assert!(!Stopped.can_advance(to), "Stopped -> {to:?}");
    }
    assert!(!Running.can_advance(Registering));
    assert!(!Running.can_advance(Stopped), "running must quiesce first");
    assert!(!Quiescing.can_advance(Running));
    assert!(Stopped.is_terminal());
    assert!(ALL_STATES[..4].iter().all(|s| !s.is_terminal()));
}

#[test]
fn lifecycle_records_each_state_once() {
    use LifecycleState::*;

    let mut lc = Lifecycle::new();
    lc.advance(Registering).expect("register");
    lc.advance(Registering).expect("retry registration");
    lc.advance(Running).expect("run");
    assert!(lc.advance(Registering).is_err());
    lc.advance(Quiescing).expect("quiesce");
    lc.advance(Stopped).expect("stop");

    assert_eq!(lc.state(), Stopped);
    assert_eq!(lc.history(), &[Initialized, Registering, Running, Quiescing, Stopped]);
}
