// src/channel/routing.rs

//! Exchange routing rules.
//!
//! Direct exchanges route on exact key equality. Topic exchanges split keys
//! into `.`-separated words; in a binding pattern `*` matches exactly one word
//! and `#` matches zero or more words.

use crate::types::ExchangeType;

pub fn routes(exchange_type: ExchangeType, binding: &str, routing_key: &str) -> bool {
    match exchange_type {
        ExchangeType::Direct => binding == routing_key,
        ExchangeType::Topic => topic_matches(binding, routing_key),
    }
}

pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}
