//! Fuzz target for username normalization and suggestions
//!
//! # Invariants
//!
//! - NEVER panic on any input string or length limit
//! - Accepted names contain no whitespace and fit the limit
//! - Blank input is always rejected as empty
//! - Normalization is idempotent
//! - Suggestions are never empty, fit the limit, and avoid taken or reserved names

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_server::{
    Environment,
    username::{self, Rejection},
};

/// Replays fuzzer-chosen bytes as randomness.
#[derive(Clone)]
struct ScriptedEnv(u64);

impl Environment for ScriptedEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.0.to_le_bytes()[i % 8];
        }
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    raw: String,
    max_len: u8,
    taken: Vec<String>,
    seed: u64,
    fallback: u32,
}

fuzz_target!(|input: FuzzInput| {
    let max_len = usize::from(input.max_len.max(1));

    match username::normalize(&input.raw, max_len) {
        Ok(name) => {
            assert!(!name.is_empty());
            assert!(!name.chars().any(char::is_whitespace));
            assert!(name.chars().count() <= max_len);
            assert_eq!(username::normalize(&name, max_len), Ok(name.clone()));

            let taken: HashSet<String> =
                input.taken.into_iter().chain(std::iter::once(name.clone())).collect();
            let suggestion = username::suggest(
                &ScriptedEnv(input.seed),
                &name,
                max_len,
                u64::from(input.fallback),
                |candidate| taken.contains(candidate),
            );
            if let Some(suggestion) = suggestion {
                assert!(!suggestion.is_empty());
                assert!(suggestion.chars().count() <= max_len);
                assert!(!taken.contains(&suggestion));
                assert!(!username::is_reserved(&suggestion));
            }
        },
        Err(Rejection::Empty) => assert!(input.raw.trim().is_empty()),
        Err(Rejection::TooLong { max }) => assert_eq!(max, max_len),
    }
});
