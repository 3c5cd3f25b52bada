//! Username normalization and collision suggestions.

use parley_proto::{SERVER_SENDER, notice};

use crate::system_env::Environment;

/// Suffix range for the first suggestions.
const INITIAL_SUFFIX_RANGE: u64 = 100;

/// Attempts per suffix range before widening it tenfold.
const ATTEMPTS_PER_RANGE: u32 = 10;

/// Attempts before falling back to a connection-specific suffix.
const MAX_SUGGESTION_ATTEMPTS: u32 = 50;

/// Consecutive suffixes tried from the fallback onwards.
const FALLBACK_ATTEMPTS: u64 = 100;

/// Why a username attempt was rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Empty or whitespace-only.
    Empty,
    /// Longer than the configured limit after normalization.
    TooLong {
        /// Limit in characters.
        max: usize,
    },
}

impl Rejection {
    /// Notice text sent back to the client.
    pub fn notice(&self) -> String {
        match self {
            Self::Empty => notice::USERNAME_EMPTY.to_string(),
            Self::TooLong { max } => notice::username_too_long(*max),
        }
    }
}

/// Replace every whitespace run with `-` and check the result.
///
/// Leading and trailing whitespace is replaced, not trimmed: `" bob"` becomes
/// `"-bob"`.
pub fn normalize(raw: &str, max_len: usize) -> Result<String, Rejection> {
    if raw.trim().is_empty() {
        return Err(Rejection::Empty);
    }

    let mut name = String::with_capacity(raw.len());
    let mut in_whitespace = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                name.push('-');
            }
            in_whitespace = true;
        } else {
            name.push(c);
            in_whitespace = false;
        }
    }

    if name.chars().count() > max_len {
        return Err(Rejection::TooLong { max: max_len });
    }
    Ok(name)
}

/// Whether `name` may never be registered.
///
/// The server's own sender name is reserved so notices cannot be spoofed.
pub fn is_reserved(name: &str) -> bool {
    name.eq_ignore_ascii_case(SERVER_SENDER)
}

/// Propose an unused alternative to `taken`.
///
/// Appends a random numeric suffix and retries until `is_taken` says the
/// candidate is free, widening the suffix range as attempts accumulate. If
/// every random candidate is taken, walks consecutive suffixes starting at
/// `fallback_suffix`. Every candidate fits within `max_len`, differs from
/// `taken`, and is checked against `is_taken` and the reserved names.
///
/// Returns `None` when nothing free was found. The suggestion is not
/// reserved; a client that adopts it goes through registration like any
/// other attempt.
pub fn suggest<E: Environment>(
    env: &E,
    taken: &str,
    max_len: usize,
    fallback_suffix: u64,
    is_taken: impl Fn(&str) -> bool,
) -> Option<String> {
    let is_free = |candidate: &str| {
        !candidate.is_empty()
            && candidate != taken
            && !is_reserved(candidate)
            && !is_taken(candidate)
    };

    let mut range = INITIAL_SUFFIX_RANGE;
    for attempt in 1..=MAX_SUGGESTION_ATTEMPTS {
        let candidate = with_suffix(taken, env.random_below(range), max_len);
        if is_free(&candidate) {
            return Some(candidate);
        }
        if attempt % ATTEMPTS_PER_RANGE == 0 {
            range = range.saturating_mul(10);
        }
    }

    (0..FALLBACK_ATTEMPTS)
        .map(|step| with_suffix(taken, fallback_suffix.wrapping_add(step), max_len))
        .find(|candidate| is_free(candidate))
}

/// `base` followed by `suffix`, shortened to `max_len` characters. The base
/// gives way first; a suffix longer than the limit keeps its low digits.
fn with_suffix(base: &str, suffix: u64, max_len: usize) -> String {
    let digits = suffix.to_string();
    let digits = &digits[digits.len().saturating_sub(max_len)..];
    let keep = max_len - digits.len();
    let base: String = base.chars().take(keep).collect();
    format!("{base}{digits}")
}
