//! Randomness source for the server.
//!
//! Connection ids and username suggestions both need random numbers. Routing
//! them through [`Environment`] lets tests substitute a seeded generator and
//! get reproducible suggestions.

/// Source of random bytes.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`.
    fn random_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        self.random_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    /// Random value in `0..bound`. Returns 0 when `bound` is 0.
    fn random_below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.random_u64() % bound
    }
}

/// Production environment backed by the OS RNG.
///
/// # Security
///
/// Uses `getrandom`, so connection ids are unpredictable to peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // Only reachable on platforms without an OS RNG.
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        assert_ne!(bytes1, bytes2);
    }

    #[test]
    fn random_below_stays_in_range() {
        let env = SystemEnv::new();
        for _ in 0..1000 {
            assert!(env.random_below(7) < 7);
        }
        assert_eq!(env.random_below(0), 0);
    }
}
