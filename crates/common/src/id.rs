//! ID / random-token generation.
//!
//! Message constructors need three distinct activity-id strategies (spec
//! §4.7's `msg_base` id-tag): none, a random dummy suffix, or a stable
//! wrapper derived from the wrapped object's id. This module only supplies
//! the random part; the deterministic forms are built by string formatting
//! in `snac-federation::activities`.

use rand::Rng;

/// Number of hex characters in a generated random suffix.
const TOKEN_LEN: usize = 16;

/// Generates short random hex tokens for activity ids.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator;

impl IdGenerator {
    /// Create a new generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generate a random lowercase-hex token suitable for an activity-id suffix.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..TOKEN_LEN)
            .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_hex_tokens() {
        let gen = IdGenerator::new();
        let a = gen.generate();
        let b = gen.generate();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
