//! Access code generation.
//!
//! Codes are 12 lowercase hex characters drawn from the OS RNG. Collision
//! handling is optimistic: the caller inserts with a candidate code and
//! retries on a uniqueness violation, up to the issuer's bound. The bound is
//! explicit configuration so operators can spot a ledger dense enough to
//! exhaust it.

use proctor_core::enrollment::ACCESS_CODE_LEN;
use rand::rngs::OsRng;
use rand::RngCore;

/// Default number of insert attempts before giving up.
pub const DEFAULT_CODE_ATTEMPTS: u32 = 10;

/// Issues candidate access codes.
#[derive(Debug, Clone, Copy)]
pub struct AccessCodeIssuer {
    max_attempts: u32,
}

impl AccessCodeIssuer {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// How many candidate codes a single admission may try.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Draw a uniformly random 12-hex-character code.
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; ACCESS_CODE_LEN / 2];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

impl Default for AccessCodeIssuer {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_ATTEMPTS)
    }
}

/// Normalize an access code from user input.
///
/// Trims, lowercases, and checks the 12-hex shape. Returns None for anything
/// that cannot be a code, so lookups never hit the ledger with garbage.
pub fn normalize(input: &str) -> Option<String> {
    let normalized: String = input.trim().to_ascii_lowercase();
    if normalized.len() != ACCESS_CODE_LEN {
        return None;
    }
    if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(normalized)
}
