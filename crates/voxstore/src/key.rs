//! Cache key derivation
//!
//! A key is the tuple (text, voice, speed, provider). Text is trimmed at the
//! edges only; case, punctuation and inner whitespace change the synthesized
//! audio and stay significant. Speed is rounded to hundredths so float noise
//! (`1.0` vs `1.0000001`) cannot split one logical key into many.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Speed is stored as an integer number of `1 / SPEED_SCALE` steps
pub const SPEED_SCALE: f64 = 100.0;

/// Canonical identity of one cached audio entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    text: String,
    voice: String,
    speed_steps: i64,
    provider: String,
}

impl CacheKey {
    /// Derive the key for a synthesis request.
    ///
    /// Never fails. A non-finite speed collapses to a fixed bucket
    /// (NaN becomes 0, infinities saturate).
    pub fn derive(text: &str, voice: &str, speed: f64, provider: &str) -> Self {
        Self {
            text: text.trim().to_string(),
            voice: voice.to_string(),
            speed_steps: (speed * SPEED_SCALE).round() as i64,
            provider: provider.to_string(),
        }
    }

    /// Normalized text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Voice identifier
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Rounded speed factor
    pub fn speed(&self) -> f64 {
        self.speed_steps as f64 / SPEED_SCALE
    }

    /// Provider identifier
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// SHA-256 hex digest of the key, used to name payload files.
    ///
    /// Every field is length-prefixed so that no two distinct keys share an
    /// encoding (`"a|b" + "c"` vs `"a" + "b|c"`).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [&self.text, &self.voice, &self.provider] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(self.speed_steps.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Free-function form of [`CacheKey::derive`]
pub fn derive_key(text: &str, voice: &str, speed: f64, provider: &str) -> CacheKey {
    CacheKey::derive(text, voice, speed, provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_edges_only() {
        let key = derive_key("  Shields  up, Commander \n", "nova", 1.0, "openai");
        assert_eq!(key.text(), "Shields  up, Commander");
        assert_eq!(key, derive_key("Shields  up, Commander", "nova", 1.0, "openai"));
        assert_ne!(key, derive_key("Shields up, Commander", "nova", 1.0, "openai"));
    }

    #[test]
    fn test_case_is_significant() {
        assert_ne!(
            derive_key("Shields up", "nova", 1.0, "openai"),
            derive_key("shields up", "nova", 1.0, "openai")
        );
    }

    #[test]
    fn test_speed_rounding() {
        let a = derive_key("Jump complete", "nova", 1.0, "openai");
        let b = derive_key("Jump complete", "nova", 1.000_000_1, "openai");
        let c = derive_key("Jump complete", "nova", 1.004, "openai");
        let d = derive_key("Jump complete", "nova", 1.5, "openai");

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
        assert_eq!(d.speed(), 1.5);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_non_finite_speed() {
        let key = derive_key("Understood", "nova", f64::NAN, "openai");
        assert_eq!(key.speed(), 0.0);
        let key = derive_key("Understood", "nova", f64::INFINITY, "openai");
        assert!(key.speed() > 0.0);
    }

    #[test]
    fn test_every_field_changes_fingerprint() {
        let base = derive_key("Lights on", "nova", 1.0, "openai");
        let others = [
            derive_key("Lights off", "nova", 1.0, "openai"),
            derive_key("Lights on", "alloy", 1.0, "openai"),
            derive_key("Lights on", "nova", 1.25, "openai"),
            derive_key("Lights on", "nova", 1.0, "edge"),
        ];
        for other in &others {
            assert_ne!(base.fingerprint(), other.fingerprint());
        }
        assert_eq!(base.fingerprint().len(), 64);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = derive_key("ab", "c", 1.0, "x");
        let b = derive_key("a", "bc", 1.0, "x");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
