//! PKCE S256 challenge generation (RFC 7636)
//!
//! The authorization-redirect step binds the authorization code to a
//! client-generated secret: a random `code_verifier` whose SHA-256 digest
//! (the `code_challenge`) rides on the authorization URL.  The verifier is
//! persisted across the redirect round trip and presented at token-exchange
//! time, proving the exchange comes from the client that started the flow.

use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A PKCE challenge pair: the verifier and its derived S256 challenge.
///
/// Created by [`generate`] when the state machine builds the authorization
/// URL.  The challenge method is always `S256`.
///
/// # Examples
///
/// ```
/// use mcprobe::oauth::pkce;
///
/// let pair = pkce::generate().unwrap();
/// assert_eq!(pair.verifier.len(), 43);
/// assert_ne!(pair.verifier, pair.challenge);
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Base64url (no padding) encoding of 32 random bytes; 43 characters.
    /// Sent to the token endpoint in the `code_verifier` parameter.
    pub verifier: String,

    /// Base64url (no padding) SHA-256 digest of the verifier's UTF-8 bytes.
    /// Sent to the authorization endpoint in the `code_challenge` parameter.
    pub challenge: String,
}

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// Computes the S256 challenge for a given verifier string.
///
/// RFC 7636 section 4.2: `BASE64URL(SHA256(ASCII(code_verifier)))`.
pub fn challenge_for_verifier(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generates a fresh PKCE S256 challenge pair.
///
/// The verifier is 32 cryptographically random bytes encoded as base64url
/// without padding.  Infallible in practice; returns `Result` so callers can
/// use `?` uniformly.
pub fn generate() -> Result<PkceChallenge> {
    use rand::RngCore as _;

    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
    let challenge = challenge_for_verifier(&verifier);

    Ok(PkceChallenge { verifier, challenge })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_43_char_verifier() {
        let pair = generate().expect("generate must not fail");
        assert_eq!(
            pair.verifier.len(),
            43,
            "32 random bytes in base64url without padding produces 43 chars"
        );
    }

    #[test]
    fn test_challenge_matches_recomputed_digest() {
        let pair = generate().expect("generate must not fail");
        assert_eq!(pair.challenge, challenge_for_verifier(&pair.verifier));
    }

    #[test]
    fn test_generate_produces_unique_verifiers() {
        let a = generate().expect("first call");
        let b = generate().expect("second call");
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn test_verifier_and_challenge_use_base64url_alphabet() {
        let pair = generate().expect("generate must not fail");
        for s in [&pair.verifier, &pair.challenge] {
            assert!(
                s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "must only contain base64url characters, got: {s}"
            );
            assert!(!s.contains('='), "must not contain padding");
        }
    }

    /// RFC 7636 Appendix B known-answer vector.
    #[test]
    fn test_s256_known_answer_rfc7636_appendix_b() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_for_verifier(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
