//! PKCE (RFC 7636)

use oauth2::PkceCodeChallenge;

/// Verifier and S256 challenge for one authorization request
pub struct PkcePair {
    /// High-entropy verifier kept by the client until the code exchange
    pub verifier: String,
    /// `base64url(sha256(verifier))`, sent on the authorization URL
    pub challenge: String,
}

// Manual Debug impl to prevent verifier exposure in logs
impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    /// Method advertised as `code_challenge_method`
    pub const METHOD: &'static str = "S256";

    /// Generate a pair from 32 random bytes
    pub fn generate() -> Self {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        Self {
            verifier: verifier.secret().clone(),
            challenge: challenge.as_str().to_string(),
        }
    }
}
