//! Secret hashing for API-key secrets and admin passwords.
//!
//! Argon2id with per-hash random salts, via the `argon2` crate's own
//! PHC-string format (`$argon2id$v=19$...`) so the salt and parameters travel
//! with the hash. Verification is constant-time with respect to the
//! candidate secret: `argon2::PasswordHash::verify_password` compares
//! digests without an early-exit short-circuit.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;

use flagz_core::{FlagzError, FlagzResult};

/// Hashes a plaintext secret for storage. Never call this on anything
/// already stored; it always produces a new salt.
pub fn hash_secret(secret: &str) -> FlagzResult<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| FlagzError::fatal(format!("password hashing failed: {e}")))
}

/// Verifies a plaintext secret against a stored PHC hash string. Returns
/// `false` for a malformed stored hash rather than erroring, since that
/// should never be distinguishable from "wrong secret" to the caller.
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
}

/// Generates a new random API-key secret: 32 bytes of CSPRNG output, hex
/// encoded. Returned once at issuance; only `hash_secret`'s output is kept.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_secret_verifies_against_its_own_hash() {
        let secret = generate_secret();
        let hash = hash_secret(&secret).unwrap();
        assert!(verify_secret(&secret, &hash));
    }

    #[test]
    fn the_wrong_secret_does_not_verify() {
        let hash = hash_secret("correct-secret").unwrap();
        assert!(!verify_secret("wrong-secret", &hash));
    }

    #[test]
    fn a_malformed_stored_hash_is_treated_as_a_mismatch_not_an_error() {
        assert!(!verify_secret("anything", "not-a-valid-phc-hash"));
    }

    #[test]
    fn two_hashes_of_the_same_secret_differ_by_salt() {
        let secret = "same-secret";
        let a = hash_secret(secret).unwrap();
        let b = hash_secret(secret).unwrap();
        assert_ne!(a, b);
        assert!(verify_secret(secret, &a));
        assert!(verify_secret(secret, &b));
    }
}
