//! Admin session tokens.
//!
//! Unlike API-key secrets, session tokens are looked up by their hash (the
//! store indexes `admin_sessions` by `token_hash`), so the hash must be
//! deterministic — Argon2's random salt would make every hash unrecoverable
//! for lookup. HMAC-SHA256 with a server-held key gives a deterministic,
//! unforgeable digest: resolves the polarity question of "which hash
//! function" in favor of one that supports point lookups, at the cost of a
//! shared secret the server must hold (as opposed to a per-record salt).

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generates a new random session token: 32 bytes of CSPRNG output, hex
/// encoded. This is what's set in the client's cookie; only its hash is
/// stored server-side.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hashes a session token for storage/lookup with the server's session key.
pub fn hash_token(session_key: &[u8], token: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(session_key).expect("HMAC accepts keys of any length");
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a presented token against a stored hash in constant time. Used
/// for the double-submit anti-forgery comparison too: both sides are
/// already-hex strings of equal expected length, so a byte-wise constant-time
/// compare is sufficient without re-deriving anything.
pub fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
