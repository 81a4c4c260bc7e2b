//! Signature Verifier (C4).
//!
//! Stateless Ed25519 verification over canonical message bytes. No locks,
//! no I/O, no side effects — verification is CPU-bound and must never be
//! run while holding a shared lock (§5).

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Verify `signature` over `message` under `pubkey`.
///
/// Returns `false` (never panics) for a structurally invalid public key or
/// signature — those are treated identically to a failed verification by
/// every caller in this crate.
pub fn verify(pubkey: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    verifying_key.verify(message, &sig).is_ok()
}
