//! Nonce Cache (C3).
//!
//! Purely in-memory short-lived challenge tokens. At most one outstanding
//! nonce per `ae_id`; issuing a new one invalidates any prior challenge.
//! Restart invalidates outstanding challenges, which is acceptable because
//! the TTL is short (§4.3).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("no outstanding nonce for this ae_id")]
    NotFound,
    #[error("nonce expired")]
    Expired,
}

#[derive(Debug, Clone)]
struct Entry {
    value: [u8; 32],
    issued_at: Instant,
}

pub struct NonceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl NonceCache {
    pub fn new(ttl: Duration) -> Self {
        NonceCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh nonce for `ae_id`, replacing any existing entry.
    pub fn issue(&self, ae_id: &str) -> [u8; 32] {
        let mut value = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut value);
        let entry = Entry {
            value,
            issued_at: Instant::now(),
        };
        self.entries.lock().insert(ae_id.to_string(), entry);
        value
    }

    /// Consume and return the outstanding nonce for `ae_id`, if any and
    /// unexpired. `/verify` never asks the caller to resend the nonce value
    /// (§6: the request carries only `ae_id` and `signed_nonce`) — the
    /// server looks its own challenge up by `ae_id` and hands the raw bytes
    /// back to the caller to check the signature against.
    ///
    /// On success, the entry is removed so it can never be consumed twice.
    /// On `Expired`, the entry is left alone: a fresh `/register` call
    /// replaces it.
    pub fn consume(&self, ae_id: &str) -> Result<[u8; 32], NonceError> {
        let mut entries = self.entries.lock();
        let entry = entries.get(ae_id).ok_or(NonceError::NotFound)?;

        if entry.issued_at.elapsed() > self.ttl {
            return Err(NonceError::Expired);
        }
        let value = entry.value;
        entries.remove(ae_id);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_consume_succeeds_once() {
        let cache = NonceCache::new(Duration::from_secs(120));
        let nonce = cache.issue("pub_ae");
        assert_eq!(cache.consume("pub_ae"), Ok(nonce));
        // second consume fails: entry was removed
        assert_eq!(cache.consume("pub_ae"), Err(NonceError::NotFound));
    }

    #[test]
    fn unknown_ae_id_has_no_outstanding_nonce() {
        let cache = NonceCache::new(Duration::from_secs(120));
        assert_eq!(cache.consume("ghost"), Err(NonceError::NotFound));
    }

    #[test]
    fn reissuing_invalidates_prior_nonce() {
        let cache = NonceCache::new(Duration::from_secs(120));
        let first = cache.issue("pub_ae");
        let second = cache.issue("pub_ae");
        assert_ne!(first, second);
        assert_eq!(cache.consume("pub_ae"), Ok(second));
    }

    #[test]
    fn expired_nonce_is_rejected() {
        let cache = NonceCache::new(Duration::from_millis(1));
        let _nonce = cache.issue("pub_ae");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.consume("pub_ae"), Err(NonceError::Expired));
    }
}
