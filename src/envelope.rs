//! Envelope schema and canonical signing bytes (§3, §6).
//!
//! The wire representation (what `/emit` receives as JSON) and the parsed,
//! validated [`Envelope`] are kept as separate types, mirroring the
//! teacher's `policy/canonical.rs` split between a serde-friendly document
//! and its canonicalized byte form. Any implementation producing or
//! verifying envelopes MUST agree on [`signing_bytes`] bit-for-bit.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// What `/emit` actually receives on the wire.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvelopeWire {
    pub producer: String,
    pub subject: String,
    /// Base64-standard-encoded payload bytes.
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Base64-standard-encoded 64-byte Ed25519 signature.
    pub signature: String,
}

/// A parsed, structurally valid envelope. Signature bytes are kept
/// separately from the fields they cover, since the signature itself is
/// excluded from the canonical signing bytes (§6).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub producer: String,
    pub subject: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub labels: Vec<String>,
    pub signature: [u8; 64],
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid base64 payload")]
    BadPayload,
    #[error("invalid base64 signature")]
    BadSignatureEncoding,
    #[error("signature must be exactly 64 bytes, got {0}")]
    BadSignatureLength(usize),
    #[error("producer must not be empty")]
    EmptyProducer,
    #[error("subject must not be empty")]
    EmptySubject,
}

impl TryFrom<EnvelopeWire> for Envelope {
    type Error = EnvelopeError;

    fn try_from(wire: EnvelopeWire) -> Result<Self, Self::Error> {
        if wire.producer.is_empty() {
            return Err(EnvelopeError::EmptyProducer);
        }
        if wire.subject.is_empty() {
            return Err(EnvelopeError::EmptySubject);
        }
        let payload = base64::engine::general_purpose::STANDARD
            .decode(&wire.payload)
            .map_err(|_| EnvelopeError::BadPayload)?;
        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(&wire.signature)
            .map_err(|_| EnvelopeError::BadSignatureEncoding)?;
        let signature: [u8; 64] = sig_bytes
            .clone()
            .try_into()
            .map_err(|_| EnvelopeError::BadSignatureLength(sig_bytes.len()))?;

        Ok(Envelope {
            producer: wire.producer,
            subject: wire.subject,
            payload,
            timestamp: wire.timestamp,
            labels: wire.labels,
            signature,
        })
    }
}

/// Append a length-prefixed field (4-byte big-endian length + raw bytes).
fn push_field(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

/// The canonical signing bytes for an envelope (§6): length-prefixed
/// concatenation of producer, subject, RFC3339-UTC timestamp, payload, and
/// sorted labels (joined with `,`, empty string if none). The signature
/// field itself is never part of this encoding.
pub fn signing_bytes(envelope: &Envelope) -> Vec<u8> {
    let mut buf = Vec::new();
    push_field(&mut buf, envelope.producer.as_bytes());
    push_field(&mut buf, envelope.subject.as_bytes());
    let ts = envelope
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    push_field(&mut buf, ts.as_bytes());
    push_field(&mut buf, &envelope.payload);

    let mut labels = envelope.labels.clone();
    labels.sort();
    let joined = labels.join(",");
    push_field(&mut buf, joined.as_bytes());

    buf
}

/// SHA-256 digest of the canonical signing bytes, hex-encoded — used as the
/// audit record's "envelope digest" (§3, §8).
pub fn digest_hex(envelope: &Envelope) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(signing_bytes(envelope));
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            producer: "pub_ae".into(),
            subject: "fused.track".into(),
            payload: b"x".to_vec(),
            timestamp: "2026-01-01T00:00:00Z".parse().unwrap(),
            labels: vec![],
            signature: [0u8; 64],
        }
    }

    #[test]
    fn signing_bytes_are_deterministic() {
        let a = sample();
        let b = sample();
        assert_eq!(signing_bytes(&a), signing_bytes(&b));
    }

    #[test]
    fn signing_bytes_exclude_signature() {
        let mut a = sample();
        let mut b = sample();
        a.signature = [1u8; 64];
        b.signature = [2u8; 64];
        assert_eq!(signing_bytes(&a), signing_bytes(&b));
    }

    #[test]
    fn labels_are_sorted_before_signing() {
        let mut a = sample();
        a.labels = vec!["b".into(), "a".into()];
        let mut b = sample();
        b.labels = vec!["a".into(), "b".into()];
        assert_eq!(signing_bytes(&a), signing_bytes(&b));
    }

    #[test]
    fn changed_payload_changes_digest() {
        let a = sample();
        let mut b = sample();
        b.payload = b"y".to_vec();
        assert_ne!(digest_hex(&a), digest_hex(&b));
    }

    #[test]
    fn wire_with_bad_signature_length_is_rejected() {
        let wire = EnvelopeWire {
            producer: "pub_ae".into(),
            subject: "fused.track".into(),
            payload: base64::engine::general_purpose::STANDARD.encode(b"x"),
            timestamp: Utc::now(),
            labels: vec![],
            signature: base64::engine::general_purpose::STANDARD.encode(b"too short"),
        };
        assert!(matches!(
            Envelope::try_from(wire),
            Err(EnvelopeError::BadSignatureLength(_))
        ));
    }
}
