//! Verified-Emit Pipeline (C10).
//!
//! Stages run in the exact order of §4.10. The ordering is load-bearing for
//! security: signature verification — the most CPU-expensive check — runs
//! last, after every cheaper check that could reject hostile input for
//! free. Each stage short-circuits on failure with a distinct
//! [`GatewayError`] and its own audit record; nothing past stage 7 can run
//! unless every earlier stage passed.

use std::sync::Arc;

use crate::audit::{AuditAction, AuditRecord};
use crate::crypto;
use crate::envelope::{self, Envelope, EnvelopeWire};
use crate::error::GatewayError;
use crate::policy::types::{Decision, DenyReason};
use crate::state::GatewayState;

pub struct EmitOutcome {
    pub envelope_digest: String,
}

/// Run the full pipeline for one `/emit` request.
///
/// `bearer` is the raw `Authorization: Bearer <grant>` header value, already
/// stripped of the `Bearer ` prefix by the route handler; `None` if the
/// header was absent.
pub async fn verified_emit(
    state: &Arc<GatewayState>,
    bearer: Option<&str>,
    wire: EnvelopeWire,
) -> Result<EmitOutcome, GatewayError> {
    // 1 + 2: extract and validate the bearer grant.
    let grant = bearer.ok_or(GatewayError::Unauthenticated)?;
    let claims = state
        .sessions
        .validate(grant)
        .map_err(|_| GatewayError::Unauthenticated)?;

    // 3: parse the envelope.
    let envelope: Envelope = wire
        .try_into()
        .map_err(|e: envelope::EnvelopeError| GatewayError::BadRequest(e.to_string()))?;

    // 4: producer must match the authenticated subject.
    if envelope.producer != claims.sub {
        audit_denied(state, &claims.sub, &envelope.subject, "SubjectMismatch").await;
        return Err(GatewayError::SubjectMismatch);
    }

    // 5: keyring trust.
    let record = state
        .keyring
        .get(&claims.sub)
        .map_err(|_| GatewayError::NotTrusted)?;
    if !record.is_trusted() {
        audit_denied(state, &claims.sub, &envelope.subject, "NotTrusted").await;
        return Err(GatewayError::NotTrusted);
    }

    // 6: policy check. Roles are re-read from the keyring, never trusted
    // from the (possibly stale) session grant.
    match state.policy.can_publish(&claims.sub, &envelope.subject) {
        Decision::Allow => {}
        Decision::Deny(reason) => {
            audit_denied(state, &claims.sub, &envelope.subject, reason.as_str()).await;
            return Err(deny_reason_to_error(reason));
        }
    }

    // 7: signature verification over canonical bytes.
    let bytes = envelope::signing_bytes(&envelope);
    if !crypto::verify(&record.pubkey, &bytes, &envelope.signature) {
        audit_denied(state, &claims.sub, &envelope.subject, "BadSignature").await;
        return Err(GatewayError::BadSignature);
    }

    let digest = envelope::digest_hex(&envelope);

    // 8: publish. Best-effort against subscribers, but must succeed from
    // the producer's point of view once every prior stage has passed.
    let envelope = Arc::new(envelope);
    state.bus.publish(&envelope.subject, Arc::clone(&envelope));

    // 9: audit record with decision = Accepted, written before the response
    // is returned to the caller.
    state
        .audit
        .append(
            &AuditRecord::new(&claims.sub, AuditAction::EmitAccepted, "Accepted")
                .with_subject(&envelope.subject)
                .with_reason(digest.clone()),
        )
        .map_err(GatewayError::from)?;

    // 10: success.
    Ok(EmitOutcome {
        envelope_digest: digest,
    })
}

fn deny_reason_to_error(reason: DenyReason) -> GatewayError {
    match reason {
        DenyReason::UnknownSubject => GatewayError::UnknownSubject,
        DenyReason::NotAuthorized => GatewayError::NotAuthorized,
    }
}

async fn audit_denied(state: &Arc<GatewayState>, actor: &str, subject: &str, reason: &'static str) {
    let record = AuditRecord::new(actor, AuditAction::EmitDenied, "Denied")
        .with_subject(subject)
        .with_reason(reason);
    if let Err(e) = state.audit.append(&record) {
        tracing::error!(error = %e, "failed to write emit-denied audit record");
    }
}

/// Check whether an AE may open an SSE subscription to `subject`, used by
/// the SSE bridge (C11, §4.11). Distinct from `verified_emit` because
/// subscription admission has no envelope or signature to check.
pub fn can_subscribe(
    keyring_record: &crate::keyring::KeyringRecord,
    policy: &crate::policy::engine::PolicyEngine,
    ae_id: &str,
    subject: &str,
) -> Result<(), GatewayError> {
    if !keyring_record.is_trusted() {
        return Err(GatewayError::NotTrusted);
    }
    match policy.can_subscribe(ae_id, subject) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(deny_reason_to_error(reason)),
    }
}
