//! HTTP surface (§6, §4.14).
//!
//! Handlers stay thin: parse/extract, call into a component, map the
//! `Result` to a response. The heavier orchestration (the multi-stage emit
//! pipeline) lives in [`crate::emit`], mirroring the teacher's
//! `policy/api.rs` split between router wiring and policy logic.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditAction, AuditRecord};
use crate::emit::{self, verified_emit};
use crate::envelope::EnvelopeWire;
use crate::error::GatewayError;
use crate::keyring::TrustState;
use crate::policy::types::DynamicCapability;
use crate::sse;
use crate::state::GatewayState;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/verify", post(verify))
        .route("/emit", post(emit_handler))
        .route("/capabilities", post(capabilities))
        .route("/subscribe/{topic}", get(subscribe))
        .route("/admin/enroll", post(admin_enroll))
        .route("/admin/revoke/{ae_id}", post(admin_revoke))
        .route("/admin/keyring", get(admin_list_keyring))
        .route("/audit/recent", get(audit_recent))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn bearer_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// ---- /register ----

#[derive(Deserialize)]
struct RegisterRequest {
    ae_id: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    nonce: String,
}

async fn register(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, StatusCode> {
    // §6 calls out 404 for an unknown ae_id specifically, distinct from the
    // rest of the taxonomy in §7 — enrollment is out-of-band (§3
    // lifecycle), so a keyring miss here means the caller never enrolled.
    state.keyring.get(&req.ae_id).map_err(|_| StatusCode::NOT_FOUND)?;

    let nonce = state.nonces.issue(&req.ae_id);
    Ok(Json(RegisterResponse {
        nonce: hex::encode(nonce),
    }))
}

// ---- /verify ----

#[derive(Deserialize)]
struct VerifyRequest {
    ae_id: String,
    /// Hex-encoded 64-byte Ed25519 signature over the raw nonce bytes
    /// issued by the matching /register call (§6: the request body carries
    /// only `ae_id` and `signed_nonce` — the server looks its own
    /// outstanding challenge up by `ae_id` rather than trusting a
    /// client-resent nonce value).
    signed_nonce: String,
}

#[derive(Serialize)]
struct VerifyResponse {
    grant: String,
}

async fn verify(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, GatewayError> {
    let record = state
        .keyring
        .get(&req.ae_id)
        .map_err(|_| GatewayError::Unauthenticated)?;
    // A revoked ae_id can never re-admit itself via /verify — trust state
    // is monotonic except operator-issued revocation (§3), so this is
    // rejected here rather than surfacing as a keyring Conflict below.
    if record.state == TrustState::Revoked {
        return Err(GatewayError::NotTrusted);
    }

    let sig_bytes: [u8; 64] = hex::decode(&req.signed_nonce)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or(GatewayError::BadRequest("malformed signature".to_string()))?;

    let nonce_bytes = state
        .nonces
        .consume(&req.ae_id)
        .map_err(|_| GatewayError::Unauthenticated)?;

    if !crate::crypto::verify(&record.pubkey, &nonce_bytes, &sig_bytes) {
        return Err(GatewayError::Unauthenticated);
    }

    state
        .keyring
        .set_state(&req.ae_id, TrustState::Trusted)
        .map_err(GatewayError::from_keyring)?;

    let ttl = state
        .config
        .profile_ttl_secs("default")
        .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("no TTL configured for default profile")))?;
    let grant = state
        .sessions
        .issue(&req.ae_id, record.roles.clone(), "default", ttl)
        .map_err(GatewayError::from)?;

    state
        .audit
        .append(&AuditRecord::new(&req.ae_id, AuditAction::AdmissionVerify, "Accepted"))
        .map_err(GatewayError::from)?;

    Ok(Json(VerifyResponse { grant }))
}

// ---- /emit ----

#[derive(Serialize)]
struct EmitResponse {
    status: &'static str,
}

async fn emit_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(wire): Json<EnvelopeWire>,
) -> Result<Json<EmitResponse>, GatewayError> {
    let bearer = bearer_from(&headers);
    verified_emit(&state, bearer, wire).await?;
    Ok(Json(EmitResponse { status: "accepted" }))
}

// ---- /capabilities ----

#[derive(Deserialize)]
struct CapabilitiesRequest {
    #[serde(default)]
    publishes: std::collections::HashSet<String>,
    #[serde(default)]
    subscribes: std::collections::HashSet<String>,
    #[serde(default)]
    meta: serde_json::Value,
}

async fn capabilities(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<CapabilitiesRequest>,
) -> Result<StatusCode, GatewayError> {
    let bearer = bearer_from(&headers).ok_or(GatewayError::Unauthenticated)?;
    let claims = state
        .sessions
        .validate(bearer)
        .map_err(|_| GatewayError::Unauthenticated)?;

    let record = state
        .keyring
        .get(&claims.sub)
        .map_err(|_| GatewayError::NotTrusted)?;
    if !record.is_trusted() {
        return Err(GatewayError::NotTrusted);
    }

    let capability = DynamicCapability {
        publishes: req.publishes,
        subscribes: req.subscribes,
        meta: req.meta,
    };
    state.capabilities.put(&claims.sub, &capability).map_err(GatewayError::from)?;
    state.policy.rebuild_dynamic().map_err(GatewayError::from)?;

    state
        .audit
        .append(&AuditRecord::new(
            &claims.sub,
            AuditAction::CapabilitiesDeclared,
            "Accepted",
        ))
        .map_err(GatewayError::from)?;

    Ok(StatusCode::OK)
}

// ---- /subscribe/:topic ----

async fn subscribe(
    State(state): State<Arc<GatewayState>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let bearer = bearer_from(&headers).ok_or(GatewayError::Unauthenticated)?;
    let claims = state
        .sessions
        .validate(bearer)
        .map_err(|_| GatewayError::Unauthenticated)?;

    let record = state
        .keyring
        .get(&claims.sub)
        .map_err(|_| GatewayError::NotTrusted)?;

    if let Err(e) = emit::can_subscribe(&record, &state.policy, &claims.sub, &topic) {
        state
            .audit
            .append(
                &AuditRecord::new(&claims.sub, AuditAction::SubscribeDenied, "Denied")
                    .with_subject(&topic)
                    .with_reason(e.reason()),
            )
            .ok();
        return Err(e);
    }

    state
        .audit
        .append(
            &AuditRecord::new(&claims.sub, AuditAction::SubscribeAdmitted, "Accepted").with_subject(&topic),
        )
        .map_err(GatewayError::from)?;

    let subscription = state.bus.subscribe(&topic);
    Ok(sse::stream_response(subscription))
}

// ---- /admin/* ----

fn require_admin(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<crate::session::Claims, GatewayError> {
    let bearer = bearer_from(headers).ok_or(GatewayError::Unauthenticated)?;
    let claims = state
        .sessions
        .validate(bearer)
        .map_err(|_| GatewayError::Unauthenticated)?;
    let record = state
        .keyring
        .get(&claims.sub)
        .map_err(|_| GatewayError::NotTrusted)?;
    if !record.is_trusted() {
        return Err(GatewayError::NotTrusted);
    }
    // Keyring roles are authoritative, never the grant's own role claim
    // (§9: role precedence).
    if !record.roles.contains("admin") {
        return Err(GatewayError::NotAuthorized);
    }
    Ok(claims)
}

#[derive(Deserialize)]
struct EnrollRequest {
    ae_id: String,
    /// Hex-encoded 32-byte Ed25519 public key.
    pubkey: String,
    #[serde(default)]
    roles: std::collections::HashSet<String>,
    /// RFC3339 expiry instant, if this AE's trust should lapse automatically.
    expiry: Option<chrono::DateTime<chrono::Utc>>,
}

/// Enroll an AE or rotate its key (§3 lifecycle: "created by enrollment
/// (out-of-band or admin route)"). A fresh `ae_id` starts `untrusted` and
/// must still complete `/register` + `/verify` before it can emit or
/// subscribe; this route only seeds the keyring record.
async fn admin_enroll(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<EnrollRequest>,
) -> Result<StatusCode, GatewayError> {
    let admin = require_admin(&state, &headers)?;
    let pubkey_bytes: [u8; 32] = hex::decode(&req.pubkey)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or(GatewayError::BadRequest("pubkey must be 32 hex-encoded bytes".to_string()))?;

    state
        .keyring
        .upsert(&req.ae_id, pubkey_bytes, req.roles, req.expiry, true, None)
        .map_err(GatewayError::from_keyring)?;

    state
        .audit
        .append(
            &AuditRecord::new(&admin.sub, AuditAction::KeyringUpsert, "Accepted").with_subject(&req.ae_id),
        )
        .map_err(GatewayError::from)?;
    Ok(StatusCode::OK)
}

async fn admin_revoke(
    State(state): State<Arc<GatewayState>>,
    Path(ae_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, GatewayError> {
    let admin = require_admin(&state, &headers)?;
    state
        .keyring
        .set_state(&ae_id, TrustState::Revoked)
        .map_err(GatewayError::from_keyring)?;
    state.capabilities.remove(&ae_id).map_err(GatewayError::from)?;
    state.policy.rebuild_dynamic().map_err(GatewayError::from)?;
    state
        .audit
        .append(
            &AuditRecord::new(&admin.sub, AuditAction::KeyringRevoke, "Accepted").with_subject(&ae_id),
        )
        .map_err(GatewayError::from)?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct KeyringEntry {
    ae_id: String,
    state: &'static str,
    roles: Vec<String>,
}

async fn admin_list_keyring(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<KeyringEntry>>, GatewayError> {
    require_admin(&state, &headers)?;
    let records = state.keyring.list().map_err(GatewayError::from_keyring)?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| KeyringEntry {
                ae_id: r.ae_id,
                state: match r.state {
                    TrustState::Untrusted => "untrusted",
                    TrustState::Trusted => "trusted",
                    TrustState::Revoked => "revoked",
                },
                roles: r.roles.into_iter().collect(),
            })
            .collect(),
    ))
}

// ---- /audit/recent ----

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn audit_recent(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<String, GatewayError> {
    require_admin(&state, &headers)?;
    let limit = query.limit.unwrap_or(100);
    let contents = std::fs::read_to_string(&state.config.audit_log).map_err(|e| GatewayError::from(anyhow::Error::from(e)))?;
    let lines: Vec<&str> = contents.lines().rev().take(limit).collect();
    Ok(lines.into_iter().rev().collect::<Vec<_>>().join("\n"))
}
