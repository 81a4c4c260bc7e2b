//! Stable error taxonomy shared by every component.
//!
//! Every denial in the gateway maps to exactly one [`GatewayError`] variant,
//! which in turn maps to exactly one HTTP status code and one audit reason
//! string (§7 of the spec). Handlers should prefer `?` over ad hoc
//! `(StatusCode, String)` tuples so the audit record and the response are
//! always derived from the same value.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing or malformed bearer grant")]
    Unauthenticated,

    #[error("principal is not trusted")]
    NotTrusted,

    #[error("unknown subject")]
    UnknownSubject,

    #[error("not authorized for this subject")]
    NotAuthorized,

    #[error("signature verification failed")]
    BadSignature,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("token subject does not match envelope producer")]
    SubjectMismatch,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl GatewayError {
    /// Stable identifier used both in the HTTP error body and in audit records.
    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "Unauthenticated",
            GatewayError::NotTrusted => "NotTrusted",
            GatewayError::UnknownSubject => "UnknownSubject",
            GatewayError::NotAuthorized => "NotAuthorized",
            GatewayError::BadSignature => "BadSignature",
            GatewayError::BadRequest(_) => "BadRequest",
            GatewayError::SubjectMismatch => "SubjectMismatch",
            GatewayError::Conflict(_) => "Conflict",
            GatewayError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::NotTrusted => StatusCode::UNAUTHORIZED,
            GatewayError::UnknownSubject | GatewayError::NotAuthorized => StatusCode::FORBIDDEN,
            GatewayError::BadSignature => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::SubjectMismatch => StatusCode::FORBIDDEN,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        GatewayError::Internal(e)
    }
}

impl GatewayError {
    /// Map a keyring store error onto the stable taxonomy. A keyring
    /// `NotFound` surfaces as `BadRequest` rather than `Internal` — it means
    /// the caller named an ae_id that was never enrolled, not that the
    /// store itself failed.
    pub fn from_keyring(e: crate::keyring::KeyringError) -> Self {
        match e {
            crate::keyring::KeyringError::NotFound => {
                GatewayError::BadRequest("unknown ae_id".to_string())
            }
            crate::keyring::KeyringError::WouldLowerTrust => {
                GatewayError::Conflict("upsert would lower trust state".to_string())
            }
            crate::keyring::KeyringError::Store(e) => GatewayError::Internal(e.into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, GatewayError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let code = self.reason();
        let body = ErrorBody {
            error: self.to_string(),
            code,
        };
        (self.status(), Json(body)).into_response()
    }
}
