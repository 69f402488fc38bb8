//! Axum middleware enforcing route rules
//!
//! ```no_run
//! use axum::{middleware::from_fn_with_state, routing::get, Router};
//! use routegate_authz::{http::authorize_request, AuthzEngine};
//! use std::sync::Arc;
//!
//! fn app(engine: Arc<AuthzEngine>) -> Router {
//!     Router::new()
//!         .route("/users/:id", get(|| async { "ok" }))
//!         .layer(from_fn_with_state(engine, authorize_request))
//! }
//! ```
//!
//! Upstream authentication is expected to insert a [`Principal`] into the
//! request extensions. Requests without one are evaluated anonymously.

use crate::engine::{AccessRequest, AuthzEngine, Decision, DenyKind};
use crate::types::Principal;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

/// JSON body returned when a request is rejected
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rejection {
    /// Short error code, e.g. `forbidden`
    pub error: String,

    /// Human readable reason
    pub reason: String,

    /// Request method
    pub method: String,

    /// Request path
    pub path: String,
}

impl Rejection {
    fn denied(decision: &Decision, kind: DenyKind) -> Self {
        Self {
            error: kind.label().to_string(),
            reason: decision.reason.to_string(),
            method: decision.method.clone(),
            path: decision.path.clone(),
        }
    }
}

/// Status code for a denial category
pub fn status_for(kind: DenyKind) -> StatusCode {
    match kind {
        DenyKind::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        DenyKind::NoRuleFound | DenyKind::Forbidden | DenyKind::UnknownRoleContext => {
            StatusCode::FORBIDDEN
        }
    }
}

/// Authorize the request and forward it on ALLOW
pub async fn authorize_request(
    State(engine): State<Arc<AuthzEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let principal = request.extensions().get::<Principal>().cloned();
    let role_context = request
        .headers()
        .get(engine.config().role_context_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut access = AccessRequest::new(&method, &path);
    if let Some(principal) = &principal {
        access = access.with_principal(principal);
    }
    if let Some(role_context) = role_context.as_deref() {
        access = access.with_role_context(role_context);
    }

    let decision = match engine.authorize(&access).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(method = %method, path = %path, "Authorization failed: {}", e);
            let body = Rejection {
                error: "authorization_unavailable".to_string(),
                reason: e.to_string(),
                method,
                path,
            };
            return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        }
    };

    match decision.deny_kind() {
        None => next.run(request).await,
        Some(kind) => {
            warn!(
                method = %method,
                path = %path,
                principal = principal.as_ref().map(|p| p.id.as_str()).unwrap_or("-"),
                "Request denied: {}",
                decision.reason
            );
            (status_for(kind), Json(Rejection::denied(&decision, kind))).into_response()
        }
    }
}
