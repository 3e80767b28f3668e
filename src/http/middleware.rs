//! Admission middleware.
//!
//! Attached per route with `axum::middleware::from_fn_with_state`, so each
//! route group carries its own policy chain.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::identity::IdentityExtractor;
use crate::ratelimit::{ChainOutcome, Decision, DecisionSource, PolicyChain};

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Body returned when a request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialBody {
    pub success: bool,
    pub message: String,
}

/// Middleware state: the route's policies and how to identify callers.
#[derive(Debug, Clone)]
pub struct Admission {
    chain: PolicyChain,
    identity: IdentityExtractor,
}

impl Admission {
    pub fn new(chain: PolicyChain, identity: IdentityExtractor) -> Arc<Self> {
        Arc::new(Self { chain, identity })
    }

    pub fn chain(&self) -> &PolicyChain {
        &self.chain
    }
}

/// Evaluate the route's policies and either forward or refuse the request.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn enforce(
    State(admission): State<Arc<Admission>>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = admission.identity.extract(&request);
    let outcome = admission.chain.evaluate(&ctx).await;

    match &outcome {
        ChainOutcome::Denied {
            policy,
            message,
            decision,
        } => {
            info!(
                policy = %policy,
                ip = ?ctx.ip,
                source = ?decision.source,
                "Request refused by rate limit"
            );
            denial_response(message, decision)
        }
        ChainOutcome::Admitted { .. } => {
            let mut response = next.run(request).await;
            if let Some(decision) = outcome.reported() {
                apply_quota_headers(response.headers_mut(), decision);
            }
            response
        }
    }
}

/// Write the standard quota headers for a store-backed decision.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    if !decision.has_quota() {
        return;
    }
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(decision.reset_secs()));
}

/// Build the refusal for a denied decision.
///
/// Quota exhaustion is a 429 with `Retry-After`. A fail-closed store outage
/// is a 503 carrying the same body shape.
pub fn denial_response(message: &str, decision: &Decision) -> Response {
    let mut headers = HeaderMap::new();
    let status = match decision.source {
        DecisionSource::FailClosed => StatusCode::SERVICE_UNAVAILABLE,
        DecisionSource::Store | DecisionSource::FailOpen => {
            apply_quota_headers(&mut headers, decision);
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(decision.reset_secs()),
            );
            StatusCode::TOO_MANY_REQUESTS
        }
    };

    let body = DenialBody {
        success: false,
        message: message.to_string(),
    };

    (status, headers, Json(body)).into_response()
}
