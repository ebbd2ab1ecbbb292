//! # Authentication Module
//!
//! Bearer API key check for the Canopy HTTP API.
//!
//! The key comes from `ApiSettings::api_key` (the `[security] api_key` file
//! entry, overridden by `CANOPY_API_KEY`). When it is set, every route except
//! `/health` requires:
//! ```text
//! Authorization: Bearer <your-api-key>
//! ```

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

// =============================================================================
// API KEY
// =============================================================================

/// The configured API key. Never printed.
pub struct ApiKey(Vec<u8>);

impl ApiKey {
    #[must_use]
    pub fn new(key: &str) -> Self {
        Self(key.as_bytes().to_vec())
    }

    /// Constant-time comparison against a presented key.
    ///
    /// Both sides are padded to the same length so `ct_eq` always compares
    /// the same number of bytes; the length check happens afterwards.
    #[must_use]
    pub fn matches(&self, provided: &str) -> bool {
        let provided = provided.as_bytes();
        let len = provided.len().max(self.0.len());
        let mut lhs = vec![0u8; len];
        let mut rhs = vec![0u8; len];
        lhs[..provided.len()].copy_from_slice(provided);
        rhs[..self.0.len()].copy_from_slice(&self.0);

        let bytes_match: bool = lhs.ct_eq(&rhs).into();
        bytes_match && provided.len() == self.0.len()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

/// Reject requests without a matching `Authorization` header.
///
/// Only installed when a key is configured. `/health` stays open for load
/// balancer health checks.
pub async fn api_key_auth_middleware(
    State(key): State<Arc<ApiKey>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let Some(header_value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!(
            event = "auth_failure",
            reason = "missing_authorization_header",
            "Missing Authorization header"
        );
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
    };

    // "Bearer <key>" or raw "<key>"
    let provided = header_value.strip_prefix("Bearer ").unwrap_or(header_value);
    if key.matches(provided) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(
            event = "auth_failure",
            reason = "invalid_api_key",
            "Authentication failed: invalid API key"
        );
        Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

// =============================================================================
// TESTS
// =============================================================================
