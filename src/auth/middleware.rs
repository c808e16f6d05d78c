//! Authentication middleware for Axum
//!
//! Extracts the bearer token, attaches an [`AuthContextExt`] to the request
//! and applies the per-subject rate limit.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{AuthContext, AuthError, JwtValidator};

/// Bearer-token authenticator
pub struct Authenticator {
    jwt_validator: Option<Arc<JwtValidator>>,
}

impl Authenticator {
    pub fn new(jwt_validator: Option<Arc<JwtValidator>>) -> Self {
        Self { jwt_validator }
    }

    /// Authenticate a request from its `Authorization` header value
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<AuthContext, AuthError> {
        let header = auth_header.ok_or(AuthError::MissingAuth)?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingAuth)?;

        match &self.jwt_validator {
            Some(jwt) => jwt.validate(token),
            None => Err(AuthError::InvalidJwt("JWT not configured".to_string())),
        }
    }
}

/// Auth context extension for request
#[derive(Clone)]
pub struct AuthContextExt(pub AuthContext);

/// Authentication middleware configuration/state.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub authenticator: Arc<Authenticator>,
    /// If false, every request runs as the development admin.
    pub require_auth: bool,
    /// Optional per-subject rate limiter.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let context = if state.require_auth {
        match state.authenticator.authenticate(auth_header) {
            Ok(context) => context,
            Err(e) => {
                tracing::debug!(error = %e, "request rejected by authenticator");
                return auth_error_response(e);
            }
        }
    } else {
        AuthContext::development()
    };

    if let Some(ref limiter) = state.rate_limiter {
        let key = format!("subject:{}", context.subject_id);
        if let Err(e) = limiter.check(&key) {
            return auth_error_response(e);
        }
    }

    request.extensions_mut().insert(AuthContextExt(context));
    next.run(request).await
}

/// Convert auth error to HTTP response
pub fn auth_error_response(error: AuthError) -> Response {
    crate::api::ApiError::from(error).into_response()
}

/// Fixed-window rate limiter for API requests, kept in process memory.
pub struct RateLimiter {
    /// Requests per window per key
    requests_per_window: u32,
    window: Duration,
    counts: Mutex<HashMap<String, (u32, Instant)>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Check if request is allowed
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let entry = counts.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(entry.1) >= self.window {
            *entry = (0, now);
        }

        if entry.0 >= self.requests_per_window {
            return Err(AuthError::RateLimited);
        }

        entry.0 += 1;
        Ok(())
    }

    /// Remaining requests for a key in the current window
    pub fn remaining(&self, key: &str) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        match counts.get(key) {
            Some((count, started)) if now.duration_since(*started) < self.window => {
                self.requests_per_window.saturating_sub(*count)
            }
            _ => self.requests_per_window,
        }
    }
}
