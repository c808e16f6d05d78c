//! Authentication and authorization
//!
//! Callers present `Authorization: Bearer <jwt>`. The token is verified with
//! an HMAC secret and yields an [`AuthContext`] carrying the subject (the
//! caller's identity id) and a coarse role.
//!
//! # Roles
//!
//! - `volunteer`: may check themselves in and read their own history
//! - `admin`: event setup, manual marking, group photos, live streams.
//!   Tokens minted by the older NGO tooling say `ngo_admin`; it is the same role.
//!
//! # Configuration
//!
//! - `AUTH_MODE`: `required` (default) or `disabled` for local development
//! - `JWT_SECRET`: HMAC secret for JWT validation
//! - `RATE_LIMIT_PER_MINUTE`: per-subject request budget (0 disables)

mod jwt;
mod middleware;

pub use jwt::*;
pub use middleware::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller role carried in the `role` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Volunteer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Volunteer => "volunteer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volunteer" => Ok(Role::Volunteer),
            "admin" | "ngo_admin" => Ok(Role::Admin),
            other => Err(AuthError::InvalidJwt(format!("unknown role '{other}'"))),
        }
    }
}

/// Authentication context extracted from request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Identity id of the caller (`sub` claim)
    pub subject_id: String,

    pub role: Role,
}

impl AuthContext {
    pub fn new(subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
        }
    }

    /// Context used when `AUTH_MODE=disabled`.
    pub fn development() -> Self {
        Self::new("dev", Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True for admins and for the subject acting on itself.
    pub fn can_act_for(&self, identity_id: &str) -> bool {
        self.is_admin() || self.subject_id == identity_id
    }
}

/// Authentication error
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,

    #[error("invalid JWT: {0}")]
    InvalidJwt(String),

    #[error("token expired")]
    TokenExpired,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("rate limit exceeded")]
    RateLimited,
}
