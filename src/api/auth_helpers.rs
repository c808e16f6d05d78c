//! Authorization helper functions for REST API handlers.

use crate::auth::AuthContext;

use super::error::{forbidden, ApiError};

/// Ensure the caller is an administrator.
pub fn ensure_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(forbidden("Administrator role required"))
    }
}

/// Ensure the caller is acting on their own identity, or is an administrator.
pub fn ensure_self_or_admin(auth: &AuthContext, identity_id: &str) -> Result<(), ApiError> {
    if auth.can_act_for(identity_id) {
        Ok(())
    } else {
        Err(forbidden("Cannot act for another identity"))
    }
}
