//! HTTP API for the check-in service
//!
//! JSON endpoints under `/api/v1`, multipart upload and live-stream endpoints
//! at the root for the dashboard, and unauthenticated probes.

pub mod auth_helpers;
pub mod error;
mod form;
pub mod handlers;
mod rest;
pub mod types;

pub use error::{ApiError, ErrorCode};
pub use rest::*;
