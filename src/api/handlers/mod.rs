//! REST handlers, grouped by resource.

pub mod attendance;
pub mod events;
pub mod faces;
pub mod health;
pub mod live;

use base64::Engine;

/// Standard base64 for JPEG and photo payloads in JSON bodies.
pub(crate) fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
