//! Request ID generation.
//!
//! Request IDs correlate a request with its response. They are UUID v7
//! (time-ordered) rendered in simple form, so IDs generated by one client are
//! unique and sort by creation time.

use uuid::Uuid;

/// Generate a fresh request ID (32 lowercase hex characters).
#[must_use]
pub fn generate_request_id() -> String {
    Uuid::now_v7().simple().to_string()
}
