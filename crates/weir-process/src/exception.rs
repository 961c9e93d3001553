//! Typed exceptions carried across the bus.
//!
//! Handlers fail with an `Exception` whose code doubles as the HTTP status
//! when the invocation came in over the web surface. Scripts construct the
//! same shape through the `Exception` global.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A typed error with a status code and a message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Exception|{code}: {message}")]
pub struct Exception {
    pub code: i32,
    pub message: String,
}

impl Exception {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 400 - caller passed invalid arguments.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// 403 - caller lacks privileges (root-only processes).
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    /// 404 - no handler registered under the name.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// 500 - handler failed internally.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    /// Status code clamped to the valid HTTP range, 500 when out of range.
    pub fn http_status(&self) -> u16 {
        if (100..=599).contains(&self.code) {
            self.code as u16
        } else {
            500
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_clamps_to_http_range() {
        assert_eq!(Exception::new(404, "x").http_status(), 404);
        assert_eq!(Exception::new(-1, "x").http_status(), 500);
        assert_eq!(Exception::new(10000, "x").http_status(), 500);
    }

    #[test]
    fn display_carries_code_and_message() {
        let e = Exception::bad_request("missing arg");
        assert_eq!(e.to_string(), "Exception|400: missing arg");
    }
}
