//! Error types for weir-runtime.
//!
//! One enum per the error-kind taxonomy the rest of the system relies on:
//! load-time failures (`Parse`, `Compile`), boundary failures (`Marshal`),
//! execution failures (`Runtime`, `Exception`, `Cancelled`, `Timeout`),
//! scheduling failures (`Busy`) and lookup failures (`NotFound`).

use thiserror::Error;

use weir_process::Exception;

/// Errors that can occur while loading or executing scripts.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid script, config, or API descriptor; carries the file name.
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// The engine could not compile a script; surfaced on first call.
    #[error("compile error in {script}: {message}")]
    Compile { script: String, message: String },

    /// A value cannot cross the host/script boundary.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// Script threw. `stack` is the source-map-resolved trace when debug
    /// is on; `raw_stack` is the engine's own trace.
    #[error("{message}")]
    Runtime {
        message: String,
        stack: Option<String>,
        raw_stack: Option<String>,
    },

    /// A typed exception thrown through the `Exception` global.
    #[error(transparent)]
    Exception(#[from] Exception),

    /// The caller's cancellation signal fired.
    #[error("execution cancelled")]
    Cancelled,

    /// Per-call deadline elapsed.
    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// Engine selection timed out; retryable, surfaces as 503.
    #[error("runtime busy: no engine available within {0}ms")]
    Busy(u64),

    /// Script, process, or API not registered.
    #[error("{0} not found")]
    NotFound(String),

    /// A guard rejected the request.
    #[error("guard denied: {0}")]
    GuardDenied(String),

    /// Everything else.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn compile(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compile {
            script: script.into(),
            message: message.into(),
        }
    }

    pub fn marshal(message: impl Into<String>) -> Self {
        Self::Marshal(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            stack: None,
            raw_stack: None,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the caller may retry the invocation as-is.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Cancelled)
    }

    /// HTTP status the web surface should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Exception(e) => e.http_status(),
            Self::Busy(_) => 503,
            Self::Cancelled | Self::Timeout(_) => 408,
            Self::NotFound(_) => 404,
            Self::GuardDenied(_) => 403,
            Self::Parse { .. } | Self::Marshal(_) => 400,
            _ => 500,
        }
    }
}

impl From<weir_kv::KvError> for Error {
    fn from(e: weir_kv::KvError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<weir_web::WebError> for Error {
    fn from(e: weir_web::WebError) -> Self {
        match e {
            weir_web::WebError::NotFound(method, path) => {
                Self::NotFound(format!("{method} {path}"))
            }
            weir_web::WebError::GuardDenied(message) => Self::GuardDenied(message),
            weir_web::WebError::Parse { file, message } => Self::Parse { file, message },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::Busy(200).retryable());
        assert!(Error::Cancelled.retryable());
        assert!(!Error::runtime("boom").retryable());
        assert!(!Error::not_found("scripts.x").retryable());
    }

    #[test]
    fn http_statuses() {
        assert_eq!(Error::Busy(0).http_status(), 503);
        assert_eq!(Error::not_found("x").http_status(), 404);
        assert_eq!(Error::GuardDenied("no".into()).http_status(), 403);
        assert_eq!(Error::Exception(Exception::new(418, "tea")).http_status(), 418);
    }
}
