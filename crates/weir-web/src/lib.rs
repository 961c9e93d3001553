//! weir-web - the web surfaces the runtime core talks to.
//!
//! Two halves:
//!
//! * **Routing** - `Api`/`Path` descriptors (parsed from JSON), a pattern
//!   compiler for `:name` parameters and `*rest` wildcards, and the
//!   `Router::find_handler` contract the dispatcher consumes. Reloads
//!   rebuild the table atomically under a write lock.
//! * **WebSocket client** - used by the script `WebSocket` constructor:
//!   connects out, dispatches connection events to a handler, reconnects
//!   with backoff, and emits periodic pings.

mod path;
mod router;
mod ws;

pub use path::{Api, Out, Path, Redirect, Request, Response, run_guard};
pub use router::{Match, Router};
pub use ws::{WsClient, WsClientConfig, WsEvents};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebError {
    /// Invalid API descriptor or pattern.
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// No route matches the request.
    #[error("{0} {1} not found")]
    NotFound(String, String),

    /// A guard rejected the request.
    #[error("guard denied: {0}")]
    GuardDenied(String),

    /// Conflicting (method, pattern) pair within one API.
    #[error("duplicate route {0} {1}")]
    DuplicateRoute(String, String),

    /// WebSocket transport failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

pub type WebResult<T> = Result<T, WebError>;
