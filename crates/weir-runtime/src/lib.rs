//! weir-runtime - the script runtime behind weir.
//!
//! Hosts user-defined JavaScript/TypeScript behind a pool of QuickJS
//! engines. Scripts see a fixed template of host globals (`log`, `time`,
//! `http`, `FS`, `Store`, `Query`, `WebSocket`, `Exception`, `Process`,
//! `Studio`, `Require`, `$L`, `All`/`Any`/`Race`, `Use`, plus registered
//! constructors such as `MCP`); the host sees typed values, typed errors,
//! and source-map-resolved stack traces.
//!
//! # Example
//!
//! ```no_run
//! use weir_runtime::{Config, Runtime};
//! use weir_runtime::bridge::ShareData;
//!
//! let runtime = Runtime::new(Config::default()).unwrap();
//! runtime
//!     .load_source("u", "u.js", "function Hello(n){return \"hello:\"+n;}", false)
//!     .unwrap();
//! let out = runtime
//!     .call("u", "Hello", vec![serde_json::json!("world")], ShareData::default())
//!     .unwrap();
//! assert_eq!(out, serde_json::json!("hello:world"));
//! ```
//!
//! # Architecture
//!
//! ```text
//! HTTP / WebSocket / Process bus
//!            |
//!       Dispatcher ── standard: IsolatePool + ContextCache
//!            |        performance: RunnerPool (thread per runner)
//!         Bridge  ── marshal / unmarshal, object registry, share record
//!            |
//!        QuickJS engines (one heap each, template installed per context)
//! ```

pub mod bridge;
pub mod cache;
mod call;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod globals;
pub mod pool;
pub mod runner;
pub mod script;
pub mod smap;
pub mod transform;

mod runtime;

pub use config::{Config, Mode};
pub use engine::{HeapStats, Isolate, IsolateStatus};
pub use error::{Error, Result};
pub use globals::{
    ConsoleLevel, QueryEngine, Services, register_query_engine, set_console_handler, set_locale,
};
pub use runner::{RunnerHandle, RunnerState};
pub use runtime::Runtime;
pub use script::{Script, ScriptRegistry};
pub use smap::{PathRewrite, SourceIndex, StackFrame, parse_stack};

pub mod prelude {
    pub use crate::bridge::{ShareData, Value};
    pub use crate::config::{Config, Mode};
    pub use crate::error::{Error, Result};
    pub use crate::runtime::Runtime;
    pub use crate::smap::PathRewrite;
}
