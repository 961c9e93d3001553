//! weir-process - the process bus.
//!
//! A process is a host handler registered under a dotted string name
//! (`"models.user.find"`, `"scripts.billing.Invoice"`). Scripts call into
//! the bus through the `Process(...)` global; HTTP paths name processes as
//! their handlers. Registration happens once at program init; invocation is
//! concurrent and lock-free on the hot path.
//!
//! # Example
//!
//! ```
//! use weir_process::{register, run, Context, Process};
//! use serde_json::json;
//!
//! register("demo.echo", |p: &mut Process| Ok(json!(p.args.clone()))).unwrap();
//!
//! let out = run("demo.Echo", vec![json!(1)], Context::default()).unwrap();
//! assert_eq!(out, json!([1]));
//! ```

mod cancel;
mod exception;
mod process;
mod registry;

pub use cancel::CancelToken;
pub use exception::Exception;
pub use process::{Context, Process};
pub use registry::{exists, names_with_prefix, register, run, Handler, RegisterError};
