//! The process-wide name -> handler registry.
//!
//! Names are case-normalized (lowercased) and registered exactly once, at
//! init time. Invocation takes the read lock only.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::exception::Exception;
use crate::process::{Context, Process};

/// A registered handler. Receives the invocation value mutably so it can
/// consume arguments without cloning.
pub type Handler = Arc<dyn Fn(&mut Process) -> Result<Value, Exception> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("process {0} is already registered")]
    Duplicate(String),
    #[error("process name {0:?} is invalid")]
    InvalidName(String),
}

static HANDLERS: Lazy<RwLock<HashMap<String, Handler>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Register a handler under a dotted name. Duplicate registration is an
/// error; the registry is write-once per name.
pub fn register<F>(name: &str, handler: F) -> Result<(), RegisterError>
where
    F: Fn(&mut Process) -> Result<Value, Exception> + Send + Sync + 'static,
{
    let name = normalize(name)?;
    let mut handlers = HANDLERS.write();
    if handlers.contains_key(&name) {
        return Err(RegisterError::Duplicate(name));
    }
    debug!(target: "weir", process = %name, "process registered");
    handlers.insert(name, Arc::new(handler));
    Ok(())
}

/// Whether a handler exists under the (case-insensitive) name.
pub fn exists(name: &str) -> bool {
    match normalize(name) {
        Ok(name) => HANDLERS.read().contains_key(&name),
        Err(_) => false,
    }
}

/// Registered names under a dotted prefix, e.g. `"scripts."`.
pub fn names_with_prefix(prefix: &str) -> Vec<String> {
    let prefix = prefix.to_lowercase();
    let mut names: Vec<String> = HANDLERS
        .read()
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .cloned()
        .collect();
    names.sort();
    names
}

/// Invoke a process by name.
///
/// Unknown names fall back to wildcard handlers: a handler registered as
/// `"scripts.*"` answers every name under that prefix (longest prefix
/// wins). Still-unknown names fail with a 404 exception. The handler runs
/// outside the registry lock so it may itself re-enter the bus.
pub fn run(name: &str, args: Vec<Value>, context: Context) -> Result<Value, Exception> {
    let normalized = normalize(name)
        .map_err(|_| Exception::bad_request(format!("invalid process name {name:?}")))?;

    if context.cancel.is_cancelled() {
        return Err(Exception::new(408, "invocation cancelled"));
    }

    let handler = resolve(&normalized)
        .ok_or_else(|| Exception::not_found(format!("process {normalized} not found")))?;

    let group = normalized
        .split_once('.')
        .map(|(g, _)| g.to_string())
        .unwrap_or_default();

    let mut process = Process {
        id: format!("p-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed)),
        name: normalized,
        raw_name: name.trim().to_string(),
        group,
        args,
        context,
    };

    handler(&mut process)
}

/// Exact-name lookup, then wildcard prefixes from longest to shortest.
fn resolve(normalized: &str) -> Option<Handler> {
    let handlers = HANDLERS.read();
    if let Some(handler) = handlers.get(normalized) {
        return Some(handler.clone());
    }
    let mut prefix = normalized;
    while let Some((head, _)) = prefix.rsplit_once('.') {
        if let Some(handler) = handlers.get(&format!("{head}.*")) {
            return Some(handler.clone());
        }
        prefix = head;
    }
    None
}

fn normalize(name: &str) -> Result<String, RegisterError> {
    let name = name.trim().to_lowercase();
    if name.is_empty() || name.starts_with('.') || name.ends_with('.') {
        return Err(RegisterError::InvalidName(name));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_run_and_duplicate() {
        register("tests.registry.echo", |p| Ok(json!(p.args.clone()))).unwrap();

        // case-insensitive lookup
        let out = run("Tests.Registry.Echo", vec![json!("x")], Context::default()).unwrap();
        assert_eq!(out, json!(["x"]));

        let err = register("TESTS.registry.echo", |_| Ok(Value::Null)).unwrap_err();
        assert!(matches!(err, RegisterError::Duplicate(_)));
    }

    #[test]
    fn unknown_process_is_404() {
        let err = run("tests.registry.missing", vec![], Context::default()).unwrap_err();
        assert_eq!(err.code, 404);
    }

    #[test]
    fn cancelled_context_short_circuits() {
        register("tests.registry.never", |_| Ok(Value::Null)).unwrap();
        let context = Context::default();
        context.cancel.cancel();
        let err = run("tests.registry.never", vec![], context).unwrap_err();
        assert_eq!(err.code, 408);
    }

    #[test]
    fn group_is_first_segment() {
        register("tests.registry.group", |p| Ok(json!(p.group.clone()))).unwrap();
        let out = run("tests.registry.group", vec![], Context::default()).unwrap();
        assert_eq!(out, json!("tests"));
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(matches!(
            register(".bad", |_| Ok(Value::Null)),
            Err(RegisterError::InvalidName(_))
        ));
        assert!(!exists(""));
    }

    #[test]
    fn wildcard_handler_answers_the_group() {
        register("tests.wild.*", |p| {
            Ok(json!({"name": p.name.clone(), "raw": p.raw_name.clone()}))
        })
        .unwrap();

        let out = run("tests.wild.u.Hello", vec![], Context::default()).unwrap();
        assert_eq!(out["name"], json!("tests.wild.u.hello"));
        assert_eq!(out["raw"], json!("tests.wild.u.Hello"));

        // exact registrations shadow the wildcard
        register("tests.wild.exact", |_| Ok(json!("exact"))).unwrap();
        let out = run("tests.wild.exact", vec![], Context::default()).unwrap();
        assert_eq!(out, json!("exact"));
    }

    #[test]
    fn prefix_listing() {
        register("tests.prefix.a", |_| Ok(Value::Null)).unwrap();
        register("tests.prefix.b", |_| Ok(Value::Null)).unwrap();
        let names = names_with_prefix("tests.prefix.");
        assert_eq!(names, vec!["tests.prefix.a", "tests.prefix.b"]);
    }
}
