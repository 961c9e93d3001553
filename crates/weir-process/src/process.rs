//! The invocation value handed to every handler.

use std::collections::HashMap;

use serde_json::Value;

use crate::cancel::CancelToken;
use crate::exception::Exception;

/// Ambient state an invocation runs under: session, shared globals, caller
/// privileges, cancellation. Built by whoever enters the bus (HTTP layer,
/// script runtime, tests) and propagated into nested invocations.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// Session id of the caller, empty when anonymous.
    pub sid: String,
    /// Host-supplied global map, visible to scripts as part of the share
    /// record.
    pub global: HashMap<String, Value>,
    /// Root-privilege flag; gates `studio.*` handlers.
    pub root: bool,
    /// Authorization claims, when a guard attached any.
    pub authorized: Option<HashMap<String, Value>>,
    /// Cancellation signal polled between host operations.
    pub cancel: CancelToken,
}

impl Context {
    pub fn with_sid(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            ..Self::default()
        }
    }
}

/// A single invocation against a registered handler.
///
/// Carries the positional arguments plus the ambient `Context`. Handlers
/// read arguments through the typed accessors, which fail with a 400
/// exception on arity or type violations.
#[derive(Clone, Debug)]
pub struct Process {
    /// Unique invocation id (`"p-<seq>"`), for correlation in logs.
    pub id: String,
    /// Full lowercased name the handler was resolved under.
    pub name: String,
    /// The name exactly as the caller wrote it. Wildcard handlers use this
    /// to recover case-sensitive segments (script method names).
    pub raw_name: String,
    /// Dotted prefix before the first `.`, e.g. `"scripts"`.
    pub group: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Ambient state.
    pub context: Context,
}

impl Process {
    /// Fail unless at least `n` arguments were passed.
    pub fn validate_args(&self, n: usize) -> Result<(), Exception> {
        if self.args.len() < n {
            return Err(Exception::bad_request(format!(
                "{}: requires at least {} arguments, got {}",
                self.name,
                n,
                self.args.len()
            )));
        }
        Ok(())
    }

    pub fn arg(&self, i: usize) -> Result<&Value, Exception> {
        self.args.get(i).ok_or_else(|| {
            Exception::bad_request(format!("{}: missing argument {}", self.name, i))
        })
    }

    pub fn arg_string(&self, i: usize) -> Result<String, Exception> {
        match self.arg(i)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.type_error(i, "string", other)),
        }
    }

    pub fn arg_int(&self, i: usize) -> Result<i64, Exception> {
        match self.arg(i)? {
            Value::Number(n) if n.as_i64().is_some() => Ok(n.as_i64().unwrap_or_default()),
            other => Err(self.type_error(i, "integer", other)),
        }
    }

    pub fn arg_bool(&self, i: usize) -> Result<bool, Exception> {
        match self.arg(i)? {
            Value::Bool(b) => Ok(*b),
            other => Err(self.type_error(i, "boolean", other)),
        }
    }

    pub fn arg_map(&self, i: usize) -> Result<serde_json::Map<String, Value>, Exception> {
        match self.arg(i)? {
            Value::Object(m) => Ok(m.clone()),
            other => Err(self.type_error(i, "map", other)),
        }
    }

    pub fn arg_array(&self, i: usize) -> Result<Vec<Value>, Exception> {
        match self.arg(i)? {
            Value::Array(a) => Ok(a.clone()),
            other => Err(self.type_error(i, "array", other)),
        }
    }

    fn type_error(&self, i: usize, expected: &str, got: &Value) -> Exception {
        Exception::bad_request(format!(
            "{}: argument {} must be a {}, got {}",
            self.name,
            i,
            expected,
            type_name(got)
        ))
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn process(args: Vec<Value>) -> Process {
        Process {
            id: "p-1".into(),
            name: "tests.args".into(),
            raw_name: "tests.args".into(),
            group: "tests".into(),
            args,
            context: Context::default(),
        }
    }

    #[test]
    fn typed_accessors() {
        let p = process(vec![json!("a"), json!(2), json!(true), json!({"k": 1})]);
        assert_eq!(p.arg_string(0).unwrap(), "a");
        assert_eq!(p.arg_int(1).unwrap(), 2);
        assert!(p.arg_bool(2).unwrap());
        assert_eq!(p.arg_map(3).unwrap().get("k"), Some(&json!(1)));
    }

    #[test]
    fn violations_are_400() {
        let p = process(vec![json!(1)]);
        assert_eq!(p.arg_string(0).unwrap_err().code, 400);
        assert_eq!(p.arg(5).unwrap_err().code, 400);
        assert_eq!(p.validate_args(2).unwrap_err().code, 400);
    }
}
