//! API and path descriptors.
//!
//! An API is a JSON document naming a group of paths; each path binds an
//! HTTP method and pattern to a process, with `in` selectors describing how
//! request data becomes process arguments and `out` describing the
//! response.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use weir_process::Exception;

use crate::{WebError, WebResult};

/// A loaded API document.
#[derive(Debug, Clone, Deserialize)]
pub struct Api {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Mount prefix for every path in this API, e.g. `"/api/user"`.
    #[serde(default)]
    pub group: String,
    /// Default guard process; `"-"` marks public, empty inherits nothing.
    #[serde(default)]
    pub guard: String,
    #[serde(default)]
    pub paths: Vec<Path>,
}

impl Api {
    /// Parse an API descriptor from JSON bytes.
    pub fn parse(file: &str, source: &[u8]) -> WebResult<Self> {
        serde_json::from_slice(source).map_err(|e| WebError::Parse {
            file: file.to_string(),
            message: e.to_string(),
        })
    }
}

/// One route: method + pattern -> process.
#[derive(Debug, Clone, Deserialize)]
pub struct Path {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Pattern with `:name` parameters and a trailing `*rest` wildcard.
    pub path: String,
    pub method: String,
    /// Guard override for this path; `"-"` marks public.
    #[serde(default)]
    pub guard: String,
    /// Process invoked for this path.
    pub process: String,
    /// Argument selectors, resolved against the request.
    #[serde(default, rename = "in")]
    pub r#in: Vec<Value>,
    #[serde(default)]
    pub out: Out,
}

/// Response shaping.
#[derive(Debug, Clone, Deserialize)]
pub struct Out {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Literal response body overriding the process result.
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub redirect: Option<Redirect>,
    /// Stream the process output chunk-by-chunk instead of buffering.
    #[serde(default)]
    pub stream: bool,
}

fn default_status() -> u16 {
    200
}

impl Default for Out {
    fn default() -> Self {
        Self {
            status: default_status(),
            content_type: String::new(),
            headers: HashMap::new(),
            body: None,
            redirect: None,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Redirect {
    pub code: u16,
    pub location: String,
}

/// The request view the router and selectors operate on. Transport-agnostic
/// so the hosting binary can feed it from any HTTP stack.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Pattern parameters filled by the router.
    pub params: HashMap<String, String>,
    pub query: HashMap<String, Vec<String>>,
    pub headers: HashMap<String, String>,
    /// Parsed JSON body; `Null` when absent or not JSON.
    pub payload: Value,
    pub sid: String,
}

/// What the path handler produced.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl Path {
    /// Resolve the `in` selectors into process arguments.
    ///
    /// Supported selectors: `":payload"`, `":query"`, `":params"`,
    /// `":fullpath"`, `"$param.x"`, `"$query.x"`, `"$payload.x"`,
    /// `"$header.X-Name"`; anything else (including non-strings) passes
    /// through as a literal.
    pub fn resolve_args(&self, request: &Request) -> Vec<Value> {
        self.r#in
            .iter()
            .map(|selector| resolve_one(selector, request))
            .collect()
    }

    /// Effective guard for this path given the API default.
    pub fn effective_guard<'a>(&'a self, api_guard: &'a str) -> Option<&'a str> {
        let guard = if self.guard.is_empty() {
            api_guard
        } else {
            &self.guard
        };
        match guard {
            "" | "-" => None,
            name => Some(name),
        }
    }
}

fn resolve_one(selector: &Value, request: &Request) -> Value {
    let Some(text) = selector.as_str() else {
        return selector.clone();
    };
    match text {
        ":payload" => request.payload.clone(),
        ":query" => {
            let map: serde_json::Map<String, Value> = request
                .query
                .iter()
                .map(|(k, v)| {
                    let value = if v.len() == 1 {
                        Value::String(v[0].clone())
                    } else {
                        Value::Array(v.iter().cloned().map(Value::String).collect())
                    };
                    (k.clone(), value)
                })
                .collect();
            Value::Object(map)
        }
        ":params" => {
            let map: serde_json::Map<String, Value> = request
                .params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Value::Object(map)
        }
        ":fullpath" => Value::String(request.path.clone()),
        _ => {
            if let Some(name) = text.strip_prefix("$param.") {
                request
                    .params
                    .get(name)
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or(Value::Null)
            } else if let Some(name) = text.strip_prefix("$query.") {
                request
                    .query
                    .get(name)
                    .and_then(|v| v.first())
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or(Value::Null)
            } else if let Some(name) = text.strip_prefix("$payload.") {
                request.payload.get(name).cloned().unwrap_or(Value::Null)
            } else if let Some(name) = text.strip_prefix("$header.") {
                request
                    .headers
                    .get(&name.to_lowercase())
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or(Value::Null)
            } else {
                Value::String(text.to_string())
            }
        }
    }
}

/// Run the guard process for a request. The guard receives the request
/// path, params, query, payload and headers; its return value (a map, if
/// any) becomes the authorized map of the invocation context. A thrown
/// exception denies the request.
pub fn run_guard(
    guard: &str,
    request: &Request,
) -> Result<Option<HashMap<String, Value>>, WebError> {
    let args = vec![
        Value::String(request.path.clone()),
        resolve_one(&Value::String(":params".into()), request),
        resolve_one(&Value::String(":query".into()), request),
        request.payload.clone(),
        Value::Object(
            request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    ];

    let context = weir_process::Context::with_sid(&request.sid);
    match weir_process::run(guard, args, context) {
        Ok(Value::Object(map)) => Ok(Some(map.into_iter().collect())),
        Ok(_) => Ok(None),
        Err(Exception { message, .. }) => Err(WebError::GuardDenied(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Request {
        Request {
            method: "POST".into(),
            path: "/api/user/42/pet".into(),
            params: HashMap::from([("id".to_string(), "42".to_string())]),
            query: HashMap::from([("page".to_string(), vec!["2".to_string()])]),
            headers: HashMap::from([("x-token".to_string(), "abc".to_string())]),
            payload: json!({"name": "rex"}),
            sid: "s-1".into(),
        }
    }

    fn path(selectors: Vec<Value>) -> Path {
        Path {
            label: String::new(),
            description: String::new(),
            path: "/user/:id/pet".into(),
            method: "POST".into(),
            guard: String::new(),
            process: "tests.none".into(),
            r#in: selectors,
            out: Out::default(),
        }
    }

    #[test]
    fn selectors_resolve() {
        let p = path(vec![
            json!("$param.id"),
            json!("$query.page"),
            json!("$payload.name"),
            json!("$header.X-Token"),
            json!(":payload"),
            json!("literal"),
            json!(42),
        ]);
        let args = p.resolve_args(&request());
        assert_eq!(
            args,
            vec![
                json!("42"),
                json!("2"),
                json!("rex"),
                json!("abc"),
                json!({"name": "rex"}),
                json!("literal"),
                json!(42),
            ]
        );
    }

    #[test]
    fn missing_selectors_are_null() {
        let p = path(vec![json!("$param.nope"), json!("$query.nope")]);
        assert_eq!(p.resolve_args(&request()), vec![Value::Null, Value::Null]);
    }

    #[test]
    fn guard_resolution() {
        let p = path(vec![]);
        assert_eq!(p.effective_guard("bearer"), Some("bearer"));
        assert_eq!(p.effective_guard("-"), None);

        let mut public = path(vec![]);
        public.guard = "-".into();
        assert_eq!(public.effective_guard("bearer"), None);

        let mut own = path(vec![]);
        own.guard = "scripts.guard.check".into();
        assert_eq!(own.effective_guard("bearer"), Some("scripts.guard.check"));
    }

    #[test]
    fn api_parse_rejects_bad_json() {
        let err = Api::parse("user.http.json", b"{not json").unwrap_err();
        assert!(matches!(err, WebError::Parse { .. }));
    }
}
