//! The `Query` constructor.
//!
//! The relational side is a collaborator: the runtime only defines the
//! engine seam. Embedders register a [`QueryEngine`] per name; scripts run
//! `new Query("default").Get({...})` with an engine-specific DSL document.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rquickjs::class::Trace;
use rquickjs::prelude::Opt;
use rquickjs::{Class, Ctx, JsLifetime, Value};

use weir_process::Exception;

use crate::bridge;
use crate::globals::{json_value, throw_exception};

/// A named query backend.
pub trait QueryEngine: Send + Sync {
    /// Execute a DSL document and return rows (or any JSON result).
    fn query(&self, dsl: serde_json::Value) -> Result<serde_json::Value, Exception>;
}

static ENGINES: Lazy<RwLock<HashMap<String, Arc<dyn QueryEngine>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a query engine under a name. Replacing an engine affects new
/// `Query` instances only.
pub fn register_query_engine(name: &str, engine: Arc<dyn QueryEngine>) {
    ENGINES.write().insert(name.to_string(), engine);
}

#[rquickjs::class(rename = "Query")]
#[derive(Clone, Trace, JsLifetime)]
pub struct Query {
    #[qjs(skip_trace)]
    engine: Arc<dyn QueryEngine>,
}

#[rquickjs::methods]
impl Query {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, name: Opt<String>) -> rquickjs::Result<Self> {
        let name = name.0.unwrap_or_else(|| "default".to_string());
        let engine = ENGINES.read().get(&name).cloned().ok_or_else(|| {
            rquickjs::Exception::throw_message(&ctx, &format!("query engine {name} not registered"))
        })?;
        Ok(Self { engine })
    }

    #[qjs(rename = "Get")]
    pub fn get<'js>(&self, ctx: Ctx<'js>, dsl: Value<'js>) -> rquickjs::Result<Value<'js>> {
        let dsl = bridge::unmarshal(&dsl)
            .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string()))?
            .to_json();
        match self.engine.query(dsl) {
            Ok(result) => json_value(&ctx, result),
            Err(e) => Err(throw_exception(&ctx, e)),
        }
    }

    /// `First` returns the first row of `Get`, or undefined.
    #[qjs(rename = "First")]
    pub fn first<'js>(&self, ctx: Ctx<'js>, dsl: Value<'js>) -> rquickjs::Result<Value<'js>> {
        let dsl = bridge::unmarshal(&dsl)
            .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string()))?
            .to_json();
        match self.engine.query(dsl) {
            Ok(serde_json::Value::Array(rows)) => match rows.into_iter().next() {
                Some(row) => json_value(&ctx, row),
                None => Ok(Value::new_undefined(ctx)),
            },
            Ok(other) => json_value(&ctx, other),
            Err(e) => Err(throw_exception(&ctx, e)),
        }
    }
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    Class::<Query>::define(&ctx.globals())
}
