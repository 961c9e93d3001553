//! The per-context template: every host binding a script can reach.
//!
//! `install` is the single place host functions enter a context; scripts
//! cannot add host bindings at runtime. Besides the individual globals it
//! evaluates a small bootstrap defining the `__invoke` call trampoline and
//! the `Use(Ctor, args, fn)` sugar, whose finally-block guarantees exactly
//! one `Release()` on every path.

pub(crate) mod concurrent;
pub(crate) mod exception;
pub(crate) mod fs;
pub(crate) mod http;
pub(crate) mod lang;
pub(crate) mod log;
pub(crate) mod mcp;
pub(crate) mod process;
pub(crate) mod query;
pub(crate) mod require;
pub(crate) mod store;
pub(crate) mod time;
pub(crate) mod websocket;

use std::sync::Arc;

use rquickjs::prelude::Rest;
use rquickjs::{Class, Ctx, Function, IntoJs, JsLifetime};

use crate::bridge::{self, HostRef};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::script::ScriptRegistry;

pub use lang::set_locale;
pub use log::{ConsoleLevel, set_console_handler};
pub use query::{QueryEngine, register_query_engine};

/// Host services the template closes over.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub scripts: Arc<ScriptRegistry>,
}

impl Services {
    pub fn new(config: Arc<Config>, scripts: Arc<ScriptRegistry>) -> Self {
        Self { config, scripts }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: Arc<Config>) -> Self {
        Self {
            config,
            scripts: Arc::new(ScriptRegistry::default()),
        }
    }
}

/// Context userdata giving class constructors access to the services.
#[derive(Clone, JsLifetime)]
pub(crate) struct RuntimeData {
    pub config: Arc<Config>,
    pub scripts: Arc<ScriptRegistry>,
}

pub(crate) fn runtime_data(ctx: &Ctx<'_>) -> rquickjs::Result<RuntimeData> {
    ctx.userdata::<RuntimeData>()
        .map(|d| RuntimeData {
            config: d.config.clone(),
            scripts: d.scripts.clone(),
        })
        .ok_or_else(|| {
            rquickjs::Exception::throw_message(ctx, "runtime services are not installed")
        })
}

/// Coerce a host-function closure so its returned `Value` shares the
/// `Ctx` lifetime. Rust cannot infer the higher-ranked signature on its
/// own; routing every closure through this helper pins it.
pub(crate) fn coerce<F>(f: F) -> F
where
    F: for<'js> Fn(Ctx<'js>, Rest<rquickjs::Value<'js>>) -> rquickjs::Result<rquickjs::Value<'js>>,
{
    f
}

/// Positional string argument or a thrown type error.
pub(crate) fn arg_string(ctx: &Ctx<'_>, args: &[rquickjs::Value<'_>], i: usize) -> rquickjs::Result<String> {
    args.get(i)
        .and_then(|v| v.as_string())
        .and_then(|s| s.to_string().ok())
        .ok_or_else(|| {
            rquickjs::Exception::throw_type(ctx, &format!("argument {i} must be a string"))
        })
}

/// Positional argument as JSON, `None` when absent or undefined.
pub(crate) fn arg_json(args: &[rquickjs::Value<'_>], i: usize) -> Option<serde_json::Value> {
    let value = args.get(i)?;
    if value.is_undefined() {
        return None;
    }
    bridge::unmarshal(value).ok().map(|v| v.to_json())
}

/// Marshal a JSON value back into the calling context.
pub(crate) fn json_value<'js>(
    ctx: &Ctx<'js>,
    json: serde_json::Value,
) -> rquickjs::Result<rquickjs::Value<'js>> {
    bridge::marshal(ctx, &bridge::Value::from_json(&json))
        .map_err(|e| rquickjs::Exception::throw_message(ctx, &e.to_string()))
}

/// Throw a typed exception into the context.
pub(crate) fn throw_exception(ctx: &Ctx<'_>, e: weir_process::Exception) -> rquickjs::Error {
    rquickjs::Exception::throw_message(ctx, &e.to_string())
}

const BOOTSTRAP: &str = r#"
globalThis.__invoke = function (name, args) {
    var fn = globalThis[name];
    return fn.apply(null, args);
};
globalThis.Use = function (Ctor, args, fn) {
    var list = Array.isArray(args) ? args : (args === undefined || args === null ? [] : [args]);
    var inst = Ctor.apply(null, list);
    try {
        return fn(inst);
    } finally {
        if (inst && typeof inst.Release === "function") {
            inst.Release();
        }
    }
};
"#;

/// Install the full host surface into a context.
pub fn install(ctx: &Ctx<'_>, services: &Services) -> Result<()> {
    let template_err = |e: rquickjs::Error| Error::internal(format!("template: {e}"));

    let data = RuntimeData {
        config: services.config.clone(),
        scripts: services.scripts.clone(),
    };
    ctx.store_userdata(data)
        .map_err(|_| Error::internal("template userdata install failed"))?;

    log::install(ctx).map_err(template_err)?;
    time::install(ctx).map_err(template_err)?;
    http::install(ctx).map_err(template_err)?;
    exception::install(ctx).map_err(template_err)?;
    fs::install(ctx).map_err(template_err)?;
    store::install(ctx).map_err(template_err)?;
    query::install(ctx).map_err(template_err)?;
    websocket::install(ctx).map_err(template_err)?;
    process::install(ctx).map_err(template_err)?;
    require::install(ctx).map_err(template_err)?;
    lang::install(ctx).map_err(template_err)?;
    concurrent::install(ctx).map_err(template_err)?;
    install_constructors(ctx).map_err(template_err)?;

    ctx.eval::<(), _>(BOOTSTRAP).map_err(template_err)?;
    Ok(())
}

/// Install the user-extensible constructor table (`MCP` and friends).
/// Each constructor registers its payload and hands back a `HostRef`
/// wrapper carrying the registry id.
fn install_constructors(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    for (name, factory) in bridge::constructor_table() {
        let ctor_name = name.clone();
        let func = Function::new(
            ctx.clone(),
            coerce(move |ctx, args| {
                let mut json_args = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    let value = bridge::unmarshal(arg)
                        .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string()))?;
                    json_args.push(value.to_json());
                }
                let payload = factory(json_args).map_err(|e| throw_exception(&ctx, e))?;
                let id = bridge::registry().register(payload);
                let instance = Class::instance(ctx.clone(), HostRef::wrap(id))?;
                instance.into_js(&ctx)
            }),
        )?
        .with_name(&ctor_name)?;
        globals.set(name.as_str(), func)?;
    }

    Ok(())
}
