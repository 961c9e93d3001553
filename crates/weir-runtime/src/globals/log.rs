//! `log` and `console` globals.
//!
//! Both route through a swappable handler that defaults to the tracing
//! crate; embedders (and tests) can capture script output with
//! `set_console_handler`.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use tracing::{debug, error, info, trace, warn};

use crate::bridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

type ConsoleHandler = dyn Fn(ConsoleLevel, &str) + Send + Sync + 'static;

static CONSOLE_HANDLER: OnceLock<Mutex<Arc<ConsoleHandler>>> = OnceLock::new();

pub fn set_console_handler(handler: impl Fn(ConsoleLevel, &str) + Send + Sync + 'static) {
    let lock = CONSOLE_HANDLER.get_or_init(|| Mutex::new(Arc::new(default_console_handler)));
    *lock.lock() = Arc::new(handler);
}

fn default_console_handler(level: ConsoleLevel, message: &str) {
    match level {
        ConsoleLevel::Trace => trace!(target: "weir", "{}", message),
        ConsoleLevel::Debug => debug!(target: "weir", "{}", message),
        ConsoleLevel::Info => info!(target: "weir", "{}", message),
        ConsoleLevel::Warn => warn!(target: "weir", "{}", message),
        ConsoleLevel::Error => error!(target: "weir", "{}", message),
    }
}

fn dispatch(level: ConsoleLevel, message: &str) {
    let lock = CONSOLE_HANDLER.get_or_init(|| Mutex::new(Arc::new(default_console_handler)));
    let handler = lock.lock().clone();
    handler(level, message);
}

/// Render script arguments the way console output should look: strings
/// as-is, everything else as JSON.
pub(crate) fn format_args(args: &[Value<'_>]) -> String {
    args.iter()
        .map(|arg| {
            if let Some(s) = arg.as_string() {
                return s.to_string().unwrap_or_default();
            }
            match bridge::unmarshal(arg) {
                Ok(value) => value.to_json().to_string(),
                Err(_) => "<opaque>".to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn level_fn<'js>(ctx: &Ctx<'js>, level: ConsoleLevel) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), move |args: Rest<Value<'_>>| {
        dispatch(level, &format_args(&args));
    })
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let log = Object::new(ctx.clone())?;
    log.set("Trace", level_fn(ctx, ConsoleLevel::Trace)?)?;
    log.set("Debug", level_fn(ctx, ConsoleLevel::Debug)?)?;
    log.set("Info", level_fn(ctx, ConsoleLevel::Info)?)?;
    log.set("Warn", level_fn(ctx, ConsoleLevel::Warn)?)?;
    log.set("Error", level_fn(ctx, ConsoleLevel::Error)?)?;
    globals.set("log", log)?;

    let console = Object::new(ctx.clone())?;
    console.set("log", level_fn(ctx, ConsoleLevel::Info)?)?;
    console.set("info", level_fn(ctx, ConsoleLevel::Info)?)?;
    console.set("debug", level_fn(ctx, ConsoleLevel::Debug)?)?;
    console.set("warn", level_fn(ctx, ConsoleLevel::Warn)?)?;
    console.set("error", level_fn(ctx, ConsoleLevel::Error)?)?;
    globals.set("console", console)?;

    Ok(())
}
