//! `time` global.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rquickjs::{Ctx, Function, Object};
use tracing::warn;

use crate::bridge::share_from_context;
use crate::globals::{arg_json, arg_string, coerce, json_value};

/// Upper bound for `time.Sleep`; a script cannot park an engine for longer
/// than this in one call.
const MAX_SLEEP_MS: u64 = 60_000;

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let time = Object::new(ctx.clone())?;

    time.set(
        "Sleep",
        Function::new(ctx.clone(), |ms: u64| {
            std::thread::sleep(Duration::from_millis(ms.min(MAX_SLEEP_MS)));
        })?,
    )?;

    time.set(
        "Now",
        Function::new(ctx.clone(), || -> f64 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as f64)
                .unwrap_or_default()
        })?,
    )?;

    // time.After(ms, process, ...args): fire-and-forget deferred process
    // invocation on its own thread
    time.set(
        "After",
        Function::new(
            ctx.clone(),
            coerce(|ctx, args| {
                let delay = args
                    .first()
                    .and_then(|v| v.as_number())
                    .map(|n| n.max(0.0) as u64)
                    .unwrap_or(0);
                let process = arg_string(&ctx, &args, 1)?;
                let mut call_args = Vec::new();
                let mut i = 2;
                while let Some(value) = arg_json(&args, i) {
                    call_args.push(value);
                    i += 1;
                }
                let sid = share_from_context(&ctx).sid;

                std::thread::Builder::new()
                    .name("weir-timer".to_string())
                    .spawn(move || {
                        std::thread::sleep(Duration::from_millis(delay));
                        let context = weir_process::Context::with_sid(&sid);
                        if let Err(e) = weir_process::run(&process, call_args, context) {
                            warn!(target: "weir", process = %process, error = %e, "deferred invocation failed");
                        }
                    })
                    .ok();

                json_value(&ctx, serde_json::Value::Bool(true))
            }),
        )?,
    )?;

    ctx.globals().set("time", time)
}
