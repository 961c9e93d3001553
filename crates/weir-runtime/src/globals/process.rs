//! `Process` and `Studio` free functions: the script side of the bus.
//!
//! Both read the share record for session and globals, pick up the
//! current call's cancellation token, and hand the invocation to
//! weir-process. A panicking handler is caught at this boundary and
//! surfaced as a 500 exception instead of tearing the worker down.

use std::panic::{AssertUnwindSafe, catch_unwind};

use rquickjs::{Ctx, Function, JsLifetime};

use weir_process::{CancelToken, Context as ProcessContext, Exception};

use crate::bridge::{self, share_from_context};
use crate::globals::{arg_string, coerce, json_value, throw_exception};

/// Per-call userdata carrying the cancellation token host functions poll.
#[derive(Clone, Default, JsLifetime)]
pub(crate) struct CallState {
    pub cancel: CancelToken,
}

pub(crate) fn current_cancel(ctx: &Ctx<'_>) -> CancelToken {
    ctx.userdata::<CallState>()
        .map(|s| s.cancel.clone())
        .unwrap_or_default()
}

pub(crate) fn run_guarded(
    name: &str,
    args: Vec<serde_json::Value>,
    context: ProcessContext,
) -> Result<serde_json::Value, Exception> {
    let outcome = catch_unwind(AssertUnwindSafe(|| weir_process::run(name, args, context)));
    match outcome {
        Ok(result) => result,
        Err(_) => Err(Exception::internal(format!("process {name} panicked"))),
    }
}

fn gather_args(
    ctx: &Ctx<'_>,
    args: &[rquickjs::Value<'_>],
    from: usize,
) -> rquickjs::Result<Vec<serde_json::Value>> {
    let mut out = Vec::with_capacity(args.len().saturating_sub(from));
    for arg in args.iter().skip(from) {
        let value = bridge::unmarshal(arg)
            .map_err(|e| rquickjs::Exception::throw_message(ctx, &e.to_string()))?;
        out.push(value.to_json());
    }
    Ok(out)
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        "Process",
        Function::new(
            ctx.clone(),
            coerce(|ctx, args| {
                let name = arg_string(&ctx, &args, 0)?;
                let call_args = gather_args(&ctx, &args, 1)?;
                let share = share_from_context(&ctx);
                let context = share.to_context(current_cancel(&ctx));

                match run_guarded(&name, call_args, context) {
                    Ok(result) => json_value(&ctx, result),
                    Err(e) => Err(throw_exception(&ctx, e)),
                }
            }),
        )?
        .with_name("Process")?,
    )?;

    globals.set(
        "Studio",
        Function::new(
            ctx.clone(),
            coerce(|ctx, args| {
                let share = share_from_context(&ctx);
                if !share.root {
                    return Err(throw_exception(
                        &ctx,
                        Exception::forbidden("Studio requires root privilege"),
                    ));
                }

                let name = arg_string(&ctx, &args, 0)?;
                let name = if name.starts_with("studio.") {
                    name
                } else {
                    format!("studio.{name}")
                };
                let call_args = gather_args(&ctx, &args, 1)?;
                let context = share.to_context(current_cancel(&ctx));

                match run_guarded(&name, call_args, context) {
                    Ok(result) => json_value(&ctx, result),
                    Err(e) => Err(throw_exception(&ctx, e)),
                }
            }),
        )?
        .with_name("Studio")?,
    )?;

    Ok(())
}
