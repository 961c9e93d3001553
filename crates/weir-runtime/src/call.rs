//! The call path shared by both execution modes.
//!
//! A call: install the share record and cancellation state, look the
//! method up, invoke it through the `__invoke` trampoline, settle a
//! possible promise, unmarshal the result, clear the share record. Engine
//! exceptions and host panics are both converted to typed errors here, at
//! the engine boundary.

use std::panic::{AssertUnwindSafe, catch_unwind};

use rquickjs::promise::MaybePromise;
use rquickjs::{Array, Context, Ctx, Function};
use scopeguard::defer;

use weir_process::{CancelToken, Exception};

use crate::bridge::{self, ShareData, Value, clear_share, set_share};
use crate::engine::Isolate;
use crate::error::{Error, Result};
use crate::globals::process::CallState;
use crate::script::Script;
use crate::smap::{PathRewrite, SourceIndex};

/// Compile and run a script's bundle in a context, bounded by the
/// script's own timeout.
pub(crate) fn eval_bundle(
    isolate: &Isolate,
    context: &Context,
    script: &Script,
    debug: bool,
) -> Result<()> {
    let token = CancelToken::with_timeout(script.timeout);
    isolate.begin_call(token.clone());
    defer! { isolate.end_call(); }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        context.with(|ctx| match ctx.eval::<(), _>(script.bundle.code.clone()) {
            Ok(()) => Ok(()),
            Err(rquickjs::Error::Exception) => {
                Err(match caught_to_error(&ctx, script, debug, &PathRewrite::None) {
                    Error::Runtime { message, .. } => Error::compile(&script.id, message),
                    other => other,
                })
            }
            Err(e) => Err(Error::compile(&script.id, e.to_string())),
        })
    }));

    let timeout_ms = script.timeout.as_millis() as u64;
    match outcome {
        Ok(result) => classify_cancel(result, &token, timeout_ms),
        Err(_) => Err(Error::runtime("host function panicked during compile")),
    }
}

/// Invoke one method of an already-evaluated script.
pub(crate) fn call_method(
    isolate: &Isolate,
    context: &Context,
    script: &Script,
    method: &str,
    args: &[Value],
    share: &ShareData,
    cancel: CancelToken,
    timeout_ms: u64,
    debug: bool,
    rewrite: &PathRewrite,
) -> Result<Value> {
    isolate.begin_call(cancel.clone());
    defer! { isolate.end_call(); }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        context.with(|ctx| -> Result<Value> {
            set_share(&ctx, share)?;
            let _ = ctx.store_userdata(CallState {
                cancel: cancel.clone(),
            });

            let result = invoke(&ctx, script, method, args, debug, rewrite);

            if let Err(e) = clear_share(&ctx) {
                tracing::warn!(target: "weir", error = %e, "share record cleanup failed");
            }
            result
        })
    }));

    match outcome {
        Ok(result) => classify_cancel(result, &cancel, timeout_ms),
        Err(_) => Err(Error::runtime("host function panicked")),
    }
}

fn invoke<'js>(
    ctx: &Ctx<'js>,
    script: &Script,
    method: &str,
    args: &[Value],
    debug: bool,
    rewrite: &PathRewrite,
) -> Result<Value> {
    // explicit existence check so a missing method is NotFound, not a
    // generic engine exception
    let _func: Function = ctx.globals().get(method).map_err(|_| {
        Error::not_found(format!("method {method} of script {}", script.id))
    })?;

    let call_args = Array::new(ctx.clone())
        .map_err(|e| Error::internal(format!("engine: {e}")))?;
    for (i, arg) in args.iter().enumerate() {
        call_args
            .set(i, bridge::marshal(ctx, arg)?)
            .map_err(|e| Error::internal(format!("engine: {e}")))?;
    }

    let trampoline: Function = ctx
        .globals()
        .get("__invoke")
        .map_err(|e| Error::internal(format!("bootstrap missing: {e}")))?;

    let settled: std::result::Result<rquickjs::Value, rquickjs::Error> = trampoline
        .call::<_, MaybePromise>((method, call_args))
        .and_then(|p| p.finish());

    match settled {
        Ok(value) => bridge::unmarshal(&value),
        Err(rquickjs::Error::Exception) => Err(caught_to_error(ctx, script, debug, rewrite)),
        Err(e) => Err(Error::runtime(e.to_string())),
    }
}

/// Engine-interrupted calls look like generic exceptions; reclassify them
/// by what the token says.
fn classify_cancel<T>(result: Result<T>, token: &CancelToken, timeout_ms: u64) -> Result<T> {
    match result {
        Err(e) if token.deadline_expired() => Err(match e {
            Error::Exception(_) => e,
            _ => Error::Timeout(timeout_ms),
        }),
        Err(e) if token.is_cancelled() => Err(match e {
            Error::Exception(_) => e,
            _ => Error::Cancelled,
        }),
        other => other,
    }
}

/// Convert the pending engine exception into a typed error.
///
/// Typed exceptions (the `Exception` class, or any thrown object with a
/// numeric `code` and a `message`) keep their status code. Everything else
/// becomes a runtime error with the source-map-resolved stack in debug
/// mode.
pub(crate) fn caught_to_error(
    ctx: &Ctx<'_>,
    script: &Script,
    debug: bool,
    rewrite: &PathRewrite,
) -> Error {
    let caught = ctx.catch();

    let mut message = String::new();
    let mut raw_stack = None;
    let mut code = None;

    if let Some(obj) = caught.as_object() {
        code = obj.get::<_, i32>("code").ok().filter(|c| *c != 0);
        message = obj.get::<_, String>("message").unwrap_or_default();
        raw_stack = obj.get::<_, String>("stack").ok().filter(|s| !s.is_empty());
    }
    if message.is_empty() {
        message = caught
            .as_string()
            .and_then(|s| s.to_string().ok())
            .unwrap_or_else(|| "unknown script exception".to_string());
    }

    // host functions rethrow typed exceptions as "Exception|code: message"
    if let Some(rest) = message.strip_prefix("Exception|") {
        if let Some((code_text, rest_message)) = rest.split_once(": ") {
            if let Ok(parsed) = code_text.parse::<i32>() {
                return Error::Exception(Exception::new(parsed, rest_message.to_string()));
            }
        }
    }

    if let Some(code) = code {
        return Error::Exception(Exception::new(code, message));
    }

    let stack = if debug {
        raw_stack
            .as_ref()
            .map(|raw| SourceIndex::from_bundle(&script.bundle).rewrite_stack(raw, rewrite))
            .filter(|s| !s.is_empty())
    } else {
        None
    };

    Error::Runtime {
        message,
        stack,
        raw_stack,
    }
}
