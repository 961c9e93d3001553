//! The `Exception` constructor.
//!
//! Scripts throw typed errors with `throw new Exception(message, code)`;
//! the code travels to the host and becomes the HTTP response status.

use rquickjs::class::Trace;
use rquickjs::prelude::Opt;
use rquickjs::{Class, Ctx, JsLifetime};

/// Script-visible typed exception.
#[rquickjs::class(rename = "Exception")]
#[derive(Clone, Trace, JsLifetime)]
pub struct JsException {
    #[qjs(skip_trace)]
    message: String,
    #[qjs(skip_trace)]
    code: i32,
}

#[rquickjs::methods]
impl JsException {
    #[qjs(constructor)]
    pub fn new(message: String, code: Opt<i32>) -> Self {
        Self {
            message,
            code: code.0.unwrap_or(500),
        }
    }

    #[qjs(get)]
    pub fn message(&self) -> String {
        self.message.clone()
    }

    #[qjs(get)]
    pub fn code(&self) -> i32 {
        self.code
    }

    #[qjs(get)]
    pub fn name(&self) -> String {
        "Exception".to_string()
    }

    #[qjs(rename = "toString")]
    pub fn to_string(&self) -> String {
        format!("Exception|{}: {}", self.code, self.message)
    }
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    Class::<JsException>::define(&ctx.globals())
}
