//! The `Store` constructor, fronting the registered KV stores.

use std::time::Duration;

use rquickjs::class::Trace;
use rquickjs::prelude::Opt;
use rquickjs::{Class, Ctx, JsLifetime, Value};

use weir_kv::StoreHandle;

use crate::bridge;
use crate::globals::json_value;

#[rquickjs::class(rename = "Store")]
#[derive(Clone, Trace, JsLifetime)]
pub struct Store {
    #[qjs(skip_trace)]
    name: String,
    #[qjs(skip_trace)]
    handle: StoreHandle,
}

fn kv_err(ctx: &Ctx<'_>, e: weir_kv::KvError) -> rquickjs::Error {
    rquickjs::Exception::throw_message(ctx, &e.to_string())
}

#[rquickjs::methods]
impl Store {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, name: String) -> rquickjs::Result<Self> {
        let handle = weir_kv::open_store(&name).map_err(|e| kv_err(&ctx, e))?;
        Ok(Self { name, handle })
    }

    #[qjs(get)]
    pub fn name(&self) -> String {
        self.name.clone()
    }

    #[qjs(rename = "Get")]
    pub fn get<'js>(&self, ctx: Ctx<'js>, key: String) -> rquickjs::Result<Value<'js>> {
        match self.handle.get(&key).map_err(|e| kv_err(&ctx, e))? {
            Some(value) => json_value(&ctx, value),
            None => Ok(Value::new_undefined(ctx)),
        }
    }

    #[qjs(rename = "Set")]
    pub fn set(
        &self,
        ctx: Ctx<'_>,
        key: String,
        value: Value<'_>,
        ttl: Opt<u64>,
    ) -> rquickjs::Result<()> {
        let json = bridge::unmarshal(&value)
            .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string()))?
            .to_json();
        self.handle
            .set(&key, &json, ttl.0.map(Duration::from_secs))
            .map_err(|e| kv_err(&ctx, e))
    }

    #[qjs(rename = "Has")]
    pub fn has(&self, ctx: Ctx<'_>, key: String) -> rquickjs::Result<bool> {
        self.handle.has(&key).map_err(|e| kv_err(&ctx, e))
    }

    #[qjs(rename = "Del")]
    pub fn del(&self, ctx: Ctx<'_>, key: String) -> rquickjs::Result<()> {
        self.handle.del(&key).map_err(|e| kv_err(&ctx, e))
    }

    #[qjs(rename = "Keys")]
    pub fn keys(&self, ctx: Ctx<'_>) -> rquickjs::Result<Vec<String>> {
        self.handle.keys().map_err(|e| kv_err(&ctx, e))
    }

    #[qjs(rename = "Len")]
    pub fn len(&self, ctx: Ctx<'_>) -> rquickjs::Result<usize> {
        self.handle.len().map_err(|e| kv_err(&ctx, e))
    }

    #[qjs(rename = "Clear")]
    pub fn clear(&self, ctx: Ctx<'_>) -> rquickjs::Result<()> {
        self.handle.clear().map_err(|e| kv_err(&ctx, e))
    }
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    Class::<Store>::define(&ctx.globals())
}
