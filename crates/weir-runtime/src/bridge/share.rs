//! The per-call share record.
//!
//! Before a method call, the dispatcher installs a well-known global
//! carrying the session id, the root-privilege flag, the host-supplied
//! global map, and (when a guard attached any) the authorized claims.
//! After the call the global is deleted so the next invocation on the same
//! context starts clean.

use std::collections::HashMap;

use rquickjs::{Ctx, Object};

use crate::bridge::value::{marshal, Value};
use crate::error::{Error, Result};

/// Name of the script-visible share global. Kept stable because user
/// scripts read it directly.
pub const SHARE_GLOBAL: &str = "__yao_data";

/// What a call shares with the script world.
#[derive(Debug, Clone, Default)]
pub struct ShareData {
    pub sid: String,
    pub root: bool,
    pub global: HashMap<String, serde_json::Value>,
    pub authorized: Option<HashMap<String, serde_json::Value>>,
}

impl ShareData {
    pub fn with_sid(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            ..Self::default()
        }
    }

    /// The process-bus context equivalent of this record, used when a
    /// script re-enters the bus.
    pub fn to_context(&self, cancel: weir_process::CancelToken) -> weir_process::Context {
        weir_process::Context {
            sid: self.sid.clone(),
            global: self.global.clone(),
            root: self.root,
            authorized: self.authorized.clone(),
            cancel,
        }
    }
}

fn engine_err(e: rquickjs::Error) -> Error {
    Error::internal(format!("engine: {e}"))
}

/// Install the share record on the context global.
pub fn set_share(ctx: &Ctx<'_>, share: &ShareData) -> Result<()> {
    let record = Object::new(ctx.clone()).map_err(engine_err)?;
    record.set("SID", share.sid.as_str()).map_err(engine_err)?;
    record.set("ROOT", share.root).map_err(engine_err)?;

    let global = Value::from_json(&serde_json::Value::Object(
        share.global.clone().into_iter().collect(),
    ));
    record
        .set("DATA", marshal(ctx, &global)?)
        .map_err(engine_err)?;

    if let Some(authorized) = &share.authorized {
        let authorized = Value::from_json(&serde_json::Value::Object(
            authorized.clone().into_iter().collect(),
        ));
        record
            .set("AUTHORIZED", marshal(ctx, &authorized)?)
            .map_err(engine_err)?;
    }

    ctx.globals()
        .set(SHARE_GLOBAL, record)
        .map_err(engine_err)
}

/// Remove the share record, releasing the marshalled resources.
pub fn clear_share(ctx: &Ctx<'_>) -> Result<()> {
    ctx.eval::<(), _>(format!("delete globalThis.{SHARE_GLOBAL};"))
        .map_err(engine_err)
}

/// Read the share record back from a context; missing pieces fall back to
/// defaults so host functions can always rely on the shape.
pub fn share_from_context(ctx: &Ctx<'_>) -> ShareData {
    let Ok(record) = ctx.globals().get::<_, Object>(SHARE_GLOBAL) else {
        return ShareData::default();
    };

    let sid = record.get::<_, String>("SID").unwrap_or_default();
    let root = record.get::<_, bool>("ROOT").unwrap_or_default();

    let global = record
        .get::<_, rquickjs::Value>("DATA")
        .ok()
        .and_then(|v| crate::bridge::value::unmarshal(&v).ok())
        .map(|v| match v.to_json() {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        })
        .unwrap_or_default();

    let authorized = record
        .get::<_, rquickjs::Value>("AUTHORIZED")
        .ok()
        .filter(|v| !v.is_undefined() && !v.is_null())
        .and_then(|v| crate::bridge::value::unmarshal(&v).ok())
        .map(|v| match v.to_json() {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        });

    ShareData {
        sid,
        root,
        global,
        authorized,
    }
}
