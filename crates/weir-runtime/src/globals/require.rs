//! `Require(id)`: load a sibling script module into the calling context.
//!
//! The required script's bundle is evaluated once per context (tracked
//! through a hidden registry global); its functions become reachable the
//! same way the entry script's are.

use rquickjs::{Ctx, Function, IntoJs, Object};

use crate::globals::{arg_string, coerce, runtime_data};

const REQUIRED_GLOBAL: &str = "__weir_required";

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    ctx.globals().set(
        "Require",
        Function::new(
            ctx.clone(),
            coerce(|ctx, args| {
                let id = arg_string(&ctx, &args, 0)?;
                let data = runtime_data(&ctx)?;

                let script = data.scripts.get(&id).map_err(|e| {
                    rquickjs::Exception::throw_message(&ctx, &e.to_string())
                })?;

                let required: Object = match ctx.globals().get(REQUIRED_GLOBAL) {
                    Ok(obj) => obj,
                    Err(_) => {
                        let obj = Object::new(ctx.clone())?;
                        ctx.globals().set(REQUIRED_GLOBAL, obj.clone())?;
                        obj
                    }
                };

                if !required.get::<_, bool>(id.as_str()).unwrap_or(false) {
                    ctx.eval::<(), _>(script.bundle.code.clone())?;
                    required.set(id.as_str(), true)?;
                }

                true.into_js(&ctx)
            }),
        )?
        .with_name("Require")?,
    )
}
