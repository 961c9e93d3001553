//! `$L(key)` localization lookup.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rquickjs::{Ctx, Function};

static DICT: Lazy<RwLock<HashMap<String, String>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Install (or replace) the active locale dictionary.
pub fn set_locale(entries: HashMap<String, String>) {
    *DICT.write() = entries;
}

/// Translate a key; unknown keys come back unchanged.
pub(crate) fn translate(key: &str) -> String {
    DICT.read().get(key).cloned().unwrap_or_else(|| key.to_string())
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    ctx.globals().set(
        "$L",
        Function::new(ctx.clone(), |key: String| translate(&key))?.with_name("$L")?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_pass_through() {
        assert_eq!(translate("weir.unknown.key"), "weir.unknown.key");
    }
}
