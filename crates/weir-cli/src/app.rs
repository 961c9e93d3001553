//! Application directory loading.
//!
//! An application is a directory:
//!
//! ```text
//! app/
//!   app.json          runtime configuration (optional)
//!   scripts/**.{js,ts}  business logic, callable as scripts.<id>.<Method>
//!   studio/**.{js,ts}   root-privileged scripts, callable via Studio(...)
//!   apis/**.http.json   HTTP path descriptors
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::info;

use weir_kv::MemoryStore;
use weir_runtime::{Config, Runtime};
use weir_web::{Api, Router};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Listen address for `weir serve`.
    pub listen: String,
    /// Engine/runtime options, as weir-runtime understands them.
    pub runtime: serde_json::Value,
}

pub struct App {
    pub runtime: Arc<Runtime>,
    pub router: Arc<Router>,
    pub listen: String,
}

/// Load an application directory: config, scripts, studio scripts, APIs.
pub fn load(root: &Path) -> Result<App> {
    let config_path = root.join("app.json");
    let app_config: AppConfig = if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        AppConfig::default()
    };

    let mut config: Config = serde_json::from_value(app_config.runtime.clone())
        .unwrap_or_default();
    if config.data_root == PathBuf::from(".") {
        config.data_root = root.join("data");
    }

    let runtime = Runtime::new(config)?;

    // default stores every app gets
    weir_kv::register_store("cache", Arc::new(MemoryStore::new(1024)));

    let scripts = collect_sources(&root.join("scripts"))?;
    for (id, path) in &scripts {
        runtime.load_file(path, id, false)?;
    }
    let studio = collect_sources(&root.join("studio"))?;
    for (id, path) in &studio {
        runtime.load_file(path, id, true)?;
    }
    info!(target: "weir", scripts = scripts.len(), studio = studio.len(), "scripts loaded");

    runtime.register_script_processes()?;

    let router = Arc::new(Router::new());
    let apis = collect_apis(&root.join("apis"))?;
    for path in &apis {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let api = Api::parse(&path.to_string_lossy(), source.as_bytes())?;
        router.load_api(api)?;
    }
    info!(target: "weir", apis = apis.len(), routes = router.len(), "routes loaded");

    Ok(App {
        runtime,
        router,
        listen: if app_config.listen.is_empty() {
            "127.0.0.1:5099".to_string()
        } else {
            app_config.listen
        },
    })
}

/// Script ids mirror the relative path: `scripts/billing/invoice.ts` is
/// `billing.invoice`.
fn collect_sources(dir: &Path) -> Result<HashMap<String, PathBuf>> {
    let mut out = HashMap::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    walk(dir, dir, &mut |base, path| {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != "js" && ext != "ts" {
            return;
        }
        let rel = path.strip_prefix(base).unwrap_or(path);
        let id = rel
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(".");
        out.insert(id, path.to_path_buf());
    })?;
    Ok(out)
}

fn collect_apis(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    walk(dir, dir, &mut |_base, path| {
        if path.to_string_lossy().ends_with(".http.json") {
            out.push(path.to_path_buf());
        }
    })?;
    out.sort();
    Ok(out)
}

fn walk(base: &Path, dir: &Path, visit: &mut impl FnMut(&Path, &Path)) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(base, &path, visit)?;
        } else {
            visit(base, &path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_ids_mirror_paths() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(scripts.join("billing")).unwrap();
        std::fs::write(scripts.join("u.js"), "function A(){}").unwrap();
        std::fs::write(scripts.join("billing/invoice.js"), "function B(){}").unwrap();
        std::fs::write(scripts.join("notes.txt"), "ignored").unwrap();

        let found = collect_sources(&scripts).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("u"));
        assert!(found.contains_key("billing.invoice"));
    }

    #[test]
    fn missing_dirs_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_sources(&dir.path().join("scripts")).unwrap().is_empty());
        assert!(collect_apis(&dir.path().join("apis")).unwrap().is_empty());
    }
}
