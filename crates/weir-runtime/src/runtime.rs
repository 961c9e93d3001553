//! The runtime facade: configuration, script registry, dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use weir_process::{CancelToken, Exception};

use crate::bridge::{ShareData, Value};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::globals::{Services, mcp};
use crate::script::{Script, ScriptRegistry};
use crate::smap::PathRewrite;
use crate::transform::{ProjectConfig, TransformOptions};

/// A running script runtime.
///
/// ```no_run
/// use weir_runtime::{Config, Runtime};
/// use weir_runtime::bridge::ShareData;
///
/// let runtime = Runtime::new(Config::default()).unwrap();
/// runtime
///     .load_source("u", "u.js", "function Hello(n){return \"hello:\"+n;}", false)
///     .unwrap();
/// let out = runtime
///     .call("u", "Hello", vec![serde_json::json!("world")], ShareData::default())
///     .unwrap();
/// assert_eq!(out, serde_json::json!("hello:world"));
/// ```
pub struct Runtime {
    config: Arc<Config>,
    scripts: Arc<ScriptRegistry>,
    dispatcher: Dispatcher,
}

impl Runtime {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        Self::with_rewrite(config, PathRewrite::None)
    }

    /// Build a runtime with a display-path rewrite applied to resolved
    /// stack traces.
    pub fn with_rewrite(config: Config, rewrite: PathRewrite) -> Result<Arc<Self>> {
        let config = Arc::new(config.normalize());
        mcp::register_builtin();

        let project = ProjectConfig::load_for_dir(&config.data_root)?;
        let scripts = Arc::new(ScriptRegistry::new(TransformOptions::from_project(
            &project,
            config.import,
        )));

        let services = Services::new(config.clone(), scripts.clone());
        let dispatcher = Dispatcher::new(config.clone(), services, rewrite)?;

        info!(
            target: "weir",
            mode = ?config.mode,
            min = config.min_size,
            max = config.max_size,
            "runtime started"
        );

        Ok(Arc::new(Self {
            config,
            scripts,
            dispatcher,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scripts(&self) -> &Arc<ScriptRegistry> {
        &self.scripts
    }

    /// Load (or reload) a script from source; cached contexts of the old
    /// generation are invalidated.
    pub fn load_source(
        &self,
        id: &str,
        file: &str,
        source: &str,
        root: bool,
    ) -> Result<Arc<Script>> {
        let script = self.scripts.load_source(id, file, source, root)?;
        self.dispatcher.invalidate(id);
        Ok(script)
    }

    pub fn load_file(&self, path: impl AsRef<std::path::Path>, id: &str, root: bool) -> Result<Arc<Script>> {
        let script = self.scripts.load_file(path, id, root)?;
        self.dispatcher.invalidate(id);
        Ok(script)
    }

    /// Call a script method with JSON arguments.
    pub fn call(
        &self,
        script_id: &str,
        method: &str,
        args: Vec<serde_json::Value>,
        share: ShareData,
    ) -> Result<serde_json::Value> {
        let cancel = CancelToken::with_timeout(self.config.call_timeout());
        self.call_with_cancel(script_id, method, args, share, cancel)
    }

    pub fn call_with_cancel(
        &self,
        script_id: &str,
        method: &str,
        args: Vec<serde_json::Value>,
        share: ShareData,
        cancel: CancelToken,
    ) -> Result<serde_json::Value> {
        let script = self.scripts.get(script_id)?;
        let args: Vec<Value> = args.iter().map(Value::from_json).collect();
        let result = self
            .dispatcher
            .exec(script, method, args, share, cancel)?;
        Ok(result.to_json())
    }

    /// Bridge-value variant of `call`, for callers that need bytes or
    /// undefined to survive the boundary.
    pub fn call_values(
        &self,
        script_id: &str,
        method: &str,
        args: Vec<Value>,
        share: ShareData,
    ) -> Result<Value> {
        let script = self.scripts.get(script_id)?;
        let cancel = CancelToken::with_timeout(self.config.call_timeout());
        self.dispatcher.exec(script, method, args, share, cancel)
    }

    /// Resize the engine pool: tear down and rebuild to `min`.
    pub fn resize(&self, min: usize, max: usize) -> Result<()> {
        self.dispatcher.resize(min, max)
    }

    /// Engines currently alive.
    pub fn pool_size(&self) -> usize {
        self.dispatcher.size()
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Register the `scripts.*` and `studio.*` process groups against this
    /// runtime, making every loaded script callable through the bus as
    /// `scripts.<id>.<Method>`.
    pub fn register_script_processes(self: &Arc<Self>) -> Result<()> {
        let runtime = self.clone();
        weir_process::register("scripts.*", move |p| runtime.script_handler(p, false))
            .map_err(|e| Error::internal(e.to_string()))?;

        let runtime = self.clone();
        weir_process::register("studio.*", move |p| runtime.script_handler(p, true))
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(())
    }

    /// Bus handler body for script invocations. The method segment keeps
    /// its original case from `raw_name`.
    fn script_handler(
        &self,
        p: &mut weir_process::Process,
        needs_root: bool,
    ) -> std::result::Result<serde_json::Value, Exception> {
        if needs_root && !p.context.root {
            return Err(Exception::forbidden(format!(
                "{} requires root privilege",
                p.name
            )));
        }

        let rest = p
            .raw_name
            .split_once('.')
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        let (script_id, method) = rest
            .rsplit_once('.')
            .ok_or_else(|| Exception::bad_request(format!("invalid script process {}", p.name)))?;
        let script_id = script_id.to_lowercase();

        let share = ShareData {
            sid: p.context.sid.clone(),
            root: p.context.root,
            global: p.context.global.clone(),
            authorized: p.context.authorized.clone(),
        };

        let script = self
            .scripts
            .get(&script_id)
            .map_err(|_| Exception::not_found(format!("script {script_id}")))?;
        if needs_root && !script.root {
            return Err(Exception::forbidden(format!(
                "script {script_id} is not a studio script"
            )));
        }

        let args: Vec<Value> = p.args.iter().map(Value::from_json).collect();
        let result = self
            .dispatcher
            .exec(script, method, args, share, p.context.cancel.clone());

        match result {
            Ok(value) => Ok(value.to_json()),
            Err(Error::Exception(e)) => Err(e),
            Err(Error::NotFound(what)) => Err(Exception::not_found(what)),
            Err(Error::Busy(ms)) => {
                Err(Exception::new(503, format!("runtime busy after {ms}ms")))
            }
            Err(Error::Cancelled) => Err(Exception::new(408, "invocation cancelled")),
            Err(Error::Timeout(ms)) => {
                Err(Exception::new(408, format!("timed out after {ms}ms")))
            }
            Err(other) => Err(Exception::internal(other.to_string())),
        }
    }

    /// Force a garbage-collection-friendly idle sweep of the object
    /// registry.
    pub fn sweep_objects(&self, max_age: Duration) -> usize {
        crate::bridge::registry().sweep_idle(max_age)
    }
}
