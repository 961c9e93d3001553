//! Loaded-script registry.
//!
//! Scripts are immutable once loaded; a reload builds a new `Script` and
//! swaps the registry slot atomically under the write lock. Calls already
//! holding the old `Arc` finish against the old source; the next lookup
//! sees the new one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transform::{Bundle, TransformOptions, build_bundle, plain_bundle};

/// Default per-script compile/run timeout.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// One loaded unit of user code.
#[derive(Debug)]
pub struct Script {
    pub id: String,
    pub file: String,
    /// Original source bytes, immutable after load.
    pub source: Arc<String>,
    /// Engine-ready concatenated output with segment offsets and maps.
    pub bundle: Arc<Bundle>,
    /// Scripts loaded with root privilege (`studio.*`).
    pub root: bool,
    /// Per-script compile timeout.
    pub timeout: Duration,
    /// Monotonic load generation; bumped on reload so cached contexts go
    /// stale.
    pub version: u64,
}

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Thread-safe script registry.
#[derive(Default)]
pub struct ScriptRegistry {
    scripts: RwLock<HashMap<String, Arc<Script>>>,
    transform: RwLock<TransformOptions>,
}

impl ScriptRegistry {
    pub fn new(transform: TransformOptions) -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            transform: RwLock::new(transform),
        }
    }

    pub fn set_transform_options(&self, options: TransformOptions) {
        *self.transform.write() = options;
    }

    /// Load (or reload) a script from source. `.ts` files go through the
    /// transformer; everything else is taken as plain JavaScript.
    pub fn load_source(
        &self,
        id: &str,
        file: &str,
        source: &str,
        root: bool,
    ) -> Result<Arc<Script>> {
        let path = Path::new(file);
        let bundle = if path.extension().is_some_and(|e| e == "ts") {
            let options = self.transform.read().clone();
            build_bundle(path, source, &options)?
        } else {
            plain_bundle(path, source)
        };

        let script = Arc::new(Script {
            id: id.to_string(),
            file: file.to_string(),
            source: Arc::new(source.to_string()),
            bundle: Arc::new(bundle),
            root,
            timeout: DEFAULT_SCRIPT_TIMEOUT,
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
        });

        debug!(target: "weir", script = id, file, version = script.version, "script loaded");
        self.scripts.write().insert(id.to_string(), script.clone());
        Ok(script)
    }

    /// Load a script from disk.
    pub fn load_file(&self, file: impl AsRef<Path>, id: &str, root: bool) -> Result<Arc<Script>> {
        let file = file.as_ref();
        let source = std::fs::read_to_string(file)
            .map_err(|e| Error::parse(file.to_string_lossy(), e.to_string()))?;
        self.load_source(id, &file.to_string_lossy(), &source, root)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Script>> {
        self.scripts
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("script {id}")))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.scripts.read().contains_key(id)
    }

    pub fn remove(&self, id: &str) {
        self.scripts.write().remove(id);
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scripts.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.scripts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.read().is_empty()
    }
}
