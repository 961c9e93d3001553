//! Host-object registry and the script-side wrapper class.
//!
//! Host objects exposed to scripts live here under opaque string ids. The
//! script sees a `HostRef` wrapper whose first (and only) internal slot is
//! the id; when the engine collects the wrapper, its `Drop` impl funnels
//! into the same idempotent [`ObjectRegistry::release`] that the explicit
//! `Release()` method and the `Use(...)` sugar use.
//!
//! The registry holds ids and payloads only, never script-side handles, so
//! no ownership cycle can form between an engine and the host.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rquickjs::class::Trace;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, JsLifetime};
use tracing::{debug, trace};

use weir_process::Exception;

use crate::bridge::value::{marshal, unmarshal, Value};

/// A host object callable from script through its wrapper.
///
/// `call` receives the method name and JSON arguments; `close` runs once
/// when the object is released, for deterministic cleanup of sockets,
/// files and the like.
pub trait HostObject: Send + Sync {
    fn kind(&self) -> &str;
    fn call(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, Exception>;
    fn close(&self) {}
}

struct Registered {
    payload: Arc<dyn HostObject>,
    created: Instant,
    /// Set once a script-side wrapper holds this id; the idle sweep never
    /// frees wrapped entries.
    wrapped: AtomicBool,
}

/// Registry of live host objects, sharded for concurrent access from GC
/// finalizers running off many engines.
pub struct ObjectRegistry {
    objects: DashMap<String, Registered>,
    next_seq: AtomicU64,
}

impl ObjectRegistry {
    fn new() -> Self {
        Self {
            objects: DashMap::with_capacity_and_shard_amount(64, 16),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Register a host object; the returned id is globally unique and
    /// opaque.
    pub fn register(&self, payload: Arc<dyn HostObject>) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        let id = format!("{seq:x}-{nanos:08x}");
        trace!(target: "weir", id = %id, kind = payload.kind(), "object registered");
        self.objects.insert(
            id.clone(),
            Registered {
                payload,
                created: Instant::now(),
                wrapped: AtomicBool::new(false),
            },
        );
        id
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<dyn HostObject>> {
        self.objects.get(id).map(|entry| entry.payload.clone())
    }

    /// Release an object. Idempotent: releasing an unknown or already
    /// released id is a no-op, not an error.
    pub fn release(&self, id: &str) -> bool {
        match self.objects.remove(id) {
            Some((_, entry)) => {
                entry.payload.close();
                trace!(target: "weir", id = %id, "object released");
                true
            }
            None => false,
        }
    }

    /// Mark the id as held by a live script-side wrapper.
    pub fn mark_wrapped(&self, id: &str) {
        if let Some(entry) = self.objects.get(id) {
            entry.wrapped.store(true, Ordering::Relaxed);
        }
    }

    /// Live object count, for diagnostics.
    pub fn count(&self) -> usize {
        self.objects.len()
    }

    /// Drop unwrapped objects older than `max_age`. Objects referenced by a
    /// live wrapper are never touched; their release comes from the
    /// wrapper's finalizer.
    pub fn sweep_idle(&self, max_age: Duration) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, entry| {
            entry.wrapped.load(Ordering::Relaxed) || entry.created.elapsed() < max_age
        });
        let swept = before - self.objects.len();
        if swept > 0 {
            debug!(target: "weir", swept, "idle objects swept");
        }
        swept
    }
}

static REGISTRY: Lazy<ObjectRegistry> = Lazy::new(ObjectRegistry::new);

/// The process-wide object registry.
pub fn registry() -> &'static ObjectRegistry {
    &REGISTRY
}

/// Factory behind a script-visible constructor such as `MCP`.
pub type ConstructorFactory = Arc<
    dyn Fn(Vec<serde_json::Value>) -> std::result::Result<Arc<dyn HostObject>, Exception>
        + Send
        + Sync,
>;

static CONSTRUCTORS: Lazy<RwLock<HashMap<String, ConstructorFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a constructor to be installed as a global in every context
/// template. Must be called before engines are created; later additions
/// only reach newly built contexts.
pub fn register_constructor<F>(name: &str, factory: F)
where
    F: Fn(Vec<serde_json::Value>) -> std::result::Result<Arc<dyn HostObject>, Exception>
        + Send
        + Sync
        + 'static,
{
    CONSTRUCTORS
        .write()
        .insert(name.to_string(), Arc::new(factory));
}

/// Snapshot of the registered constructors, for template installation.
pub fn constructor_table() -> Vec<(String, ConstructorFactory)> {
    CONSTRUCTORS
        .read()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Script-side wrapper around a registered host object.
///
/// The wrapper stores only the registry id. Engine GC dropping the wrapper
/// releases the id; so does the explicit `Release()`.
#[rquickjs::class(rename = "HostRef")]
#[derive(Trace, JsLifetime)]
pub struct HostRef {
    #[qjs(skip_trace)]
    id: String,
    /// Suppresses the finalizer-path release after an explicit one. Purely
    /// an optimization: release itself is idempotent.
    #[qjs(skip_trace)]
    released: AtomicBool,
}

impl HostRef {
    pub fn wrap(id: String) -> Self {
        registry().mark_wrapped(&id);
        Self {
            id,
            released: AtomicBool::new(false),
        }
    }
}

#[rquickjs::methods]
impl HostRef {
    #[qjs(get, rename = "id")]
    pub fn id(&self) -> String {
        self.id.clone()
    }

    /// Deterministic release; safe to call more than once.
    #[qjs(rename = "Release")]
    pub fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
        registry().release(&self.id);
    }

    /// Invoke a method on the underlying host object.
    #[qjs(rename = "Call")]
    pub fn call<'js>(
        &self,
        ctx: Ctx<'js>,
        method: String,
        args: Rest<rquickjs::Value<'js>>,
    ) -> rquickjs::Result<rquickjs::Value<'js>> {
        let Some(payload) = registry().lookup(&self.id) else {
            return Err(rquickjs::Exception::throw_message(
                &ctx,
                &format!("object {} has been released", self.id),
            ));
        };

        let mut json_args = Vec::with_capacity(args.len());
        for arg in args.iter() {
            let value = unmarshal(arg)
                .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string()))?;
            json_args.push(value.to_json());
        }

        match payload.call(&method, json_args) {
            Ok(result) => marshal(&ctx, &Value::from_json(&result))
                .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string())),
            Err(exception) => Err(rquickjs::Exception::throw_message(
                &ctx,
                &exception.to_string(),
            )),
        }
    }
}

impl Drop for HostRef {
    fn drop(&mut self) {
        if !self.released.load(Ordering::Relaxed) {
            registry().release(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // the registry is process-global; serialize tests that assert on counts
    static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    struct Probe;

    impl HostObject for Probe {
        fn kind(&self) -> &str {
            "probe"
        }

        fn call(
            &self,
            method: &str,
            args: Vec<serde_json::Value>,
        ) -> std::result::Result<serde_json::Value, Exception> {
            match method {
                "echo" => Ok(serde_json::Value::Array(args)),
                _ => Err(Exception::not_found(format!("method {method}"))),
            }
        }
    }

    #[test]
    fn register_lookup_release() {
        let _guard = TEST_LOCK.lock();
        let before = registry().count();
        let id = registry().register(Arc::new(Probe));
        assert_eq!(registry().count(), before + 1);
        assert!(registry().lookup(&id).is_some());

        assert!(registry().release(&id));
        assert_eq!(registry().count(), before);
        // double release is a no-op
        assert!(!registry().release(&id));
        assert!(registry().lookup(&id).is_none());
    }

    #[test]
    fn ids_are_unique() {
        let _guard = TEST_LOCK.lock();
        let a = registry().register(Arc::new(Probe));
        let b = registry().register(Arc::new(Probe));
        assert_ne!(a, b);
        registry().release(&a);
        registry().release(&b);
    }

    #[test]
    fn sweep_skips_wrapped() {
        let _guard = TEST_LOCK.lock();
        let unwrapped = registry().register(Arc::new(Probe));
        let wrapped = registry().register(Arc::new(Probe));
        registry().mark_wrapped(&wrapped);

        std::thread::sleep(Duration::from_millis(5));
        registry().sweep_idle(Duration::from_millis(1));

        assert!(registry().lookup(&unwrapped).is_none());
        assert!(registry().lookup(&wrapped).is_some());
        registry().release(&wrapped);
    }

    #[test]
    fn wrapper_drop_releases() {
        let _guard = TEST_LOCK.lock();
        let id = registry().register(Arc::new(Probe));
        {
            let _wrapper = HostRef::wrap(id.clone());
        }
        assert!(registry().lookup(&id).is_none());
    }
}
