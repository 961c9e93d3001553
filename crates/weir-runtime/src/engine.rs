//! Isolate wrapper around the embedded engine.
//!
//! One `Isolate` is one engine instance: its own heap, its own memory
//! limit, its own interrupt hook. Contexts are created against an isolate
//! and carry the full template of host globals.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use parking_lot::Mutex;
use rquickjs::{Context, Runtime as RawRuntime};
use tracing::trace;

use weir_process::CancelToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::globals::{self, Services};

/// Engine status flags, terminal at `Destroy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IsolateStatus {
    Ready = 0,
    Busy = 1,
    Destroy = 2,
}

/// Point-in-time heap numbers of one engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    /// Total bytes the engine has allocated.
    pub total: u64,
    /// Bytes in live use.
    pub used: u64,
    /// Configured heap ceiling.
    pub limit: u64,
}

impl HeapStats {
    /// Headroom left before the ceiling.
    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

/// A heap-isolated engine instance.
pub struct Isolate {
    id: u64,
    rt: RawRuntime,
    status: AtomicU8,
    contexts_created: AtomicU32,
    heap_limit: u64,
    cancel: Arc<Mutex<Option<CancelToken>>>,
}

impl std::fmt::Debug for Isolate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("contexts_created", &self.contexts_created)
            .field("heap_limit", &self.heap_limit)
            .finish_non_exhaustive()
    }
}

impl Isolate {
    pub fn new(id: u64, config: &Config) -> Result<Self> {
        let rt = RawRuntime::new()
            .map_err(|e| Error::internal(format!("engine creation failed: {e}")))?;
        rt.set_memory_limit(config.heap_size_limit as usize);

        // The interrupt hook polls the per-call cancellation slot; outside
        // a call the slot is empty and execution is never interrupted.
        let cancel: Arc<Mutex<Option<CancelToken>>> = Arc::new(Mutex::new(None));
        let slot = cancel.clone();
        rt.set_interrupt_handler(Some(Box::new(move || {
            slot.lock().as_ref().map(CancelToken::is_cancelled).unwrap_or(false)
        })));

        trace!(target: "weir", isolate = id, "isolate created");
        Ok(Self {
            id,
            rt,
            status: AtomicU8::new(IsolateStatus::Ready as u8),
            contexts_created: AtomicU32::new(0),
            heap_limit: config.heap_size_limit,
            cancel,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> IsolateStatus {
        match self.status.load(Ordering::SeqCst) {
            0 => IsolateStatus::Ready,
            1 => IsolateStatus::Busy,
            _ => IsolateStatus::Destroy,
        }
    }

    /// Move to a new status. Destroy is terminal: once set, other
    /// transitions are refused.
    pub fn set_status(&self, status: IsolateStatus) -> bool {
        if self.status() == IsolateStatus::Destroy {
            return false;
        }
        self.status.store(status as u8, Ordering::SeqCst);
        true
    }

    pub fn heap_stats(&self) -> HeapStats {
        let usage = self.rt.memory_usage();
        HeapStats {
            total: usage.malloc_size.max(0) as u64,
            used: usage.memory_used_size.max(0) as u64,
            limit: self.heap_limit,
        }
    }

    /// Health criterion applied when returning an engine to the pool.
    pub fn healthy(&self, config: &Config) -> bool {
        let stats = self.heap_stats();
        stats.total < config.heap_size_release
            && stats.available() > config.heap_available_size
    }

    /// Number of contexts created against this engine over its lifetime.
    pub fn contexts_created(&self) -> u32 {
        self.contexts_created.load(Ordering::Relaxed)
    }

    /// Build a fresh context with the full host template installed.
    pub fn new_context(&self, services: &Services) -> Result<Context> {
        if self.status() == IsolateStatus::Destroy {
            return Err(Error::internal("isolate is destroyed"));
        }
        let context = Context::full(&self.rt)
            .map_err(|e| Error::internal(format!("context creation failed: {e}")))?;
        self.contexts_created.fetch_add(1, Ordering::Relaxed);

        context.with(|ctx| globals::install(&ctx, services))?;
        Ok(context)
    }

    /// Install the cancellation token the interrupt hook polls for the
    /// duration of one call.
    pub fn begin_call(&self, token: CancelToken) {
        *self.cancel.lock() = Some(token);
    }

    pub fn end_call(&self) {
        *self.cancel.lock() = None;
    }

    /// Drain the engine's microtask queue.
    pub fn drain_jobs(&self) {
        while self.rt.execute_pending_job().unwrap_or(false) {}
    }

    /// Force a full garbage collection cycle.
    pub fn run_gc(&self) {
        self.rt.run_gc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_is_terminal() {
        let isolate = Isolate::new(1, &Config::default()).unwrap();
        assert_eq!(isolate.status(), IsolateStatus::Ready);
        assert!(isolate.set_status(IsolateStatus::Busy));
        assert!(isolate.set_status(IsolateStatus::Destroy));
        assert!(!isolate.set_status(IsolateStatus::Ready));
        assert_eq!(isolate.status(), IsolateStatus::Destroy);
    }

    #[test]
    fn heap_stats_have_limit() {
        let config = Config::default();
        let isolate = Isolate::new(2, &config).unwrap();
        let stats = isolate.heap_stats();
        assert_eq!(stats.limit, config.heap_size_limit);
        assert!(stats.available() <= stats.limit);
    }
}
