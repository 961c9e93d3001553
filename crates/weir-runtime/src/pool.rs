//! Isolate store and ready pool (standard mode).
//!
//! Between `min_size` and `max_size` engines stay alive; selection pops
//! from a ready channel with a caller deadline, creation happens
//! asynchronously when the pool runs dry, and unhealthy engines are
//! destroyed on return with a replacement scheduled so the pool converges
//! back to `min_size`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::ContextCache;
use crate::call;
use crate::config::{Config, POOL_CAP};
use crate::engine::{Isolate, IsolateStatus};
use crate::error::{Error, Result};
use crate::globals::Services;

/// The isolate store plus the ready channel feeding selection.
pub struct IsolatePool {
    config: Arc<Config>,
    services: Services,
    cache: Arc<ContextCache>,
    store: RwLock<HashMap<u64, Arc<Isolate>>>,
    ready_tx: Sender<Arc<Isolate>>,
    ready_rx: Receiver<Arc<Isolate>>,
    next_id: AtomicU64,
    total: AtomicUsize,
    min_size: AtomicUsize,
    max_size: AtomicUsize,
}

impl IsolatePool {
    pub fn new(
        config: Arc<Config>,
        services: Services,
        cache: Arc<ContextCache>,
    ) -> Result<Arc<Self>> {
        let (ready_tx, ready_rx) = bounded(POOL_CAP);
        let pool = Arc::new(Self {
            min_size: AtomicUsize::new(config.min_size),
            max_size: AtomicUsize::new(config.max_size),
            config,
            services,
            cache,
            store: RwLock::new(HashMap::new()),
            ready_tx,
            ready_rx,
            next_id: AtomicU64::new(1),
            total: AtomicUsize::new(0),
        });

        for _ in 0..pool.min_size.load(Ordering::SeqCst) {
            if !pool.reserve_slot() {
                break;
            }
            let isolate = pool.create_reserved()?;
            let _ = pool.ready_tx.try_send(isolate);
        }
        Ok(pool)
    }

    /// Claim one slot in `total` without exceeding `max_size`. Creation
    /// happens against a claimed slot so the pool can never overshoot,
    /// however many creators race.
    fn reserve_slot(&self) -> bool {
        let max = self.max_size.load(Ordering::SeqCst);
        let mut current = self.total.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return false;
            }
            match self.total.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Build an engine for a slot already claimed by `reserve_slot`.
    fn create_reserved(&self) -> Result<Arc<Isolate>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let isolate = match Isolate::new(id, &self.config) {
            Ok(isolate) => Arc::new(isolate),
            Err(e) => {
                self.total.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        if self.config.precompile {
            self.precompile(&isolate);
        }

        self.store.write().insert(id, isolate.clone());
        Ok(isolate)
    }

    /// Warm the context cache with every loaded script.
    fn precompile(&self, isolate: &Arc<Isolate>) {
        for id in self.services.scripts.ids() {
            let Ok(script) = self.services.scripts.get(&id) else {
                continue;
            };
            match isolate.new_context(&self.services) {
                Ok(context) => {
                    if call::eval_bundle(isolate, &context, &script, self.config.debug).is_ok() {
                        self.cache
                            .put(isolate.id(), &script.id, script.version, context);
                    }
                }
                Err(e) => warn!(target: "weir", error = %e, "precompile context failed"),
            }
        }
    }

    /// Pop a ready engine, creating one asynchronously when the channel is
    /// dry. Fails with `Busy` after `timeout`.
    pub fn select(self: &Arc<Self>, timeout: Duration) -> Result<Arc<Isolate>> {
        // drain stale (destroyed) entries without blocking
        while let Ok(isolate) = self.ready_rx.try_recv() {
            if isolate.status() != IsolateStatus::Destroy {
                isolate.set_status(IsolateStatus::Busy);
                return Ok(isolate);
            }
        }

        self.spawn_create();

        match self.ready_rx.recv_timeout(timeout) {
            Ok(isolate) if isolate.status() != IsolateStatus::Destroy => {
                isolate.set_status(IsolateStatus::Busy);
                Ok(isolate)
            }
            Ok(_) | Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                Err(Error::Busy(timeout.as_millis() as u64))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(Error::internal("isolate pool shut down"))
            }
        }
    }

    /// Create one engine asynchronously, if a slot is free.
    fn spawn_create(self: &Arc<Self>) {
        if !self.reserve_slot() {
            return;
        }
        let pool = self.clone();
        std::thread::Builder::new()
            .name("weir-isolate-create".to_string())
            .spawn(move || match pool.create_reserved() {
                Ok(isolate) => {
                    if pool.ready_tx.try_send(isolate.clone()).is_err() {
                        pool.destroy(&isolate);
                    }
                }
                Err(e) => warn!(target: "weir", error = %e, "isolate creation failed"),
            })
            .ok();
    }

    /// Return an engine after use.
    ///
    /// Healthy engines go back to the ready channel only while it holds
    /// fewer than `min_size`; everything else is destroyed with one
    /// replacement scheduled, so the steady state oscillates around
    /// `min_size`.
    pub fn release(self: &Arc<Self>, isolate: Arc<Isolate>) {
        let healthy =
            isolate.status() != IsolateStatus::Destroy && isolate.healthy(&self.config);
        let min = self.min_size.load(Ordering::SeqCst);

        if healthy && self.ready_rx.len() < min {
            isolate.set_status(IsolateStatus::Ready);
            if self.ready_tx.try_send(isolate.clone()).is_ok() {
                return;
            }
        }

        self.destroy(&isolate);
        if self.total.load(Ordering::SeqCst) < min {
            self.spawn_create();
        }
    }

    fn destroy(&self, isolate: &Arc<Isolate>) {
        isolate.set_status(IsolateStatus::Destroy);
        if self.store.write().remove(&isolate.id()).is_some() {
            self.total.fetch_sub(1, Ordering::SeqCst);
            self.cache.drop_isolate(isolate.id());
            debug!(target: "weir", isolate = isolate.id(), "isolate destroyed");
        }
    }

    /// Tear everything down and rebuild to the new floor. Selection keeps
    /// blocking until the first rebuilt engine lands in the channel.
    pub fn resize(self: &Arc<Self>, min: usize, max: usize) -> Result<()> {
        let max = max.clamp(1, POOL_CAP);
        let min = min.min(max);
        self.min_size.store(min, Ordering::SeqCst);
        self.max_size.store(max, Ordering::SeqCst);

        while let Ok(isolate) = self.ready_rx.try_recv() {
            self.destroy(&isolate);
        }
        let remaining: Vec<Arc<Isolate>> = self.store.read().values().cloned().collect();
        for isolate in remaining {
            self.destroy(&isolate);
        }

        for _ in 0..min {
            if !self.reserve_slot() {
                break;
            }
            let isolate = self.create_reserved()?;
            let _ = self.ready_tx.try_send(isolate);
        }
        Ok(())
    }

    /// Engines currently alive.
    pub fn size(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Engines currently waiting in the ready channel.
    pub fn ready(&self) -> usize {
        self.ready_rx.len()
    }

    pub fn shutdown(self: &Arc<Self>) {
        while let Ok(isolate) = self.ready_rx.try_recv() {
            self.destroy(&isolate);
        }
        let remaining: Vec<Arc<Isolate>> = self.store.read().values().cloned().collect();
        for isolate in remaining {
            self.destroy(&isolate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(min: usize, max: usize) -> Arc<IsolatePool> {
        let config = Arc::new(Config::default().pool(min, max).normalize());
        let services = Services::for_tests(config.clone());
        IsolatePool::new(config, services, Arc::new(ContextCache::new())).unwrap()
    }

    #[test]
    fn starts_at_min_size() {
        let pool = pool_with(2, 4);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.ready(), 2);
    }

    #[test]
    fn empty_pool_times_out_busy() {
        let pool = pool_with(0, 0);
        // max clamps to 1, min to 0; nothing is ready and the creation
        // path races the deadline
        let err = pool.select(Duration::from_millis(0)).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[test]
    fn min_one_selects_within_deadline() {
        let pool = pool_with(1, 1);
        let isolate = pool.select(Duration::from_millis(100)).unwrap();
        assert_eq!(isolate.status(), IsolateStatus::Busy);
    }

    #[test]
    fn contended_single_engine_serializes() {
        let pool = pool_with(1, 1);
        let first = pool.select(Duration::from_millis(100)).unwrap();

        // second caller waits, then succeeds once the first releases
        let contender = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.select(Duration::from_millis(2000)))
        };
        std::thread::sleep(Duration::from_millis(50));
        pool.release(first);

        let second = contender.join().unwrap().unwrap();
        assert_eq!(second.status(), IsolateStatus::Busy);
        pool.release(second);
    }

    #[test]
    fn release_beyond_min_destroys() {
        let pool = pool_with(1, 3);
        let a = pool.select(Duration::from_millis(200)).unwrap();
        let b = pool.select(Duration::from_millis(2000)).unwrap();

        pool.release(a);
        assert_eq!(pool.ready(), 1);
        // channel already holds min_size engines; this one is retired
        pool.release(b);
        assert_eq!(pool.ready(), 1);
        assert!(pool.size() <= 2);
    }

    #[test]
    fn pool_never_exceeds_max() {
        let pool = pool_with(1, 2);
        let mut held = Vec::new();
        for _ in 0..2 {
            held.push(pool.select(Duration::from_millis(2000)).unwrap());
        }
        assert!(pool.select(Duration::from_millis(50)).is_err());
        assert!(pool.size() <= 2);
        for isolate in held {
            pool.release(isolate);
        }
        assert!(pool.size() <= 2);
    }

    #[test]
    fn resize_rebuilds_to_min() {
        let pool = pool_with(2, 4);
        pool.resize(1, 2).unwrap();
        assert_eq!(pool.size(), 1);
        assert!(pool.select(Duration::from_millis(200)).is_ok());
    }
}
