//! Performance-mode runners.
//!
//! A runner is a thread owning one engine+context pair, draining a command
//! channel. States: Init -> Ready -> Running -> Cleaning -> (Ready |
//! Destroy); Destroy is terminal. After answering a call the runner either
//! resets (fresh context, same engine) or, when the engine is past its
//! health thresholds, destroys itself and lets the pool create a
//! replacement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};

use weir_process::CancelToken;

use crate::bridge::{ShareData, Value};
use crate::call;
use crate::config::{Config, POOL_CAP};
use crate::engine::Isolate;
use crate::error::{Error, Result};
use crate::globals::Services;
use crate::script::Script;
use crate::smap::PathRewrite;

/// Hard ceiling on contexts created against one runner engine before it
/// is rotated out.
const CONTEXT_CEILING: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerState {
    Init = 0,
    Ready = 1,
    Running = 2,
    Cleaning = 3,
    Destroy = 4,
}

fn state_from(raw: u8) -> RunnerState {
    match raw {
        0 => RunnerState::Init,
        1 => RunnerState::Ready,
        2 => RunnerState::Running,
        3 => RunnerState::Cleaning,
        _ => RunnerState::Destroy,
    }
}

pub(crate) struct ExecRequest {
    pub script: Arc<Script>,
    pub method: String,
    pub args: Vec<Value>,
    pub share: ShareData,
    pub cancel: CancelToken,
    pub response: Sender<Result<Value>>,
}

pub(crate) enum RunnerCommand {
    Exec(Box<ExecRequest>),
    Destroy,
}

/// Cheap, clonable handle to a runner thread.
#[derive(Clone)]
pub struct RunnerHandle {
    pub id: u64,
    state: Arc<AtomicU8>,
    cmd_tx: Sender<RunnerCommand>,
}

impl RunnerHandle {
    pub fn state(&self) -> RunnerState {
        state_from(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn send(&self, command: RunnerCommand) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| Error::internal("runner command channel closed"))
    }
}

struct RunnerWorker {
    id: u64,
    state: Arc<AtomicU8>,
    config: Arc<Config>,
    services: Services,
    rewrite: PathRewrite,
    keepalive: bool,
}

impl RunnerWorker {
    fn set_state(&self, state: RunnerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Thread body: build the engine+context, then drain commands.
    fn run(self, cmd_rx: Receiver<RunnerCommand>, on_ready: impl Fn(), on_exit: impl Fn()) {
        let isolate = match Isolate::new(self.id, &self.config) {
            Ok(isolate) => Arc::new(isolate),
            Err(e) => {
                warn!(target: "weir", runner = self.id, error = %e, "runner engine failed");
                self.set_state(RunnerState::Destroy);
                on_exit();
                return;
            }
        };
        let mut context = match isolate.new_context(&self.services) {
            Ok(context) => context,
            Err(e) => {
                warn!(target: "weir", runner = self.id, error = %e, "runner context failed");
                self.set_state(RunnerState::Destroy);
                on_exit();
                return;
            }
        };

        self.set_state(RunnerState::Ready);
        on_ready();
        debug!(target: "weir", runner = self.id, "runner ready");

        while let Ok(command) = cmd_rx.recv() {
            match command {
                RunnerCommand::Destroy => break,
                RunnerCommand::Exec(request) => {
                    self.set_state(RunnerState::Running);

                    let result = call::eval_bundle(
                        &isolate,
                        &context,
                        &request.script,
                        self.config.debug,
                    )
                    .and_then(|()| {
                        call::call_method(
                            &isolate,
                            &context,
                            &request.script,
                            &request.method,
                            &request.args,
                            &request.share,
                            request.cancel.clone(),
                            self.config.context_timeout,
                            self.config.debug,
                            &self.rewrite,
                        )
                    });
                    let _ = request.response.send(result);

                    // Cleaning: reset on the same engine, or retire it
                    self.set_state(RunnerState::Cleaning);
                    if !self.keepalive || !self.engine_healthy(&isolate) {
                        break;
                    }
                    match isolate.new_context(&self.services) {
                        Ok(fresh) => {
                            context = fresh;
                            self.set_state(RunnerState::Ready);
                            on_ready();
                        }
                        Err(e) => {
                            warn!(target: "weir", runner = self.id, error = %e, "runner reset failed");
                            break;
                        }
                    }
                }
            }
        }

        self.set_state(RunnerState::Destroy);
        debug!(target: "weir", runner = self.id, "runner destroyed");
        on_exit();
    }

    /// Per-reset health criterion: enough heap headroom left before the
    /// release threshold, and context churn below the ceiling.
    fn engine_healthy(&self, isolate: &Isolate) -> bool {
        let stats = isolate.heap_stats();
        stats.available() >= self.config.heap_size_release
            && isolate.contexts_created() <= CONTEXT_CEILING
    }
}

/// Pool of runners (performance mode). Selection hands out Ready runner
/// handles; runners push themselves back after a successful reset.
pub struct RunnerPool {
    config: Arc<Config>,
    services: Services,
    rewrite: PathRewrite,
    ready_tx: Sender<RunnerHandle>,
    ready_rx: Receiver<RunnerHandle>,
    next_id: AtomicU64,
    total: Arc<AtomicUsize>,
}

impl RunnerPool {
    pub fn new(config: Arc<Config>, services: Services, rewrite: PathRewrite) -> Arc<Self> {
        let (ready_tx, ready_rx) = bounded(POOL_CAP);
        let pool = Arc::new(Self {
            config,
            services,
            rewrite,
            ready_tx,
            ready_rx,
            next_id: AtomicU64::new(1),
            total: Arc::new(AtomicUsize::new(0)),
        });
        for _ in 0..pool.config.min_size {
            pool.spawn_runner();
        }
        pool
    }

    fn spawn_runner(self: &Arc<Self>) {
        // claim a slot first so racing creators cannot overshoot max_size
        let mut current = self.total.load(Ordering::SeqCst);
        loop {
            if current >= self.config.max_size {
                return;
            }
            match self.total.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(RunnerState::Init as u8));
        let (cmd_tx, cmd_rx) = bounded(self.config.context_queue_size);

        let handle = RunnerHandle {
            id,
            state: state.clone(),
            cmd_tx,
        };

        let worker = RunnerWorker {
            id,
            state,
            config: self.config.clone(),
            services: self.services.clone(),
            rewrite: self.rewrite.clone(),
            keepalive: true,
        };

        let ready_tx = self.ready_tx.clone();
        let total = self.total.clone();
        let ready_handle = handle.clone();

        std::thread::Builder::new()
            .name(format!("weir-runner-{id}"))
            .spawn(move || {
                worker.run(
                    cmd_rx,
                    move || {
                        let _ = ready_tx.try_send(ready_handle.clone());
                    },
                    move || {
                        total.fetch_sub(1, Ordering::SeqCst);
                    },
                );
            })
            .ok();
    }

    /// Pop a Ready runner within the deadline.
    pub fn select(self: &Arc<Self>, timeout: Duration) -> Result<RunnerHandle> {
        while let Ok(handle) = self.ready_rx.try_recv() {
            if handle.state() == RunnerState::Ready {
                return Ok(handle);
            }
        }

        if self.total.load(Ordering::SeqCst) < self.config.max_size {
            self.spawn_runner();
        }

        match self.ready_rx.recv_timeout(timeout) {
            Ok(handle) if handle.state() == RunnerState::Ready => Ok(handle),
            Ok(_) | Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                Err(Error::Busy(timeout.as_millis() as u64))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(Error::internal("runner pool shut down"))
            }
        }
    }

    /// Execute one call on a runner and wait for its response. A destroyed
    /// runner is replaced so the pool holds its size.
    pub fn exec(
        self: &Arc<Self>,
        script: Arc<Script>,
        method: &str,
        args: Vec<Value>,
        share: ShareData,
        cancel: CancelToken,
    ) -> Result<Value> {
        let handle = self.select(self.config.select_timeout())?;

        let (response_tx, response_rx) = bounded(1);
        handle.send(RunnerCommand::Exec(Box::new(ExecRequest {
            script,
            method: method.to_string(),
            args,
            share,
            cancel,
            response: response_tx,
        })))?;

        // generous upper bound so a dead runner cannot hang the caller;
        // the call itself is bounded by the interrupt hook
        let wait = Duration::from_millis(self.config.context_timeout)
            + self.config.select_timeout()
            + Duration::from_secs(10);
        let result = response_rx
            .recv_timeout(wait)
            .map_err(|_| Error::internal("runner dropped the response"))?;

        if self.total.load(Ordering::SeqCst) < self.config.min_size {
            self.spawn_runner();
        }
        result
    }

    pub fn size(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        while let Ok(handle) = self.ready_rx.try_recv() {
            let _ = handle.send(RunnerCommand::Destroy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptRegistry;

    fn pool(min: usize, max: usize) -> Arc<RunnerPool> {
        let config = Arc::new(
            Config {
                min_size: min,
                max_size: max,
                context_timeout: 2000,
                default_timeout: 2000,
                ..Config::default()
            }
            .normalize(),
        );
        let scripts = Arc::new(ScriptRegistry::default());
        let services = Services::new(config.clone(), scripts);
        RunnerPool::new(config, services, PathRewrite::None)
    }

    #[test]
    fn exec_round_trip() {
        let pool = pool(1, 2);
        let scripts = pool.services.scripts.clone();
        let script = scripts
            .load_source("u", "u.js", "function Hello(name){return \"hello:\"+name;}", false)
            .unwrap();

        let result = pool
            .exec(
                script,
                "Hello",
                vec![Value::String("world".into())],
                ShareData::default(),
                CancelToken::with_timeout(Duration::from_secs(2)),
            )
            .unwrap();
        assert_eq!(result, Value::String("hello:world".into()));
    }

    #[test]
    fn runner_survives_script_errors() {
        let pool = pool(1, 1);
        let scripts = pool.services.scripts.clone();
        let script = scripts
            .load_source("bad", "bad.js", "function Boom(){ throw new Error(\"x\"); }", false)
            .unwrap();

        let err = pool
            .exec(
                script.clone(),
                "Boom",
                vec![],
                ShareData::default(),
                CancelToken::with_timeout(Duration::from_secs(2)),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Runtime { .. }));

        // Running -> Cleaning -> Ready held: the pool still answers
        let ok = pool
            .exec(
                script,
                "Boom",
                vec![],
                ShareData::default(),
                CancelToken::with_timeout(Duration::from_secs(2)),
            )
            .unwrap_err();
        assert!(matches!(ok, Error::Runtime { .. }));
        assert_eq!(pool.size(), 1);
    }
}
