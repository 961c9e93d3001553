//! Mode-aware dispatch: standard (pooled engines + context cache) or
//! performance (dedicated runners).

use std::sync::Arc;

use weir_process::CancelToken;

use crate::bridge::{ShareData, Value};
use crate::cache::ContextCache;
use crate::call;
use crate::config::{Config, Mode};
use crate::error::Result;
use crate::globals::Services;
use crate::pool::IsolatePool;
use crate::runner::RunnerPool;
use crate::script::Script;
use crate::smap::PathRewrite;

enum Backend {
    Standard {
        pool: Arc<IsolatePool>,
        cache: Arc<ContextCache>,
    },
    Performance {
        runners: Arc<RunnerPool>,
    },
}

/// Selects an engine for every invocation and runs the call on it.
pub struct Dispatcher {
    config: Arc<Config>,
    services: Services,
    rewrite: PathRewrite,
    backend: Backend,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, services: Services, rewrite: PathRewrite) -> Result<Self> {
        let backend = match config.mode {
            Mode::Standard => {
                let cache = Arc::new(ContextCache::new());
                let pool = IsolatePool::new(config.clone(), services.clone(), cache.clone())?;
                Backend::Standard { pool, cache }
            }
            Mode::Performance => Backend::Performance {
                runners: RunnerPool::new(config.clone(), services.clone(), rewrite.clone()),
            },
        };
        Ok(Self {
            config,
            services,
            rewrite,
            backend,
        })
    }

    /// Run `script.method(args)` under the share record.
    pub fn exec(
        &self,
        script: Arc<Script>,
        method: &str,
        args: Vec<Value>,
        share: ShareData,
        cancel: CancelToken,
    ) -> Result<Value> {
        match &self.backend {
            Backend::Performance { runners } => {
                runners.exec(script, method, args, share, cancel)
            }
            Backend::Standard { pool, cache } => {
                let isolate = pool.select(self.config.select_timeout())?;

                let result = (|| {
                    let context =
                        match cache.get(isolate.id(), &script.id, script.version) {
                            Some(context) => context,
                            None => {
                                let context = isolate.new_context(&self.services)?;
                                call::eval_bundle(
                                    &isolate,
                                    &context,
                                    &script,
                                    self.config.debug,
                                )?;
                                cache.put(
                                    isolate.id(),
                                    &script.id,
                                    script.version,
                                    context.clone(),
                                );
                                context
                            }
                        };

                    call::call_method(
                        &isolate,
                        &context,
                        &script,
                        method,
                        &args,
                        &share,
                        cancel,
                        self.config.context_timeout,
                        self.config.debug,
                        &self.rewrite,
                    )
                })();

                pool.release(isolate);
                result
            }
        }
    }

    /// Drop every cached context of a script (reload path).
    pub fn invalidate(&self, script_id: &str) {
        if let Backend::Standard { cache, .. } = &self.backend {
            cache.invalidate_script(script_id);
        }
    }

    /// Tear the standard pool down and rebuild to the new floor. Runner
    /// pools are fixed-size by configuration.
    pub fn resize(&self, min: usize, max: usize) -> Result<()> {
        match &self.backend {
            Backend::Standard { pool, .. } => pool.resize(min, max),
            Backend::Performance { .. } => Ok(()),
        }
    }

    /// Engines (or runners) currently alive.
    pub fn size(&self) -> usize {
        match &self.backend {
            Backend::Standard { pool, .. } => pool.size(),
            Backend::Performance { runners } => runners.size(),
        }
    }

    pub fn shutdown(&self) {
        match &self.backend {
            Backend::Standard { pool, .. } => pool.shutdown(),
            Backend::Performance { runners } => runners.shutdown(),
        }
    }
}
