//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Hard cap on the engine pool, regardless of configuration.
pub const POOL_CAP: usize = 500;

/// Hard cap on a single engine heap: 4 GiB.
pub const HEAP_CAP: u64 = 4 * 1024 * 1024 * 1024;

/// Execution mode of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Shared engine pool with per-(engine, script) context cache.
    #[default]
    Standard,
    /// Dedicated runner threads, one engine+context per runner.
    Performance,
}

/// Options controlling the engine pool, call deadlines, and the
/// transformer. Unknown fields in serialized form are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub mode: Mode,
    /// Engines kept warm at all times.
    pub min_size: usize,
    /// Engines allowed at peak.
    pub max_size: usize,
    /// Engine max heap in bytes; capped at 4 GiB.
    pub heap_size_limit: u64,
    /// Total-heap threshold above which an engine is retired after use.
    pub heap_size_release: u64,
    /// Available-heap threshold below which an engine is retired.
    pub heap_available_size: u64,
    /// Compile every loaded script eagerly against each new engine.
    pub precompile: bool,
    /// Engine-selection deadline in milliseconds.
    pub default_timeout: u64,
    /// Per-call deadline in milliseconds.
    pub context_timeout: u64,
    /// Runner queue depth (performance mode only).
    pub context_queue_size: usize,
    /// Base path for the `http` file helpers and the `FS` global.
    pub data_root: PathBuf,
    /// Enable TypeScript import resolution.
    pub import: bool,
    /// Include full source-map-resolved stacks on errors.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Standard,
            min_size: 2,
            max_size: num_cpus::get().clamp(4, 10),
            heap_size_limit: 1536 * 1024 * 1024,
            heap_size_release: 50 * 1024 * 1024,
            heap_available_size: 512 * 1024,
            precompile: false,
            default_timeout: 200,
            context_timeout: 200,
            context_queue_size: 10,
            data_root: PathBuf::from("."),
            import: true,
            debug: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp every option into its supported range. Called once when the
    /// runtime is built, so the rest of the code can trust the values.
    pub fn normalize(mut self) -> Self {
        self.max_size = self.max_size.clamp(1, POOL_CAP);
        self.min_size = self.min_size.min(self.max_size);
        self.heap_size_limit = self.heap_size_limit.min(HEAP_CAP);
        self.context_queue_size = self.context_queue_size.max(1);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn pool(mut self, min: usize, max: usize) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Engine-selection deadline.
    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout)
    }

    /// Per-call deadline.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.context_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Standard);
        assert!(config.min_size <= config.max_size);
        assert!(config.heap_size_limit <= HEAP_CAP);
    }

    #[test]
    fn normalize_applies_caps() {
        let config = Config::default().pool(900, 1000).normalize();
        assert_eq!(config.max_size, POOL_CAP);
        assert_eq!(config.min_size, POOL_CAP);

        let config = Config {
            heap_size_limit: u64::MAX,
            ..Config::default()
        }
        .normalize();
        assert_eq!(config.heap_size_limit, HEAP_CAP);
    }

    #[test]
    fn min_clamped_to_max() {
        let config = Config::default().pool(8, 4).normalize();
        assert_eq!(config.max_size, 4);
        assert_eq!(config.min_size, 4);
    }

    #[test]
    fn deserializes_with_unknown_fields() {
        let config: Config = serde_json::from_str(
            r#"{"mode": "performance", "minSize": 1, "maxSize": 3, "whatever": true}"#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Performance);
        assert_eq!(config.min_size, 1);
        assert_eq!(config.max_size, 3);
    }
}
