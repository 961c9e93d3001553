//! TypeScript-to-JavaScript transformation.
//!
//! `.ts` sources pass through three stages before reaching an engine:
//!
//! 1. **Surgery** - import declarations are rewritten in place (preserving
//!    line numbers) into reads from the `__weir_modules` registry, and
//!    `export` keywords are unwrapped so script methods end up as plain
//!    globals.
//! 2. **Transpile** - swc strips types and emits JavaScript plus a
//!    per-module source map.
//! 3. **Bundle** - transitive imports are concatenated in dependency order
//!    ahead of the entry body, each module wrapped in a registry factory,
//!    with the starting line offset of every module recorded for stack
//!    resolution.

mod imports;
mod transpiler;
mod tsconfig;

pub use imports::{Bundle, Import, Segment, build_bundle, plain_bundle};
pub use transpiler::{TranspileOptions, TranspileResult, transpile};
pub use tsconfig::{Alias, ProjectConfig};

use std::path::PathBuf;

/// Options driving the whole transform pipeline.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Resolve and bundle imports; when off, import declarations are a
    /// load error.
    pub resolve_imports: bool,
    /// Path-alias table from the project config.
    pub aliases: Vec<Alias>,
    /// Root the alias targets are relative to.
    pub base_dir: PathBuf,
}

impl TransformOptions {
    pub fn from_project(config: &ProjectConfig, resolve_imports: bool) -> Self {
        Self {
            resolve_imports,
            aliases: config.aliases.clone(),
            base_dir: config.base_dir.clone(),
        }
    }
}
