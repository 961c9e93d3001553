//! The `FS` constructor: file access rooted under the configured data
//! directory.
//!
//! `new FS("data")` addresses the data root itself; any other space name
//! addresses a subdirectory of it. Paths are confined to the root: absolute
//! paths and `..` segments are rejected.

use std::path::{Component, Path, PathBuf};

use rquickjs::class::Trace;
use rquickjs::prelude::Opt;
use rquickjs::{Class, Ctx, JsLifetime};

use crate::globals::runtime_data;

#[rquickjs::class(rename = "FS")]
#[derive(Clone, Trace, JsLifetime)]
pub struct Fs {
    #[qjs(skip_trace)]
    root: PathBuf,
}

fn io_err(ctx: &Ctx<'_>, path: &str, e: std::io::Error) -> rquickjs::Error {
    rquickjs::Exception::throw_message(ctx, &format!("{path}: {e}"))
}

impl Fs {
    fn resolve(&self, ctx: &Ctx<'_>, rel: &str) -> rquickjs::Result<PathBuf> {
        let rel = Path::new(rel);
        if rel.is_absolute() {
            return Err(rquickjs::Exception::throw_message(
                ctx,
                "absolute paths are not allowed",
            ));
        }
        let mut out = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(rquickjs::Exception::throw_message(
                        ctx,
                        "path escapes the data root",
                    ));
                }
            }
        }
        Ok(out)
    }
}

#[rquickjs::methods]
impl Fs {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, space: Opt<String>) -> rquickjs::Result<Self> {
        let data = runtime_data(&ctx)?;
        let root = match space.0.as_deref() {
            None | Some("") | Some("data") => data.config.data_root.clone(),
            Some(space) => data.config.data_root.join(space),
        };
        Ok(Self { root })
    }

    #[qjs(rename = "ReadFile")]
    pub fn read_file(&self, ctx: Ctx<'_>, path: String) -> rquickjs::Result<String> {
        std::fs::read_to_string(self.resolve(&ctx, &path)?).map_err(|e| io_err(&ctx, &path, e))
    }

    #[qjs(rename = "WriteFile")]
    pub fn write_file(&self, ctx: Ctx<'_>, path: String, content: String) -> rquickjs::Result<()> {
        let target = self.resolve(&ctx, &path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(&ctx, &path, e))?;
        }
        std::fs::write(target, content).map_err(|e| io_err(&ctx, &path, e))
    }

    #[qjs(rename = "ReadDir")]
    pub fn read_dir(&self, ctx: Ctx<'_>, path: String) -> rquickjs::Result<Vec<String>> {
        let dir = self.resolve(&ctx, &path)?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| io_err(&ctx, &path, e))? {
            let entry = entry.map_err(|e| io_err(&ctx, &path, e))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    #[qjs(rename = "Mkdir")]
    pub fn mkdir(&self, ctx: Ctx<'_>, path: String) -> rquickjs::Result<()> {
        std::fs::create_dir_all(self.resolve(&ctx, &path)?).map_err(|e| io_err(&ctx, &path, e))
    }

    #[qjs(rename = "Remove")]
    pub fn remove(&self, ctx: Ctx<'_>, path: String) -> rquickjs::Result<()> {
        let target = self.resolve(&ctx, &path)?;
        if target.is_dir() {
            std::fs::remove_dir_all(target).map_err(|e| io_err(&ctx, &path, e))
        } else if target.exists() {
            std::fs::remove_file(target).map_err(|e| io_err(&ctx, &path, e))
        } else {
            Ok(())
        }
    }

    #[qjs(rename = "Exists")]
    pub fn exists(&self, ctx: Ctx<'_>, path: String) -> rquickjs::Result<bool> {
        Ok(self.resolve(&ctx, &path)?.exists())
    }

    #[qjs(rename = "IsDir")]
    pub fn is_dir(&self, ctx: Ctx<'_>, path: String) -> rquickjs::Result<bool> {
        Ok(self.resolve(&ctx, &path)?.is_dir())
    }
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    Class::<Fs>::define(&ctx.globals())
}
