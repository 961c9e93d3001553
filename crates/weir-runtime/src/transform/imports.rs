//! Import resolution and module bundling.
//!
//! The engine gets one flat script per entry file: every transitively
//! imported module is wrapped in a `__weir_modules` factory and emitted
//! ahead of the code that imports it. Import declarations are rewritten
//! *in place* - each one becomes a registry read occupying exactly the
//! same lines - so a module's source map keeps pointing at the original
//! file. The starting line of every module body inside the concatenated
//! output is recorded for stack resolution.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use swc_common::{FileName, SourceMap, Spanned, sync::Lrc};
use swc_ecma_ast::{
    Decl, DefaultDecl, EsVersion, ImportSpecifier, Module, ModuleDecl, ModuleExportName,
    ModuleItem, Pat,
};
use swc_ecma_parser::{Parser, StringInput, lexer::Lexer};

use crate::error::{Error, Result};
use crate::transform::transpiler::{TranspileOptions, transpile, ts_syntax};
use crate::transform::TransformOptions;

/// A resolved dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Requested specifier, e.g. `"./lib/hello"` or `"@lib/math"`.
    pub name: String,
    /// Resolved absolute path.
    pub path: PathBuf,
    /// The original import clause text.
    pub clause: String,
}

/// One module's slice of the concatenated output.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Original file path (registry key).
    pub file: String,
    /// 1-based line in the concatenated output where this module's body
    /// starts.
    pub start_line: u32,
    /// Number of body lines.
    pub line_count: u32,
    /// The module's own source map JSON (transpiled -> original).
    pub map: Option<String>,
}

/// The concatenated, engine-ready script.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub code: String,
    pub segments: Vec<Segment>,
    pub imports: Vec<Import>,
}

impl Bundle {
    /// Segment owning a line of the concatenated output, if any.
    pub fn segment_for_line(&self, line: u32) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| line >= s.start_line && line < s.start_line + s.line_count)
    }
}

/// Bundle for a plain JavaScript source: no transform, one unmapped
/// segment.
pub fn plain_bundle(file: &Path, source: &str) -> Bundle {
    let code = ensure_trailing_newline(source.to_string());
    let line_count = count_lines(&code);
    Bundle {
        code,
        segments: vec![Segment {
            file: file.to_string_lossy().to_string(),
            start_line: 1,
            line_count,
            map: None,
        }],
        imports: Vec::new(),
    }
}

/// Build the concatenated bundle for a TypeScript entry file.
pub fn build_bundle(file: &Path, source: &str, options: &TransformOptions) -> Result<Bundle> {
    let mut state = BundleState {
        options,
        code: String::new(),
        segments: Vec::new(),
        imports: Vec::new(),
        visited: HashSet::new(),
        stack: Vec::new(),
        emitted_lines: 0,
    };

    state.push_line("globalThis.__weir_modules = globalThis.__weir_modules || {};");
    state.add_module(file, source, false)?;

    Ok(Bundle {
        code: state.code,
        segments: state.segments,
        imports: state.imports,
    })
}

struct BundleState<'a> {
    options: &'a TransformOptions,
    code: String,
    segments: Vec<Segment>,
    imports: Vec<Import>,
    visited: HashSet<String>,
    stack: Vec<String>,
    emitted_lines: u32,
}

impl BundleState<'_> {
    fn push_line(&mut self, line: &str) {
        self.code.push_str(line);
        self.code.push('\n');
        self.emitted_lines += 1;
    }

    fn push_block(&mut self, block: &str) {
        let block = ensure_trailing_newline(block.to_string());
        self.emitted_lines += count_lines(&block);
        self.code.push_str(&block);
    }

    fn add_module(&mut self, file: &Path, source: &str, wrap: bool) -> Result<()> {
        let key = module_key(file);
        if self.stack.contains(&key) {
            return Err(Error::parse(
                key,
                "circular import: module graph must be a DAG",
            ));
        }
        if self.visited.contains(&key) {
            return Ok(());
        }
        self.stack.push(key.clone());

        let surgered = surgery(source, file, wrap, self.options)?;

        // dependencies first so every registry read finds its module
        for import in &surgered.imports {
            let dep_path = import.path.clone();
            let dep_source = std::fs::read_to_string(&dep_path)
                .map_err(|e| Error::parse(dep_path.to_string_lossy(), e.to_string()))?;
            self.add_module(&dep_path, &dep_source, true)?;
        }
        self.imports.extend(surgered.imports.clone());

        let transpiled = transpile(
            &surgered.source,
            &TranspileOptions {
                target: EsVersion::Es2020,
                source_map: true,
                filename: key.clone(),
            },
        )?;

        if wrap {
            self.push_line(&format!(
                "__weir_modules[{}] = (function() {{ const __weir_exports = {{}};",
                js_quote(&key)
            ));
        }

        let body = ensure_trailing_newline(transpiled.code);
        let body_lines = count_lines(&body);
        let start_line = self.emitted_lines + 1;
        self.push_block(&body);

        if wrap {
            for item in &surgered.footer {
                self.push_line(&item.render());
            }
            self.push_line("return __weir_exports;");
            self.push_line("})();");
        }

        self.segments.push(Segment {
            file: key.clone(),
            start_line,
            line_count: body_lines,
            map: transpiled.source_map,
        });

        self.stack.pop();
        self.visited.insert(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum FooterItem {
    Binding { exported: String, local: String },
    Default { local: String },
    ReExport { key: String, orig: String, exported: String },
    ExportAll { key: String },
}

impl FooterItem {
    fn render(&self) -> String {
        match self {
            FooterItem::Binding { exported, local } => {
                format!("__weir_exports[{}] = {};", js_quote(exported), local)
            }
            FooterItem::Default { local } => {
                format!("__weir_exports[\"default\"] = {local};")
            }
            FooterItem::ReExport { key, orig, exported } => format!(
                "__weir_exports[{}] = __weir_modules[{}][{}];",
                js_quote(exported),
                js_quote(key),
                js_quote(orig)
            ),
            FooterItem::ExportAll { key } => format!(
                "Object.assign(__weir_exports, __weir_modules[{}]);",
                js_quote(key)
            ),
        }
    }
}

struct Surgered {
    source: String,
    imports: Vec<Import>,
    footer: Vec<FooterItem>,
}

/// Rewrite import/export declarations in place, preserving line numbers.
fn surgery(source: &str, file: &Path, wrap: bool, options: &TransformOptions) -> Result<Surgered> {
    let key = module_key(file);
    let (module, base) = parse_module(source, &key)?;
    let importer_dir = file.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut edits: Vec<(std::ops::Range<usize>, String)> = Vec::new();
    let mut imports: Vec<Import> = Vec::new();
    let mut footer: Vec<FooterItem> = Vec::new();

    let offset = |pos: swc_common::BytePos| (pos.0 - base.0) as usize;

    for item in &module.body {
        let ModuleItem::ModuleDecl(decl) = item else {
            continue;
        };
        match decl {
            ModuleDecl::Import(import) => {
                let range = offset(import.span.lo)..offset(import.span.hi);
                let clause = source[range.clone()].to_string();

                if import.type_only {
                    edits.push((range, String::new()));
                    continue;
                }
                if !options.resolve_imports {
                    return Err(Error::parse(
                        &key,
                        format!("imports are disabled: {clause}"),
                    ));
                }

                let specifier = import.src.value.to_string_lossy().into_owned();
                let resolved = resolve_specifier(&specifier, &importer_dir, options)
                    .map_err(|e| Error::parse(&key, e.to_string()))?;
                let dep_key = module_key(&resolved);

                let mut pieces: Vec<String> = Vec::new();
                let mut named: Vec<String> = Vec::new();
                for spec in &import.specifiers {
                    match spec {
                        ImportSpecifier::Default(d) => pieces.push(format!(
                            "var {} = __weir_modules[{}][\"default\"];",
                            d.local.sym,
                            js_quote(&dep_key)
                        )),
                        ImportSpecifier::Namespace(ns) => pieces.push(format!(
                            "var {} = __weir_modules[{}];",
                            ns.local.sym,
                            js_quote(&dep_key)
                        )),
                        ImportSpecifier::Named(n) => {
                            if n.is_type_only {
                                continue;
                            }
                            let imported = match &n.imported {
                                Some(name) => export_name(name),
                                None => n.local.sym.to_string(),
                            };
                            if imported == n.local.sym.to_string() {
                                named.push(imported);
                            } else {
                                named.push(format!("{}: {}", imported, n.local.sym));
                            }
                        }
                    }
                }
                if !named.is_empty() {
                    pieces.push(format!(
                        "var {{ {} }} = __weir_modules[{}];",
                        named.join(", "),
                        js_quote(&dep_key)
                    ));
                }

                imports.push(Import {
                    name: specifier,
                    path: resolved,
                    clause,
                });
                edits.push((range, pieces.join(" ")));
            }

            ModuleDecl::ExportDecl(export) => {
                // drop the `export ` keyword, keep the declaration
                edits.push((
                    offset(export.span.lo)..offset(export.decl.span().lo),
                    String::new(),
                ));
                if wrap {
                    for name in decl_names(&export.decl) {
                        footer.push(FooterItem::Binding {
                            exported: name.clone(),
                            local: name,
                        });
                    }
                }
            }

            ModuleDecl::ExportDefaultDecl(export) => {
                let local = match &export.decl {
                    DefaultDecl::Fn(f) => f.ident.as_ref().map(|i| i.sym.to_string()),
                    DefaultDecl::Class(c) => c.ident.as_ref().map(|i| i.sym.to_string()),
                    DefaultDecl::TsInterfaceDecl(_) => {
                        edits.push((
                            offset(export.span.lo)..offset(export.span.hi),
                            String::new(),
                        ));
                        continue;
                    }
                };
                let keyword = offset(export.span.lo)..offset(export.decl.span().lo);
                match local {
                    Some(name) => {
                        edits.push((keyword, String::new()));
                        if wrap {
                            footer.push(FooterItem::Default { local: name });
                        }
                    }
                    None => {
                        edits.push((keyword, "var __weir_default = ".to_string()));
                        if wrap {
                            footer.push(FooterItem::Default {
                                local: "__weir_default".to_string(),
                            });
                        }
                    }
                }
            }

            ModuleDecl::ExportDefaultExpr(export) => {
                edits.push((
                    offset(export.span.lo)..offset(export.expr.span().lo),
                    "var __weir_default = ".to_string(),
                ));
                if wrap {
                    footer.push(FooterItem::Default {
                        local: "__weir_default".to_string(),
                    });
                }
            }

            ModuleDecl::ExportNamed(export) => {
                let range = offset(export.span.lo)..offset(export.span.hi);
                let clause = source[range.clone()].to_string();
                edits.push((range, String::new()));

                if export.type_only {
                    continue;
                }
                let dep_key = match &export.src {
                    Some(src) => {
                        let specifier = src.value.to_string_lossy().into_owned();
                        let resolved = resolve_specifier(&specifier, &importer_dir, options)
                            .map_err(|e| Error::parse(&key, e.to_string()))?;
                        let dep_key = module_key(&resolved);
                        imports.push(Import {
                            name: specifier,
                            path: resolved,
                            clause,
                        });
                        Some(dep_key)
                    }
                    None => None,
                };

                if !wrap {
                    continue;
                }
                for spec in &export.specifiers {
                    if let swc_ecma_ast::ExportSpecifier::Named(n) = spec {
                        let orig = export_name(&n.orig);
                        let exported = n
                            .exported
                            .as_ref()
                            .map(export_name)
                            .unwrap_or_else(|| orig.clone());
                        match &dep_key {
                            Some(dep_key) => footer.push(FooterItem::ReExport {
                                key: dep_key.clone(),
                                orig,
                                exported,
                            }),
                            None => footer.push(FooterItem::Binding {
                                exported,
                                local: orig,
                            }),
                        }
                    }
                }
            }

            ModuleDecl::ExportAll(export) => {
                let range = offset(export.span.lo)..offset(export.span.hi);
                let clause = source[range.clone()].to_string();
                edits.push((range, String::new()));

                let specifier = export.src.value.to_string_lossy().into_owned();
                let resolved = resolve_specifier(&specifier, &importer_dir, options)
                    .map_err(|e| Error::parse(&key, e.to_string()))?;
                let dep_key = module_key(&resolved);
                imports.push(Import {
                    name: specifier,
                    path: resolved,
                    clause,
                });
                if wrap {
                    footer.push(FooterItem::ExportAll { key: dep_key });
                }
            }

            _ => {}
        }
    }

    Ok(Surgered {
        source: apply_edits(source, edits, &key)?,
        imports,
        footer,
    })
}

/// Apply text edits, padding each replacement with newlines so the edited
/// source keeps the original line count.
fn apply_edits(
    source: &str,
    mut edits: Vec<(std::ops::Range<usize>, String)>,
    file: &str,
) -> Result<String> {
    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;

    for (range, replacement) in edits {
        if range.start < cursor || range.end > source.len() {
            return Err(Error::parse(file, "overlapping import rewrite spans"));
        }
        out.push_str(&source[cursor..range.start]);

        let original_newlines = source[range.clone()].matches('\n').count();
        let replacement_newlines = replacement.matches('\n').count();
        out.push_str(&replacement);
        for _ in replacement_newlines..original_newlines {
            out.push('\n');
        }
        cursor = range.end;
    }
    out.push_str(&source[cursor..]);
    Ok(out)
}

/// Resolve an import specifier to an absolute path.
///
/// Alias patterns are tried first (longest prefix wins); otherwise the
/// specifier resolves relative to the importing file's directory. `.ts` is
/// appended when the target is not already a concrete file.
pub fn resolve_specifier(
    specifier: &str,
    importer_dir: &Path,
    options: &TransformOptions,
) -> Result<PathBuf> {
    if specifier.starts_with("./") || specifier.starts_with("../") {
        return finalize_path(importer_dir.join(specifier), specifier);
    }

    // aliases are sorted longest-pattern-first by the config parser
    for alias in &options.aliases {
        if alias.wildcard {
            let prefix = format!("{}/", alias.pattern);
            if let Some(rest) = specifier.strip_prefix(prefix.as_str()) {
                for target in &alias.targets {
                    let candidate = options.base_dir.join(target).join(rest);
                    if let Ok(path) = finalize_path(candidate, specifier) {
                        return Ok(path);
                    }
                }
                return Err(Error::not_found(format!("import {specifier}")));
            }
        } else if specifier == alias.pattern {
            for target in &alias.targets {
                if let Ok(path) = finalize_path(options.base_dir.join(target), specifier) {
                    return Ok(path);
                }
            }
            return Err(Error::not_found(format!("import {specifier}")));
        }
    }

    // no alias matched: bare specifiers also resolve against the
    // importing file's directory
    finalize_path(importer_dir.join(specifier), specifier)
}

fn finalize_path(path: PathBuf, specifier: &str) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(canonical(path));
    }
    let with_ts = PathBuf::from(format!("{}.ts", path.to_string_lossy()));
    if with_ts.is_file() {
        return Ok(canonical(with_ts));
    }
    Err(Error::not_found(format!("import {specifier}")))
}

fn canonical(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

fn module_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string_lossy().into_owned(),
    }
}

fn decl_names(decl: &Decl) -> Vec<String> {
    match decl {
        Decl::Fn(f) => vec![f.ident.sym.to_string()],
        Decl::Class(c) => vec![c.ident.sym.to_string()],
        Decl::Var(var) => var
            .decls
            .iter()
            .filter_map(|d| match &d.name {
                Pat::Ident(ident) => Some(ident.id.sym.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_module(source: &str, filename: &str) -> Result<(Module, swc_common::BytePos)> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(filename.to_string())),
        source.to_string(),
    );
    let lexer = Lexer::new(
        ts_syntax(),
        EsVersion::Es2020,
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let module = parser
        .parse_module()
        .map_err(|e| Error::parse(filename, format!("{:?}", e.kind())))?;
    for _e in parser.take_errors() {}
    Ok((module, fm.start_pos))
}

fn js_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}

fn ensure_trailing_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

fn count_lines(s: &str) -> u32 {
    s.matches('\n').count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn options_for(dir: &Path) -> TransformOptions {
        TransformOptions {
            resolve_imports: true,
            aliases: Vec::new(),
            base_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn bundles_relative_import() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib/hello.ts",
            "export function Hi(): number { return 1; }\n",
        );
        let entry = write(
            dir.path(),
            "main.ts",
            "import { Hi } from \"./lib/hello\";\nfunction Run() { return Hi(); }\n",
        );
        let source = std::fs::read_to_string(&entry).unwrap();

        let bundle = build_bundle(&entry, &source, &options_for(dir.path())).unwrap();

        assert!(bundle.code.contains("__weir_modules["));
        assert!(bundle.code.contains("function Hi"));
        assert!(bundle.code.contains("__weir_exports[\"Hi\"] = Hi;"));
        // imported module body precedes the entry body
        assert_eq!(bundle.segments.len(), 2);
        assert!(bundle.segments[0].file.ends_with("hello.ts"));
        assert!(bundle.segments[0].start_line < bundle.segments[1].start_line);
        assert_eq!(bundle.imports.len(), 1);
        assert_eq!(bundle.imports[0].name, "./lib/hello");
    }

    #[test]
    fn surgery_preserves_line_count() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dep.ts", "export const x = 1;\n");
        let entry = write(
            dir.path(),
            "main.ts",
            "import {\n    x\n} from \"./dep\";\nfunction F() { return x; }\n",
        );
        let source = std::fs::read_to_string(&entry).unwrap();

        let surgered = surgery(&source, &entry, false, &options_for(dir.path())).unwrap();
        assert_eq!(
            surgered.source.matches('\n').count(),
            source.matches('\n').count()
        );
        assert!(surgered.source.contains("var { x } = __weir_modules["));
    }

    #[test]
    fn appends_ts_extension() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dep.ts", "export const x = 1;\n");
        let resolved =
            resolve_specifier("./dep", dir.path(), &options_for(dir.path())).unwrap();
        assert!(resolved.to_string_lossy().ends_with("dep.ts"));
    }

    #[test]
    fn alias_longest_prefix_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "libs/math.ts", "export const add = 1;\n");
        write(dir.path(), "libs/deep/math.ts", "export const add = 2;\n");

        let mut options = options_for(dir.path());
        options.aliases = vec![
            crate::transform::Alias {
                pattern: "@lib/deep".into(),
                targets: vec!["libs/deep".into()],
                wildcard: true,
            },
            crate::transform::Alias {
                pattern: "@lib".into(),
                targets: vec!["libs".into()],
                wildcard: true,
            },
        ];

        let deep = resolve_specifier("@lib/deep/math", dir.path(), &options).unwrap();
        assert!(deep.to_string_lossy().contains("deep"));
        let shallow = resolve_specifier("@lib/math", dir.path(), &options).unwrap();
        assert!(!shallow.to_string_lossy().contains("deep"));
    }

    #[test]
    fn unresolvable_import_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            resolve_specifier("missing-package", dir.path(), &options_for(dir.path()))
                .unwrap_err();
        assert!(err.to_string().contains("missing-package"));
    }

    #[test]
    fn circular_import_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.ts", "import { b } from \"./b\";\nexport const a = 1;\n");
        write(dir.path(), "b.ts", "import { a } from \"./a\";\nexport const b = 2;\n");
        let entry = dir.path().join("a.ts");
        let source = std::fs::read_to_string(&entry).unwrap();

        let err = build_bundle(&entry, &source, &options_for(dir.path())).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn shared_dependency_bundled_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "shared.ts", "export const s = 1;\n");
        write(
            dir.path(),
            "a.ts",
            "import { s } from \"./shared\";\nexport const a = s;\n",
        );
        let entry = write(
            dir.path(),
            "main.ts",
            "import { a } from \"./a\";\nimport { s } from \"./shared\";\nfunction F() { return a + s; }\n",
        );
        let source = std::fs::read_to_string(&entry).unwrap();

        let bundle = build_bundle(&entry, &source, &options_for(dir.path())).unwrap();
        let shared_wrappers = bundle
            .code
            .matches("= (function() { const __weir_exports")
            .count();
        assert_eq!(shared_wrappers, 2); // shared.ts and a.ts, each once
        assert_eq!(bundle.segments.len(), 3);
    }

    #[test]
    fn default_exports() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "dep.ts",
            "export default function greet() { return \"hi\"; }\n",
        );
        let entry = write(
            dir.path(),
            "main.ts",
            "import greet from \"./dep\";\nfunction F() { return greet(); }\n",
        );
        let source = std::fs::read_to_string(&entry).unwrap();

        let bundle = build_bundle(&entry, &source, &options_for(dir.path())).unwrap();
        assert!(bundle.code.contains("__weir_exports[\"default\"] = greet;"));
        assert!(bundle.code.contains("[\"default\"];"));
    }

    #[test]
    fn segment_lookup_by_line() {
        let bundle = Bundle {
            code: String::new(),
            segments: vec![
                Segment {
                    file: "a.ts".into(),
                    start_line: 2,
                    line_count: 3,
                    map: None,
                },
                Segment {
                    file: "b.ts".into(),
                    start_line: 8,
                    line_count: 2,
                    map: None,
                },
            ],
            imports: vec![],
        };
        assert_eq!(bundle.segment_for_line(2).unwrap().file, "a.ts");
        assert_eq!(bundle.segment_for_line(4).unwrap().file, "a.ts");
        assert!(bundle.segment_for_line(5).is_none());
        assert_eq!(bundle.segment_for_line(9).unwrap().file, "b.ts");
    }

    #[test]
    fn plain_bundle_is_identity() {
        let bundle = plain_bundle(Path::new("u.js"), "function Hello(n){return n;}");
        assert!(bundle.code.ends_with('\n'));
        assert_eq!(bundle.segments.len(), 1);
        assert_eq!(bundle.segments[0].start_line, 1);
        assert!(bundle.imports.is_empty());
    }
}
