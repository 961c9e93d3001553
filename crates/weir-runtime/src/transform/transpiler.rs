//! TypeScript to JavaScript transpilation via SWC.
//!
//! Strips type annotations and TypeScript-specific syntax; optionally
//! emits a source map so stack frames can be traced back to the original
//! file.

use swc_common::{FileName, GLOBALS, Globals, Mark, SourceMap, sync::Lrc};
use swc_ecma_ast::{EsVersion, Program};
use swc_ecma_codegen::{Config as CodegenConfig, Emitter, text_writer::JsWriter};
use swc_ecma_parser::{Parser, StringInput, Syntax, TsSyntax, lexer::Lexer};
use swc_ecma_transforms_base::{fixer::fixer, resolver};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::VisitMutWith;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TranspileOptions {
    /// Target ECMAScript version.
    pub target: EsVersion,
    /// Generate a source map.
    pub source_map: bool,
    /// File name recorded in errors and the source map.
    pub filename: String,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            target: EsVersion::Es2020,
            source_map: true,
            filename: "script.ts".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct TranspileResult {
    /// The transpiled JavaScript code.
    pub code: String,
    /// Source map JSON, when requested.
    pub source_map: Option<String>,
}

pub(crate) fn ts_syntax() -> Syntax {
    Syntax::Typescript(TsSyntax {
        tsx: false,
        decorators: true,
        dts: false,
        no_early_errors: false,
        disallow_ambiguous_jsx_like: false,
    })
}

/// Transpile one TypeScript source to JavaScript.
pub fn transpile(source: &str, options: &TranspileOptions) -> Result<TranspileResult> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(options.filename.clone())),
        source.to_string(),
    );

    let lexer = Lexer::new(ts_syntax(), options.target, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let module = parser.parse_module().map_err(|e| {
        Error::parse(&options.filename, format!("{:?}", e.kind()))
    })?;
    for _e in parser.take_errors() {}

    let mut program = Program::Module(module);

    GLOBALS.set(&Globals::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();

        program.visit_mut_with(&mut resolver(unresolved_mark, top_level_mark, true));
        program.mutate(&mut strip(unresolved_mark, top_level_mark));
        program.visit_mut_with(&mut fixer(None));
    });

    let module = match program {
        Program::Module(m) => m,
        Program::Script(_) => {
            return Err(Error::parse(&options.filename, "expected module, got script"));
        }
    };

    let mut buf = vec![];
    let mut src_map_buf = vec![];

    {
        let writer = JsWriter::new(
            cm.clone(),
            "\n",
            &mut buf,
            if options.source_map {
                Some(&mut src_map_buf)
            } else {
                None
            },
        );

        let codegen_config = CodegenConfig::default()
            .with_target(options.target)
            .with_ascii_only(false)
            .with_minify(false)
            .with_omit_last_semi(false);

        let mut emitter = Emitter {
            cfg: codegen_config,
            cm: cm.clone(),
            comments: None,
            wr: writer,
        };

        emitter
            .emit_module(&module)
            .map_err(|e| Error::compile(&options.filename, format!("emit failed: {e}")))?;
    }

    let code = String::from_utf8(buf)
        .map_err(|e| Error::compile(&options.filename, format!("invalid UTF-8 output: {e}")))?;

    let source_map = if options.source_map && !src_map_buf.is_empty() {
        let mut map_buf = vec![];
        cm.build_source_map(
            &src_map_buf,
            None,
            swc_common::source_map::DefaultSourceMapGenConfig,
        )
        .to_writer(&mut map_buf)
        .ok();
        String::from_utf8(map_buf).ok()
    } else {
        None
    };

    Ok(TranspileResult { code, source_map })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TranspileOptions {
        TranspileOptions::default()
    }

    #[test]
    fn strips_annotations() {
        let result = transpile(
            "const name: string = \"test\";\nconst count: number = 42;\n",
            &options(),
        )
        .unwrap();
        assert!(!result.code.contains(": string"));
        assert!(!result.code.contains(": number"));
        assert!(result.code.contains("const name"));
    }

    #[test]
    fn strips_interfaces_and_types() {
        let result = transpile(
            "interface User { id: string }\ntype Id = string;\nconst u = { id: \"1\" };\n",
            &options(),
        )
        .unwrap();
        assert!(!result.code.contains("interface"));
        assert!(!result.code.contains("type Id"));
        assert!(result.code.contains("const u"));
    }

    #[test]
    fn plain_javascript_passes_through() {
        let result = transpile("function Hello(name) { return \"hello:\" + name; }\n", &options())
            .unwrap();
        assert!(result.code.contains("function Hello"));
    }

    #[test]
    fn source_map_emitted_on_request() {
        let result = transpile("const x: number = 1;\n", &options()).unwrap();
        let map = result.source_map.expect("map requested");
        assert!(map.contains("\"mappings\""));

        let no_map = transpile(
            "const x: number = 1;\n",
            &TranspileOptions {
                source_map: false,
                ..options()
            },
        )
        .unwrap();
        assert!(no_map.source_map.is_none());
    }

    #[test]
    fn syntax_errors_carry_file_name() {
        let err = transpile("const x: = 1;\n", &options()).unwrap_err();
        assert!(err.to_string().contains("script.ts"));
    }
}
