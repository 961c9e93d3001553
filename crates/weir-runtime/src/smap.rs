//! Source-map-aware stack rewriting.
//!
//! The engine reports frames against the concatenated script. Rewriting
//! walks each frame back to its original file: locate the owning module by
//! line range in the offset index, subtract the module's starting line,
//! then consult that module's own source map. Maps are kept per-module
//! rather than merged into one, so resolution stays exact after
//! concatenation.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::transform::Bundle;

/// One parsed stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    /// 1-based.
    pub line: u32,
    /// 1-based; 0 when the engine did not report a column.
    pub column: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.function.is_empty() {
            "<anonymous>"
        } else {
            &self.function
        };
        if self.column > 0 {
            write!(f, "    at {} ({}:{}:{})", name, self.file, self.line, self.column)
        } else {
            write!(f, "    at {} ({}:{})", name, self.file, self.line)
        }
    }
}

// `at NAME (FILE:LINE:COL)` with optional NAME, parens and column
static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(?:(?P<func>[^(]+?)\s+\()?(?P<file>[^()\s][^()]*?):(?P<line>\d+)(?::(?P<col>\d+))?\)?\s*$")
        .unwrap()
});

/// Parse an engine stack trace into frames. Lines that do not match the
/// frame grammar are skipped.
pub fn parse_stack(text: &str) -> Vec<StackFrame> {
    text.lines()
        .filter_map(|line| {
            let caps = FRAME_RE.captures(line)?;
            Some(StackFrame {
                function: caps
                    .name("func")
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                file: caps["file"].to_string(),
                line: caps["line"].parse().ok()?,
                column: caps
                    .name("col")
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0),
            })
        })
        .collect()
}

/// Display-path rewriting applied after source-map resolution.
#[derive(Clone, Default)]
pub enum PathRewrite {
    #[default]
    None,
    /// Prefix replacements, first match wins.
    Map(Vec<(String, String)>),
    /// Arbitrary rewrite function.
    Func(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl PathRewrite {
    pub fn apply(&self, path: &str) -> String {
        match self {
            PathRewrite::None => path.to_string(),
            PathRewrite::Map(rules) => {
                for (from, to) in rules {
                    if let Some(rest) = path.strip_prefix(from.as_str()) {
                        return format!("{to}{rest}");
                    }
                }
                path.to_string()
            }
            PathRewrite::Func(f) => f(path),
        }
    }
}

struct IndexSegment {
    file: String,
    start_line: u32,
    line_count: u32,
    map: Option<sourcemap::SourceMap>,
}

/// Sorted index of module line offsets in a concatenated script, plus each
/// module's parsed source map.
pub struct SourceIndex {
    segments: Vec<IndexSegment>,
}

impl SourceIndex {
    pub fn from_bundle(bundle: &Bundle) -> Self {
        let mut segments: Vec<IndexSegment> = bundle
            .segments
            .iter()
            .map(|s| IndexSegment {
                file: s.file.clone(),
                start_line: s.start_line,
                line_count: s.line_count,
                map: s
                    .map
                    .as_ref()
                    .and_then(|m| sourcemap::SourceMap::from_slice(m.as_bytes()).ok()),
            })
            .collect();
        segments.sort_by_key(|s| s.start_line);
        Self { segments }
    }

    fn segment_for_line(&self, line: u32) -> Option<&IndexSegment> {
        let idx = self
            .segments
            .partition_point(|s| s.start_line <= line)
            .checked_sub(1)?;
        let segment = &self.segments[idx];
        (line < segment.start_line + segment.line_count).then_some(segment)
    }

    /// Resolve one frame to original-file coordinates. Frames outside any
    /// segment come back unchanged.
    pub fn resolve(&self, frame: &StackFrame) -> StackFrame {
        let Some(segment) = self.segment_for_line(frame.line) else {
            return frame.clone();
        };
        let local_line = frame.line - segment.start_line + 1;

        if let Some(map) = &segment.map {
            let col0 = frame.column.saturating_sub(1);
            if let Some(token) = map.lookup_token(local_line - 1, col0) {
                return StackFrame {
                    function: frame.function.clone(),
                    file: token
                        .get_source()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| segment.file.clone()),
                    line: token.get_src_line() + 1,
                    column: token.get_src_col() + 1,
                };
            }
        }

        StackFrame {
            function: frame.function.clone(),
            file: segment.file.clone(),
            line: local_line,
            column: frame.column,
        }
    }

    /// Rewrite a full engine stack trace. Returns the rewritten trace with
    /// one `at` line per resolved frame.
    pub fn rewrite_stack(&self, raw: &str, rewrite: &PathRewrite) -> String {
        parse_stack(raw)
            .iter()
            .map(|frame| {
                let mut resolved = self.resolve(frame);
                resolved.file = rewrite.apply(&resolved.file);
                resolved.to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Segment;

    #[test]
    fn parses_frames_with_and_without_columns() {
        let stack = "Error: boom\n    at Hello (eval_script:12:5)\n    at eval_script:20\n";
        let frames = parse_stack(stack);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            StackFrame {
                function: "Hello".into(),
                file: "eval_script".into(),
                line: 12,
                column: 5,
            }
        );
        assert_eq!(frames[1].function, "");
        assert_eq!(frames[1].line, 20);
        assert_eq!(frames[1].column, 0);
    }

    #[test]
    fn offset_subtraction_without_map() {
        let bundle = Bundle {
            code: String::new(),
            segments: vec![
                Segment {
                    file: "/app/lib.ts".into(),
                    start_line: 2,
                    line_count: 10,
                    map: None,
                },
                Segment {
                    file: "/app/main.ts".into(),
                    start_line: 15,
                    line_count: 5,
                    map: None,
                },
            ],
            imports: vec![],
        };
        let index = SourceIndex::from_bundle(&bundle);

        let frame = StackFrame {
            function: "Hi".into(),
            file: "blob".into(),
            line: 16,
            column: 3,
        };
        let resolved = index.resolve(&frame);
        assert_eq!(resolved.file, "/app/main.ts");
        assert_eq!(resolved.line, 2);

        // line 13 falls in the gap between segments (wrapper footer)
        let unowned = StackFrame {
            function: "".into(),
            file: "blob".into(),
            line: 13,
            column: 0,
        };
        assert_eq!(index.resolve(&unowned), unowned);
    }

    #[test]
    fn path_rewrite_rules() {
        let rewrite = PathRewrite::Map(vec![("/app/".into(), "scripts/".into())]);
        assert_eq!(rewrite.apply("/app/main.ts"), "scripts/main.ts");
        assert_eq!(rewrite.apply("/other/x.ts"), "/other/x.ts");

        let func = PathRewrite::Func(Arc::new(|p| p.to_uppercase()));
        assert_eq!(func.apply("a.ts"), "A.TS");
    }

    #[test]
    fn rewrite_stack_renders_lines() {
        let bundle = Bundle {
            code: String::new(),
            segments: vec![Segment {
                file: "/app/u.ts".into(),
                start_line: 1,
                line_count: 100,
                map: None,
            }],
            imports: vec![],
        };
        let index = SourceIndex::from_bundle(&bundle);
        let out = index.rewrite_stack(
            "    at Hello (blob:3:7)",
            &PathRewrite::Map(vec![("/app/".into(), "".into())]),
        );
        assert_eq!(out, "    at Hello (u.ts:3:7)");
    }
}
