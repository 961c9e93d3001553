//! Project config parsing (tsconfig.json subset).
//!
//! The transformer consumes one thing from the project config: the
//! `compilerOptions.paths` alias table. The file format tolerates comments
//! and trailing commas, both common in the wild; unknown fields are
//! ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// One path alias: `"@lib/*" -> ["libs/*"]`. The pattern and targets are
/// stored without their trailing `/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Prefix before `/*`; an alias without `/*` matches only exactly.
    pub pattern: String,
    /// Candidate roots, also without `/*`, relative to the base dir.
    pub targets: Vec<String>,
    /// Whether the alias had a `/*` suffix and therefore matches prefixes.
    pub wildcard: bool,
}

/// The parsed project config.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub aliases: Vec<Alias>,
    pub base_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    compiler_options: RawCompilerOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompilerOptions {
    #[serde(default)]
    paths: Option<HashMap<String, Vec<String>>>,
}

impl ProjectConfig {
    /// Parse a project config document. `base_dir` anchors the alias
    /// targets.
    pub fn parse(file: &str, source: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let cleaned = strip_json_comments(source);
        let raw: RawConfig = serde_json::from_str(&cleaned)
            .map_err(|e| Error::parse(file, e.to_string()))?;

        let mut aliases: Vec<Alias> = raw
            .compiler_options
            .paths
            .unwrap_or_default()
            .into_iter()
            .map(|(pattern, targets)| {
                let wildcard = pattern.ends_with("/*");
                Alias {
                    pattern: pattern.trim_end_matches("/*").to_string(),
                    targets: targets
                        .into_iter()
                        .map(|t| t.trim_end_matches("/*").to_string())
                        .collect(),
                    wildcard,
                }
            })
            .collect();

        // longest pattern first so prefix matching picks the most specific
        aliases.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));

        Ok(Self {
            aliases,
            base_dir: base_dir.into(),
        })
    }

    /// Load `tsconfig.json` from a directory, if present.
    pub fn load_for_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join("tsconfig.json");
        if !path.exists() {
            return Ok(Self {
                aliases: Vec::new(),
                base_dir: dir.to_path_buf(),
            });
        }
        let source = std::fs::read_to_string(&path)
            .map_err(|e| Error::parse(path.to_string_lossy(), e.to_string()))?;
        Self::parse(&path.to_string_lossy(), &source, dir)
    }
}

/// Strip single-line and multi-line comments plus trailing commas from a
/// JSON document.
fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            out.push(c);
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            out.push(c);
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            out.push(c);
            continue;
        }
        if in_string {
            out.push(c);
            continue;
        }
        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    chars.next();
                    for nc in chars.by_ref() {
                        if nc == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    while let Some(nc) = chars.next() {
                        if nc == '*' && chars.peek() == Some(&'/') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => out.push(c),
            }
            continue;
        }
        if c == ',' {
            // trailing comma: next non-whitespace is a closing bracket
            let mut ahead = chars.clone();
            let trailing = loop {
                match ahead.next() {
                    Some(nc) if nc.is_whitespace() => continue,
                    Some(']') | Some('}') => break true,
                    _ => break false,
                }
            };
            if !trailing {
                out.push(c);
            }
            continue;
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths() {
        let config = ProjectConfig::parse(
            "tsconfig.json",
            r#"{
                "compilerOptions": {
                    "paths": {
                        "@lib/*": ["libs/*"],
                        "@lib/deep/*": ["libs/deep/*"],
                        "exact": ["misc/exact.ts"]
                    }
                }
            }"#,
            "/app",
        )
        .unwrap();

        assert_eq!(config.aliases.len(), 3);
        // longest pattern first
        assert_eq!(config.aliases[0].pattern, "@lib/deep");
        assert!(config.aliases[0].wildcard);
        let exact = config.aliases.iter().find(|a| a.pattern == "exact").unwrap();
        assert!(!exact.wildcard);
    }

    #[test]
    fn tolerates_comments_and_trailing_commas() {
        let config = ProjectConfig::parse(
            "tsconfig.json",
            r#"{
                // line comment
                "compilerOptions": {
                    /* block
                       comment */
                    "paths": {
                        "@/*": ["src/*"],
                    },
                },
            }"#,
            "/app",
        )
        .unwrap();
        assert_eq!(config.aliases.len(), 1);
        assert_eq!(config.aliases[0].pattern, "@");
    }

    #[test]
    fn unknown_fields_ignored() {
        let config = ProjectConfig::parse(
            "tsconfig.json",
            r#"{"compilerOptions": {"target": "ES2022", "strict": true}, "include": ["src"]}"#,
            "/app",
        )
        .unwrap();
        assert!(config.aliases.is_empty());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = ProjectConfig::parse("tsconfig.json", "{nope", "/app").unwrap_err();
        assert!(err.to_string().contains("tsconfig.json"));
    }

    #[test]
    fn strings_with_slashes_survive() {
        let out = strip_json_comments(r#"{"url": "https://example.com/x"}"#);
        assert_eq!(out, r#"{"url": "https://example.com/x"}"#);
    }
}
