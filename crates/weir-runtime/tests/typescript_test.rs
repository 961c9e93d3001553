//! TypeScript loading: transform, imports, aliases, stack resolution.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use weir_runtime::bridge::ShareData;
use weir_runtime::{Config, Error, Runtime};

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn runtime_at(root: &Path, debug: bool) -> Arc<Runtime> {
    Runtime::new(
        Config {
            min_size: 1,
            max_size: 2,
            context_timeout: 2000,
            default_timeout: 2000,
            debug,
            ..Config::default()
        }
        .data_root(root),
    )
    .unwrap()
}

#[test]
fn typescript_with_relative_import() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "scripts/lib/hello.ts",
        "export function Hi(): number { return 1; }\n",
    );
    write(
        dir.path(),
        "scripts/main.ts",
        "import { Hi } from \"./lib/hello\";\nexport function Run(): number { return Hi(); }\n",
    );

    let rt = runtime_at(dir.path(), false);
    rt.load_file(dir.path().join("scripts/main.ts"), "main", false)
        .unwrap();

    let out = rt.call("main", "Run", vec![], ShareData::default()).unwrap();
    assert_eq!(out, json!(1));
}

#[test]
fn type_annotations_are_stripped() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "scripts/typed.ts",
        r#"
interface Box { value: number }
export function Wrap(value: number): Box {
    return { value };
}
"#,
    );

    let rt = runtime_at(dir.path(), false);
    rt.load_file(dir.path().join("scripts/typed.ts"), "typed", false)
        .unwrap();

    let out = rt
        .call("typed", "Wrap", vec![json!(7)], ShareData::default())
        .unwrap();
    assert_eq!(out, json!({"value": 7}));
}

#[test]
fn alias_imports_resolve_through_project_config() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tsconfig.json",
        r#"{
            // path aliases, comments allowed
            "compilerOptions": {
                "paths": {
                    "@lib/*": ["libs/*"],
                },
            },
        }"#,
    );
    write(
        dir.path(),
        "libs/math.ts",
        "export function Add(a: number, b: number): number { return a + b; }\n",
    );
    write(
        dir.path(),
        "scripts/calc.ts",
        "import { Add } from \"@lib/math\";\nexport function Sum(a: number, b: number): number { return Add(a, b); }\n",
    );

    let rt = runtime_at(dir.path(), false);
    rt.load_file(dir.path().join("scripts/calc.ts"), "calc", false)
        .unwrap();

    let out = rt
        .call("calc", "Sum", vec![json!(2), json!(3)], ShareData::default())
        .unwrap();
    assert_eq!(out, json!(5));
}

#[test]
fn thrown_exception_resolves_to_original_file() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "scripts/lib/fail.ts",
        r#"export function Explode(): never {
    throw new Error("from the library");
}
"#,
    );
    write(
        dir.path(),
        "scripts/entry.ts",
        "import { Explode } from \"./lib/fail\";\nexport function Go(): void { Explode(); }\n",
    );

    let rt = runtime_at(dir.path(), true);
    rt.load_file(dir.path().join("scripts/entry.ts"), "entry", false)
        .unwrap();

    match rt.call("entry", "Go", vec![], ShareData::default()) {
        Err(Error::Runtime {
            message,
            stack,
            raw_stack,
        }) => {
            assert!(message.contains("from the library"));
            assert!(raw_stack.is_some(), "engine stack missing");
            let stack = stack.expect("debug mode returns the resolved stack");
            // the resolved trace points at the original TS file, not the
            // concatenated blob
            assert!(stack.contains("fail.ts"), "stack was: {stack}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn non_debug_mode_omits_the_stack() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "scripts/oops.ts",
        "export function Go(): void { throw new Error(\"quiet\"); }\n",
    );

    let rt = runtime_at(dir.path(), false);
    rt.load_file(dir.path().join("scripts/oops.ts"), "oops", false)
        .unwrap();

    match rt.call("oops", "Go", vec![], ShareData::default()) {
        Err(Error::Runtime { message, stack, .. }) => {
            assert!(message.contains("quiet"));
            assert!(stack.is_none());
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn default_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "scripts/lib/greet.ts",
        "export default function greet(name: string): string { return \"hey \" + name; }\n",
    );
    write(
        dir.path(),
        "scripts/hello.ts",
        "import greet from \"./lib/greet\";\nexport function Hello(name: string): string { return greet(name); }\n",
    );

    let rt = runtime_at(dir.path(), false);
    rt.load_file(dir.path().join("scripts/hello.ts"), "hello", false)
        .unwrap();

    let out = rt
        .call("hello", "Hello", vec![json!("weir")], ShareData::default())
        .unwrap();
    assert_eq!(out, json!("hey weir"));
}

#[test]
fn unresolvable_import_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "scripts/broken.ts",
        "import { x } from \"./does-not-exist\";\nexport function F(): number { return x; }\n",
    );

    let rt = runtime_at(dir.path(), false);
    let err = rt
        .load_file(dir.path().join("scripts/broken.ts"), "broken", false)
        .unwrap_err();
    assert!(matches!(err, Error::Parse { .. }));
}
