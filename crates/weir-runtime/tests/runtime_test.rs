//! Integration tests for the runtime facade and the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use weir_runtime::bridge::ShareData;
use weir_runtime::{Config, Error, Mode, Runtime};

fn runtime() -> Arc<Runtime> {
    Runtime::new(Config {
        min_size: 1,
        max_size: 2,
        context_timeout: 2000,
        default_timeout: 2000,
        ..Config::default()
    })
    .unwrap()
}

#[test]
fn hello_world() {
    let rt = runtime();
    rt.load_source("u", "u.js", "function Hello(name){return \"hello:\"+name;}", false)
        .unwrap();

    let out = rt
        .call("u", "Hello", vec![json!("world")], ShareData::default())
        .unwrap();
    assert_eq!(out, json!("hello:world"));
}

#[test]
fn performance_mode_hello_world() {
    let rt = Runtime::new(Config {
        mode: Mode::Performance,
        min_size: 1,
        max_size: 2,
        context_timeout: 2000,
        default_timeout: 2000,
        ..Config::default()
    })
    .unwrap();
    rt.load_source("u", "u.js", "function Hello(name){return \"hello:\"+name;}", false)
        .unwrap();

    let out = rt
        .call("u", "Hello", vec![json!("world")], ShareData::default())
        .unwrap();
    assert_eq!(out, json!("hello:world"));
}

#[test]
fn identical_reload_gives_identical_outputs() {
    let rt = runtime();
    let source = "function Val(){ return {a: 1, b: [1, 2]}; }";
    rt.load_source("v", "v.js", source, false).unwrap();
    let first = rt.call("v", "Val", vec![], ShareData::default()).unwrap();

    rt.load_source("v", "v.js", source, false).unwrap();
    let second = rt.call("v", "Val", vec![], ShareData::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn reload_changes_next_call() {
    let rt = runtime();
    rt.load_source("r", "r.js", "function N(){ return 1; }", false)
        .unwrap();
    assert_eq!(rt.call("r", "N", vec![], ShareData::default()).unwrap(), json!(1));

    rt.load_source("r", "r.js", "function N(){ return 2; }", false)
        .unwrap();
    assert_eq!(rt.call("r", "N", vec![], ShareData::default()).unwrap(), json!(2));
}

#[test]
fn missing_method_and_script_are_not_found() {
    let rt = runtime();
    rt.load_source("m", "m.js", "function A(){}", false).unwrap();

    assert!(matches!(
        rt.call("m", "Nope", vec![], ShareData::default()),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        rt.call("ghost", "A", vec![], ShareData::default()),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn typed_exception_carries_status() {
    let rt = runtime();
    rt.load_source(
        "e",
        "e.js",
        "function Deny(){ throw new Exception(\"not yours\", 403); }",
        false,
    )
    .unwrap();

    match rt.call("e", "Deny", vec![], ShareData::default()) {
        Err(Error::Exception(e)) => {
            assert_eq!(e.code, 403);
            assert_eq!(e.message, "not yours");
        }
        other => panic!("expected a typed exception, got {other:?}"),
    }
}

#[test]
fn plain_throw_is_a_runtime_error() {
    let rt = runtime();
    rt.load_source("t", "t.js", "function Boom(){ throw new Error(\"kapow\"); }", false)
        .unwrap();

    match rt.call("t", "Boom", vec![], ShareData::default()) {
        Err(Error::Runtime { message, .. }) => assert!(message.contains("kapow")),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn share_record_is_visible_and_cleared() {
    let rt = runtime();
    rt.load_source(
        "s",
        "s.js",
        r#"
function Sid(){ return __yao_data.SID; }
function HasShare(){ return typeof globalThis.__yao_data !== "undefined"; }
"#,
        false,
    )
    .unwrap();

    let out = rt
        .call("s", "Sid", vec![], ShareData::with_sid("session-9"))
        .unwrap();
    assert_eq!(out, json!("session-9"));

    // each call installs its own record; between calls it is removed, so
    // a fresh call observes only its own
    let out = rt
        .call("s", "Sid", vec![], ShareData::with_sid("session-10"))
        .unwrap();
    assert_eq!(out, json!("session-10"));
}

#[test]
fn call_timeout_interrupts_the_engine() {
    let rt = Runtime::new(Config {
        min_size: 1,
        max_size: 1,
        context_timeout: 200,
        default_timeout: 2000,
        ..Config::default()
    })
    .unwrap();
    rt.load_source("loop", "loop.js", "function Spin(){ while (true) {} }", false)
        .unwrap();

    let start = std::time::Instant::now();
    let err = rt
        .call("loop", "Spin", vec![], ShareData::default())
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_) | Error::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn busy_pool_fails_fast() {
    let rt = Arc::new(
        Runtime::new(Config {
            min_size: 1,
            max_size: 1,
            context_timeout: 3000,
            default_timeout: 100,
            ..Config::default()
        })
        .unwrap(),
    );
    rt.load_source(
        "slow",
        "slow.js",
        "function Nap(){ time.Sleep(800); return 1; }",
        false,
    )
    .unwrap();

    let holder = {
        let rt = rt.clone();
        std::thread::spawn(move || rt.call("slow", "Nap", vec![], ShareData::default()))
    };
    std::thread::sleep(Duration::from_millis(200));

    // the single engine is busy napping; selection times out
    let err = rt
        .call("slow", "Nap", vec![], ShareData::default())
        .unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
    assert!(err.retryable());

    assert_eq!(holder.join().unwrap().unwrap(), json!(1));
}

#[test]
fn pool_stays_within_bounds_under_concurrency() {
    let rt = Arc::new(
        Runtime::new(Config {
            min_size: 1,
            max_size: 3,
            context_timeout: 3000,
            default_timeout: 3000,
            ..Config::default()
        })
        .unwrap(),
    );
    rt.load_source("w", "w.js", "function Work(n){ return n * 2; }", false)
        .unwrap();

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let rt = rt.clone();
            std::thread::spawn(move || {
                rt.call("w", "Work", vec![json!(i)], ShareData::default())
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        match result {
            Ok(v) => assert_eq!(v, json!(i as i64 * 2)),
            Err(e) => assert!(e.retryable(), "unexpected error: {e}"),
        }
        assert!(rt.pool_size() <= 3, "pool exceeded max");
    }
}

#[test]
fn nested_process_calls() {
    weir_process::register("tests.runtime.double", |p| {
        let n = p.arg_int(0)?;
        Ok(json!(n * 2))
    })
    .unwrap();

    let rt = runtime();
    rt.load_source(
        "n",
        "n.js",
        "function Quad(n){ return Process(\"tests.runtime.double\", Process(\"tests.runtime.double\", n)); }",
        false,
    )
    .unwrap();

    let out = rt.call("n", "Quad", vec![json!(3)], ShareData::default()).unwrap();
    assert_eq!(out, json!(12));
}

#[test]
fn studio_requires_root() {
    weir_process::register("studio.tests.secret", |_| Ok(json!("s3cret"))).unwrap();

    let rt = runtime();
    rt.load_source(
        "g",
        "g.js",
        "function Grab(){ return Studio(\"tests.secret\"); }",
        false,
    )
    .unwrap();

    let err = rt
        .call("g", "Grab", vec![], ShareData::default())
        .unwrap_err();
    match err {
        Error::Exception(e) => assert_eq!(e.code, 403),
        other => panic!("expected 403, got {other:?}"),
    }

    let share = ShareData {
        root: true,
        ..ShareData::default()
    };
    assert_eq!(rt.call("g", "Grab", vec![], share).unwrap(), json!("s3cret"));
}

#[test]
fn use_releases_registered_objects() {
    let rt = runtime();
    rt.load_source(
        "mcp",
        "mcp.js",
        r#"
function EchoOnce(text){
    return Use(MCP, ["echo"], function (c) { return c.Call("echo", text); });
}
function EchoMany(count){
    for (var i = 0; i < count; i++) {
        Use(MCP, ["echo"], function (c) { c.Call("ping"); });
    }
    return count;
}
"#,
        false,
    )
    .unwrap();

    let before = weir_runtime::bridge::registry().count();
    let out = rt
        .call("mcp", "EchoOnce", vec![json!("hi")], ShareData::default())
        .unwrap();
    assert_eq!(out, json!("hi"));

    rt.call("mcp", "EchoMany", vec![json!(100)], ShareData::default())
        .unwrap();

    // Use released everything deterministically; allow a little drift for
    // objects still pinned by contexts awaiting GC
    let after = weir_runtime::bridge::registry().count();
    assert!(
        after <= before + 10,
        "registered objects leaked: {before} -> {after}"
    );
}

#[test]
fn collectives_from_script() {
    weir_process::register("tests.runtime.ok", |p| Ok(p.args[0].clone())).unwrap();
    weir_process::register("tests.runtime.err", |_| {
        Err(weir_process::Exception::internal("nope"))
    })
    .unwrap();

    let rt = runtime();
    rt.load_source(
        "c",
        "c.js",
        r#"
function Both(){
    return All([
        {process: "tests.runtime.ok", args: [1]},
        {process: "tests.runtime.err", args: []},
    ]);
}
"#,
        false,
    )
    .unwrap();

    let out = rt.call("c", "Both", vec![], ShareData::default()).unwrap();
    assert_eq!(out[0], json!({"data": 1, "index": 0}));
    assert_eq!(out[1], json!({"error": "nope", "index": 1}));
}

#[test]
fn resize_rebuilds_the_pool() {
    let rt = runtime();
    rt.load_source("z", "z.js", "function One(){ return 1; }", false)
        .unwrap();
    rt.call("z", "One", vec![], ShareData::default()).unwrap();

    rt.resize(2, 4).unwrap();
    assert_eq!(rt.pool_size(), 2);
    // selection still works after the rebuild
    assert_eq!(rt.call("z", "One", vec![], ShareData::default()).unwrap(), json!(1));
}
