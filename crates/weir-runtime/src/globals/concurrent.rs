//! `All`, `Any`, `Race` collective primitives.
//!
//! Each takes an array of `{process, args}` tasks and returns an array of
//! `{data, error?, index}` entries ordered by index. `All` waits for every
//! task; `Any` settles on the first non-error result and cancels the rest;
//! `Race` settles on the first completion regardless of outcome. Tasks run
//! on their own OS threads against the process bus, so they may re-enter
//! the runtime on other engines.

use crossbeam_channel::unbounded;
use rquickjs::{Ctx, Function};
use serde_json::json;

use weir_process::{CancelToken, Exception};

use crate::bridge::{self, ShareData, share_from_context};
use crate::globals::{coerce, json_value, process::run_guarded};

#[derive(Clone)]
struct Task {
    process: String,
    args: Vec<serde_json::Value>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Policy {
    All,
    /// Settle on the first non-error result.
    FirstSuccess,
    /// Settle on the first completion of any kind.
    FirstDone,
}

fn parse_tasks(ctx: &Ctx<'_>, args: &[rquickjs::Value<'_>]) -> rquickjs::Result<Vec<Task>> {
    let list = args
        .first()
        .and_then(|v| bridge::unmarshal(v).ok())
        .map(|v| v.to_json());
    let Some(serde_json::Value::Array(items)) = list else {
        return Err(rquickjs::Exception::throw_type(
            ctx,
            "expected an array of {process, args} tasks",
        ));
    };

    let mut tasks = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let process = item
            .get("process")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                rquickjs::Exception::throw_type(ctx, &format!("task {i}: process is required"))
            })?
            .to_string();
        let args = match item.get("args") {
            Some(serde_json::Value::Array(a)) => a.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };
        tasks.push(Task { process, args });
    }
    Ok(tasks)
}

fn entry(index: usize, result: &Result<serde_json::Value, Exception>) -> serde_json::Value {
    match result {
        Ok(data) => json!({"data": data, "index": index}),
        Err(e) if e.code == 408 => json!({"error": "cancelled", "index": index}),
        Err(e) => json!({"error": e.message, "index": index}),
    }
}

fn run_tasks(tasks: Vec<Task>, share: &ShareData, policy: Policy) -> serde_json::Value {
    let count = tasks.len();
    let tokens: Vec<CancelToken> = (0..count).map(|_| CancelToken::new()).collect();
    let (tx, rx) = unbounded::<(usize, Result<serde_json::Value, Exception>)>();

    std::thread::scope(|scope| {
        for (index, task) in tasks.into_iter().enumerate() {
            let tx = tx.clone();
            let token = tokens[index].clone();
            let context = share.to_context(token);
            scope.spawn(move || {
                let result = run_guarded(&task.process, task.args, context);
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        let mut results: Vec<Option<Result<serde_json::Value, Exception>>> = vec![None; count];
        let mut settled = false;

        for (index, result) in rx.iter() {
            let winner = match policy {
                Policy::All => false,
                Policy::FirstSuccess => !settled && result.is_ok(),
                Policy::FirstDone => !settled,
            };
            if winner {
                settled = true;
                for (i, token) in tokens.iter().enumerate() {
                    if i != index {
                        token.cancel();
                    }
                }
            }
            results[index] = Some(result);
        }

        serde_json::Value::Array(
            results
                .iter()
                .enumerate()
                .map(|(i, r)| match r {
                    Some(result) => entry(i, result),
                    None => json!({"error": "cancelled", "index": i}),
                })
                .collect(),
        )
    })
}

fn collective<'js>(ctx: &Ctx<'js>, name: &'static str, policy: Policy) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        coerce(move |ctx, args| {
            let tasks = parse_tasks(&ctx, &args)?;
            let share = share_from_context(&ctx);
            let results = run_tasks(tasks, &share, policy);
            json_value(&ctx, results)
        }),
    )?
    .with_name(name)
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("All", collective(ctx, "All", Policy::All)?)?;
    globals.set("Any", collective(ctx, "Any", Policy::FirstSuccess)?)?;
    globals.set("Race", collective(ctx, "Race", Policy::FirstDone)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup() {
        let _ = weir_process::register("tests.collective.ok", |p| {
            Ok(p.args.first().cloned().unwrap_or(serde_json::Value::Null))
        });
        let _ = weir_process::register("tests.collective.fail", |_| {
            Err(Exception::internal("boom"))
        });
        let _ = weir_process::register("tests.collective.slow", |p| {
            for _ in 0..200 {
                if p.context.cancel.is_cancelled() {
                    return Err(Exception::new(408, "invocation cancelled"));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(json!("slow"))
        });
    }

    fn task(process: &str, args: Vec<serde_json::Value>) -> Task {
        Task {
            process: process.to_string(),
            args,
        }
    }

    #[test]
    fn all_collects_data_and_errors() {
        setup();
        let results = run_tasks(
            vec![
                task("tests.collective.ok", vec![json!(1)]),
                task("tests.collective.fail", vec![]),
            ],
            &ShareData::default(),
            Policy::All,
        );
        assert_eq!(results[0], json!({"data": 1, "index": 0}));
        assert_eq!(results[1], json!({"error": "boom", "index": 1}));
    }

    #[test]
    fn any_cancels_the_slow_task() {
        setup();
        let start = std::time::Instant::now();
        let results = run_tasks(
            vec![
                task("tests.collective.slow", vec![]),
                task("tests.collective.ok", vec![json!("fast")]),
            ],
            &ShareData::default(),
            Policy::FirstSuccess,
        );
        assert_eq!(results[1], json!({"data": "fast", "index": 1}));
        assert_eq!(results[0], json!({"error": "cancelled", "index": 0}));
        // the slow task runs for ~1s uncancelled; winning early proves it
        // was interrupted
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[test]
    fn race_settles_on_first_completion_even_an_error() {
        setup();
        let results = run_tasks(
            vec![
                task("tests.collective.slow", vec![]),
                task("tests.collective.fail", vec![]),
            ],
            &ShareData::default(),
            Policy::FirstDone,
        );
        assert_eq!(results[1], json!({"error": "boom", "index": 1}));
        assert_eq!(results[0], json!({"error": "cancelled", "index": 0}));
    }
}
