//! `http` global: a blocking HTTP client for scripts.
//!
//! Responses come back as `{status, headers, data}`; JSON bodies are
//! parsed, everything else is returned as text. Engine workers are plain
//! OS threads, so a blocking client is the right shape here.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use rquickjs::{Ctx, Function, Object};
use serde_json::json;

use crate::globals::{arg_json, arg_string, coerce, json_value};

static CLIENT: Lazy<reqwest::blocking::Client> = Lazy::new(|| {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
});

fn query_pairs(params: &serde_json::Value) -> Vec<(String, String)> {
    match params {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn send(
    method: &str,
    url: &str,
    payload: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
    headers: Option<serde_json::Value>,
) -> serde_json::Value {
    let method = match reqwest::Method::from_bytes(method.to_uppercase().as_bytes()) {
        Ok(m) => m,
        Err(_) => return json!({"status": 0, "error": format!("invalid method {method}")}),
    };

    let mut request = CLIENT.request(method, url);
    if let Some(params) = params {
        request = request.query(&query_pairs(&params));
    }
    if let Some(serde_json::Value::Object(headers)) = headers {
        for (k, v) in headers {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            request = request.header(k, value);
        }
    }
    if let Some(payload) = payload {
        request = request.json(&payload);
    }

    match request.send() {
        Ok(response) => {
            let status = response.status().as_u16();
            let mut headers = HashMap::new();
            for (name, value) in response.headers() {
                if let Ok(v) = value.to_str() {
                    headers.insert(name.as_str().to_string(), v.to_string());
                }
            }
            let is_json = headers
                .get("content-type")
                .is_some_and(|t| t.contains("json"));
            let body = response.text().unwrap_or_default();
            let data = if is_json {
                serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
            } else {
                serde_json::Value::String(body)
            };
            json!({"status": status, "headers": headers, "data": data})
        }
        Err(e) => json!({"status": 0, "error": e.to_string()}),
    }
}

/// `http.Get(url, params?, headers?)` and friends without a body.
fn bodyless<'js>(ctx: &Ctx<'js>, method: &'static str) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        coerce(move |ctx, args| {
            let url = arg_string(&ctx, &args, 0)?;
            let response = send(method, &url, None, arg_json(&args, 1), arg_json(&args, 2));
            json_value(&ctx, response)
        }),
    )
}

/// `http.Post(url, payload?, headers?)` and friends with a body.
fn bodied<'js>(ctx: &Ctx<'js>, method: &'static str) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        coerce(move |ctx, args| {
            let url = arg_string(&ctx, &args, 0)?;
            let response = send(method, &url, arg_json(&args, 1), None, arg_json(&args, 2));
            json_value(&ctx, response)
        }),
    )
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let http = Object::new(ctx.clone())?;

    http.set("Get", bodyless(ctx, "GET")?)?;
    http.set("Head", bodyless(ctx, "HEAD")?)?;
    http.set("Delete", bodyless(ctx, "DELETE")?)?;
    http.set("Post", bodied(ctx, "POST")?)?;
    http.set("Put", bodied(ctx, "PUT")?)?;
    http.set("Patch", bodied(ctx, "PATCH")?)?;

    // http.Send(method, url, payload?, params?, headers?)
    http.set(
        "Send",
        Function::new(
            ctx.clone(),
            coerce(|ctx, args| {
                let method = arg_string(&ctx, &args, 0)?;
                let url = arg_string(&ctx, &args, 1)?;
                let response = send(
                    &method,
                    &url,
                    arg_json(&args, 2),
                    arg_json(&args, 3),
                    arg_json(&args, 4),
                );
                json_value(&ctx, response)
            }),
        )?,
    )?;

    ctx.globals().set("http", http)
}
