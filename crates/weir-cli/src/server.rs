//! HTTP server wiring the router to the process bus.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use weir_process::{CancelToken, Context as ProcessContext, Exception};
use weir_web::{Router, WebError};

use crate::app::App;

pub async fn serve(app: App) -> Result<()> {
    let addr: SocketAddr = app
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", app.listen))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(target: "weir", %addr, "listening");

    let router = app.router.clone();
    loop {
        let (stream, _peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let router = router.clone();

        tokio::spawn(async move {
            let service = service_fn(move |request| handle(router.clone(), request));
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                debug!(target: "weir", error = %e, "connection error");
            }
        });
    }
}

async fn handle(
    router: Arc<Router>,
    request: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let query = parse_query(request.uri().query().unwrap_or(""));
    let mut headers = HashMap::new();
    for (name, value) in request.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }
    let sid = headers.get("x-session-id").cloned().unwrap_or_default();

    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(target: "weir", error = %e, "body read failed");
            return Ok(error_response(400, "invalid request body"));
        }
    };
    let payload = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    let web_request = weir_web::Request {
        method: method.clone(),
        path: path.clone(),
        params: HashMap::new(),
        query,
        headers,
        payload,
        sid,
    };

    // the blocking section: route, guard, invoke the process
    let response = tokio::task::spawn_blocking(move || dispatch(&router, web_request)).await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            error!(target: "weir", error = %e, "handler task failed");
            return Ok(error_response(500, "internal error"));
        }
    };

    Ok(render(response))
}

fn dispatch(
    router: &Router,
    mut request: weir_web::Request,
) -> std::result::Result<weir_web::Response, (u16, String)> {
    let matched = router
        .find_handler(&request.method, &request.path)
        .map_err(|e| match e {
            WebError::NotFound(..) => (404, e.to_string()),
            other => (500, other.to_string()),
        })?;
    request.params = matched.params.clone();

    let mut context = ProcessContext::with_sid(&request.sid);
    context.cancel = CancelToken::new();

    if let Some(guard) = matched.path.effective_guard(&matched.api.guard) {
        match weir_web::run_guard(guard, &request) {
            Ok(authorized) => context.authorized = authorized,
            Err(e) => return Err((403, e.to_string())),
        }
    }

    let args = matched.path.resolve_args(&request);
    let result = weir_process::run(&matched.path.process, args, context);

    match result {
        Ok(body) => {
            let out = &matched.path.out;
            if let Some(redirect) = &out.redirect {
                return Ok(weir_web::Response {
                    status: redirect.code,
                    content_type: "text/plain".to_string(),
                    headers: HashMap::from([(
                        "location".to_string(),
                        redirect.location.clone(),
                    )]),
                    body: serde_json::Value::Null,
                });
            }
            Ok(weir_web::Response {
                status: out.status,
                content_type: if out.content_type.is_empty() {
                    "application/json".to_string()
                } else {
                    out.content_type.clone()
                },
                headers: out.headers.clone(),
                body: out.body.clone().unwrap_or(body),
            })
        }
        Err(Exception { code, message }) => {
            let status = if (100..=599).contains(&code) { code as u16 } else { 500 };
            Err((status, message))
        }
    }
}

fn render(
    result: std::result::Result<weir_web::Response, (u16, String)>,
) -> Response<Full<Bytes>> {
    match result {
        Ok(response) => {
            let body = serde_json::to_vec(&response.body).unwrap_or_default();
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK))
                .header("content-type", response.content_type);
            for (k, v) in response.headers {
                builder = builder.header(k, v);
            }
            builder
                .body(Full::new(Bytes::from(body)))
                .unwrap_or_else(|_| error_response(500, "response build failed"))
        }
        Err((status, message)) => error_response(status, &message),
    }
}

fn error_response(status: u16, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({"code": status, "message": message});
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn parse_query(raw: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        out.entry(k.to_string()).or_default().push(v.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing() {
        let q = parse_query("a=1&b=2&a=3&flag");
        assert_eq!(q["a"], vec!["1", "3"]);
        assert_eq!(q["b"], vec!["2"]);
        assert_eq!(q["flag"], vec![""]);
    }
}
