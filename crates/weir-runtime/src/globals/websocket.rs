//! The `WebSocket` constructor.
//!
//! Opens an outbound client connection and dispatches lifecycle events to
//! named processes: `onConnected`, `onData`, `onClosed`, `onError`.
//! Reconnection count, backoff and ping cadence come from the options
//! object.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use rquickjs::class::Trace;
use rquickjs::{Class, Ctx, JsLifetime, Value};
use serde_json::json;
use tracing::warn;

use weir_process::Context as ProcessContext;
use weir_web::{WsClient, WsClientConfig, WsEvents};

use crate::bridge::{self, share_from_context};

/// Event fan-out to the process bus, running on the connection thread.
struct ProcessEvents {
    sid: String,
    on_connected: Option<String>,
    on_data: Option<String>,
    on_closed: Option<String>,
    on_error: Option<String>,
}

impl ProcessEvents {
    fn dispatch(&self, name: &Option<String>, args: Vec<serde_json::Value>) {
        let Some(name) = name else { return };
        let context = ProcessContext::with_sid(&self.sid);
        if let Err(e) = weir_process::run(name, args, context) {
            warn!(target: "weir", process = %name, error = %e, "websocket event handler failed");
        }
    }
}

impl WsEvents for ProcessEvents {
    fn on_connected(&self) {
        self.dispatch(&self.on_connected, vec![]);
    }

    fn on_data(&self, data: String) {
        self.dispatch(&self.on_data, vec![json!(data)]);
    }

    fn on_closed(&self) {
        self.dispatch(&self.on_closed, vec![]);
    }

    fn on_error(&self, message: &str) {
        self.dispatch(&self.on_error, vec![json!(message)]);
    }
}

#[rquickjs::class(rename = "WebSocket")]
#[derive(Trace, JsLifetime)]
pub struct WebSocket {
    #[qjs(skip_trace)]
    config: WsClientConfig,
    #[qjs(skip_trace)]
    events: RefCell<ProcessEvents>,
    #[qjs(skip_trace)]
    client: Rc<RefCell<Option<WsClient>>>,
}

fn opt_string(options: &serde_json::Value, key: &str) -> Option<String> {
    options.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn opt_u64(options: &serde_json::Value, key: &str) -> Option<u64> {
    options.get(key).and_then(|v| v.as_u64())
}

#[rquickjs::methods]
impl WebSocket {
    /// `new WebSocket(url)` or `new WebSocket({url, protocols, timeout,
    /// ping, attempts, backoff, onConnected, onData, onClosed, onError})`.
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, options: Value<'_>) -> rquickjs::Result<Self> {
        let options = bridge::unmarshal(&options)
            .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string()))?
            .to_json();

        let mut config = WsClientConfig::default();
        let events;
        let sid = share_from_context(&ctx).sid;

        match &options {
            serde_json::Value::String(url) => {
                config.url = url.clone();
                events = ProcessEvents {
                    sid,
                    on_connected: None,
                    on_data: None,
                    on_closed: None,
                    on_error: None,
                };
            }
            serde_json::Value::Object(_) => {
                config.url = opt_string(&options, "url").unwrap_or_default();
                if let Some(protocols) = options.get("protocols").and_then(|v| v.as_array()) {
                    config.protocols = protocols
                        .iter()
                        .filter_map(|p| p.as_str().map(String::from))
                        .collect();
                }
                if let Some(timeout) = opt_u64(&options, "timeout") {
                    config.timeout = Duration::from_millis(timeout);
                }
                if let Some(ping) = opt_u64(&options, "ping") {
                    config.ping_interval = Duration::from_millis(ping);
                }
                if let Some(attempts) = opt_u64(&options, "attempts") {
                    config.max_reconnect = attempts as u32;
                }
                if let Some(backoff) = opt_u64(&options, "backoff") {
                    config.reconnect_backoff = Duration::from_millis(backoff);
                }
                events = ProcessEvents {
                    sid,
                    on_connected: opt_string(&options, "onConnected"),
                    on_data: opt_string(&options, "onData"),
                    on_closed: opt_string(&options, "onClosed"),
                    on_error: opt_string(&options, "onError"),
                };
            }
            _ => {
                return Err(rquickjs::Exception::throw_type(
                    &ctx,
                    "WebSocket expects a url or an options object",
                ));
            }
        }

        if config.url.is_empty() {
            return Err(rquickjs::Exception::throw_type(&ctx, "url is required"));
        }

        Ok(Self {
            config,
            events: RefCell::new(events),
            client: Rc::new(RefCell::new(None)),
        })
    }

    /// Open the connection; events start flowing to the named processes.
    #[qjs(rename = "Open")]
    pub fn open(&self, ctx: Ctx<'_>) -> rquickjs::Result<()> {
        if self.client.borrow().is_some() {
            return Ok(());
        }
        let events = {
            let current = self.events.borrow();
            Arc::new(ProcessEvents {
                sid: current.sid.clone(),
                on_connected: current.on_connected.clone(),
                on_data: current.on_data.clone(),
                on_closed: current.on_closed.clone(),
                on_error: current.on_error.clone(),
            })
        };
        let client = WsClient::connect(self.config.clone(), events)
            .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string()))?;
        *self.client.borrow_mut() = Some(client);
        Ok(())
    }

    /// Send a text frame.
    #[qjs(rename = "Push")]
    pub fn push(&self, ctx: Ctx<'_>, data: String) -> rquickjs::Result<()> {
        match self.client.borrow().as_ref() {
            Some(client) => client
                .push(data)
                .map_err(|e| rquickjs::Exception::throw_message(&ctx, &e.to_string())),
            None => Err(rquickjs::Exception::throw_message(
                &ctx,
                "connection is not open",
            )),
        }
    }

    #[qjs(rename = "Close")]
    pub fn close(&self) {
        if let Some(mut client) = self.client.borrow_mut().take() {
            client.close();
        }
    }
}

pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    Class::<WebSocket>::define(&ctx.globals())
}
