//! Outbound WebSocket client.
//!
//! Backs the script `WebSocket` constructor: opens a client connection,
//! reports lifecycle events to a handler, reconnects a configurable number
//! of times with linear backoff, and emits periodic ping frames. The
//! connection runs on its own thread with a private single-threaded tokio
//! runtime so it can be driven from engine worker threads.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::{WebError, WebResult};

/// Connection settings for a client socket.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    pub url: String,
    /// Values for the `Sec-WebSocket-Protocol` header.
    pub protocols: Vec<String>,
    /// Connect timeout per attempt.
    pub timeout: Duration,
    /// Interval between ping frames; zero disables pings.
    pub ping_interval: Duration,
    /// Reconnection attempts after a dropped connection; zero disables
    /// reconnection.
    pub max_reconnect: u32,
    /// Base backoff; attempt `n` waits `backoff * n`.
    pub reconnect_backoff: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocols: Vec::new(),
            timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            max_reconnect: 0,
            reconnect_backoff: Duration::from_millis(200),
        }
    }
}

/// Lifecycle callbacks, dispatched from the connection thread.
pub trait WsEvents: Send + Sync + 'static {
    fn on_connected(&self) {}
    fn on_data(&self, _data: String) {}
    fn on_closed(&self) {}
    fn on_error(&self, _message: &str) {}
}

enum Command {
    Send(String),
    Close,
}

/// Handle to a running client connection.
pub struct WsClient {
    cmd_tx: UnboundedSender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient").finish_non_exhaustive()
    }
}

impl WsClient {
    /// Connect and start the event loop. Returns immediately; connection
    /// progress is reported through `events`.
    pub fn connect(config: WsClientConfig, events: Arc<dyn WsEvents>) -> WebResult<Self> {
        if config.url.is_empty() {
            return Err(WebError::WebSocket("url is required".to_string()));
        }

        let (cmd_tx, cmd_rx) = unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("weir-ws".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        events.on_error(&format!("runtime: {e}"));
                        return;
                    }
                };
                rt.block_on(client_loop(config, events, cmd_rx));
            })
            .map_err(|e| WebError::WebSocket(e.to_string()))?;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    /// Queue a text frame for sending.
    pub fn push(&self, data: impl Into<String>) -> WebResult<()> {
        self.cmd_tx
            .send(Command::Send(data.into()))
            .map_err(|_| WebError::WebSocket("connection closed".to_string()))
    }

    /// Close the connection and join the worker thread.
    pub fn close(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

async fn client_loop(
    config: WsClientConfig,
    events: Arc<dyn WsEvents>,
    mut cmd_rx: UnboundedReceiver<Command>,
) {
    let mut attempt: u32 = 0;

    loop {
        let request = match make_request(&config) {
            Ok(request) => request,
            Err(e) => {
                events.on_error(&e.to_string());
                return;
            }
        };

        let connected =
            match tokio::time::timeout(config.timeout, connect_async(request)).await {
                Ok(Ok((stream, _response))) => Some(stream),
                Ok(Err(e)) => {
                    events.on_error(&e.to_string());
                    None
                }
                Err(_) => {
                    events.on_error("connect timeout");
                    None
                }
            };

        if let Some(stream) = connected {
            attempt = 0;
            events.on_connected();
            debug!(target: "weir", url = %config.url, "websocket connected");

            let (mut write, mut read) = stream.split();
            let mut ping = tokio::time::interval(if config.ping_interval.is_zero() {
                Duration::from_secs(3600)
            } else {
                config.ping_interval
            });
            ping.tick().await; // first tick fires immediately; skip it

            let closed_by_us = loop {
                tokio::select! {
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => events.on_data(text.to_string()),
                        Some(Ok(Message::Binary(data))) => {
                            events.on_data(String::from_utf8_lossy(&data).to_string())
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break false,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            events.on_error(&e.to_string());
                            break false;
                        }
                    },
                    command = cmd_rx.recv() => match command {
                        Some(Command::Send(text)) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                events.on_error(&e.to_string());
                            }
                        }
                        Some(Command::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            break true;
                        }
                    },
                    _ = ping.tick(), if !config.ping_interval.is_zero() => {
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            warn!(target: "weir", error = %e, "websocket ping failed");
                        }
                    }
                }
            };

            events.on_closed();
            if closed_by_us {
                return;
            }
        }

        attempt += 1;
        if attempt > config.max_reconnect {
            return;
        }
        tokio::time::sleep(config.reconnect_backoff * attempt).await;
        debug!(target: "weir", attempt, "websocket reconnecting");
    }
}

fn make_request(
    config: &WsClientConfig,
) -> WebResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| WebError::WebSocket(e.to_string()))?;

    if !config.protocols.is_empty() {
        let value = config.protocols.join(", ");
        let value = http::header::HeaderValue::from_str(&value)
            .map_err(|e| WebError::WebSocket(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", value);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_rejected() {
        struct Nop;
        impl WsEvents for Nop {}

        let err = WsClient::connect(WsClientConfig::default(), Arc::new(Nop)).unwrap_err();
        assert!(matches!(err, WebError::WebSocket(_)));
    }

    #[test]
    fn request_carries_protocol_header() {
        let config = WsClientConfig {
            url: "ws://127.0.0.1:1/sock".into(),
            protocols: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let request = make_request(&config).unwrap();
        assert_eq!(
            request
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok()),
            Some("a, b")
        );
    }
}
