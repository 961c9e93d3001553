//! Built-in `MCP` constructor: a small host-object client used as the
//! reference for the constructor/registry/release machinery.
//!
//! `new`-less usage: `const c = MCP("echo"); c.Call("echo", "hi");
//! c.Release();` or wrapped in `Use(MCP, ["echo"], c => ...)`.

use std::sync::{Arc, Once};

use serde_json::json;

use weir_process::Exception;

use crate::bridge::{HostObject, register_constructor};

pub struct McpClient {
    target: String,
}

impl HostObject for McpClient {
    fn kind(&self) -> &str {
        "mcp"
    }

    fn call(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, Exception> {
        match method {
            "echo" => Ok(args
                .into_iter()
                .next()
                .unwrap_or_else(|| json!(self.target.clone()))),
            "ping" => Ok(json!("pong")),
            "target" => Ok(json!(self.target.clone())),
            other => Err(Exception::not_found(format!("mcp method {other}"))),
        }
    }
}

static REGISTER: Once = Once::new();

/// Register the MCP constructor into the global constructor table. Safe to
/// call repeatedly.
pub fn register_builtin() {
    REGISTER.call_once(|| {
        register_constructor("MCP", |args| {
            let target = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or("default")
                .to_string();
            Ok(Arc::new(McpClient { target }) as Arc<dyn HostObject>)
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_and_ping() {
        let client = McpClient {
            target: "echo".into(),
        };
        assert_eq!(client.call("ping", vec![]).unwrap(), json!("pong"));
        assert_eq!(client.call("echo", vec![json!("hi")]).unwrap(), json!("hi"));
        assert_eq!(client.call("echo", vec![]).unwrap(), json!("echo"));
        assert_eq!(client.call("nope", vec![]).unwrap_err().code, 404);
    }
}
