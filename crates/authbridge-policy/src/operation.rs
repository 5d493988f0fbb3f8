//! What a request asks the upstream to do.
//!
//! MCP traffic is JSON-RPC, so a body with a `method` member is read as one call (or a
//! batch of calls). Everything else is an opaque HTTP operation.

use http::Method;
use serde_json::Value;

/// Separator between a gateway target name and the tool name, as in `target___tool`.
const TARGET_SEPARATOR: &str = "___";

/// One JSON-RPC call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub id: Option<Value>,
    /// For `tools/call`, the tool name with any target prefix removed.
    pub tool: Option<String>,
}

impl RpcCall {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let method = object.get("method")?.as_str()?.to_string();
        let id = object.get("id").cloned();

        let tool = if method == "tools/call" {
            object
                .get("params")
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .map(base_tool_name)
        } else {
            None
        };

        Some(Self { method, id, tool })
    }
}

/// The operation a request performs.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub http_method: Method,
    pub path: String,
    /// JSON-RPC calls in the body. Empty for non-RPC requests.
    pub calls: Vec<RpcCall>,
}

impl Operation {
    pub fn from_request(method: &Method, path: &str, body: &[u8]) -> Self {
        let calls = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(items)) => items.iter().filter_map(RpcCall::from_value).collect(),
            Ok(value) => RpcCall::from_value(&value).into_iter().collect(),
            Err(_) => Vec::new(),
        };

        Self {
            http_method: method.clone(),
            path: path.to_string(),
            calls,
        }
    }

    /// An operation with no body to inspect.
    pub fn opaque(method: &Method, path: &str) -> Self {
        Self::from_request(method, path, &[])
    }

    pub fn is_rpc(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Tool names invoked through `tools/call`.
    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.calls.iter().filter_map(|c| c.tool.as_deref())
    }

    /// First RPC method, for logs.
    pub fn rpc_method(&self) -> Option<&str> {
        self.calls.first().map(|c| c.method.as_str())
    }
}

/// `mcp-server-target___admin_action` → `admin_action`.
pub fn base_tool_name(name: &str) -> String {
    name.rsplit(TARGET_SEPARATOR)
        .next()
        .unwrap_or(name)
        .to_string()
}
