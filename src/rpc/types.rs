//! JSON-RPC message types
//!
//! Only the handful of shapes the smoke scenario needs. Replies are kept as
//! raw `serde_json::Value` and inspected leniently.

use serde::Serialize;
use serde_json::Value;

/// Fixed `jsonrpc` tag
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// Outbound messages
// ============================================================================

/// A request expecting exactly one reply
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: i64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }

    /// `initialize` with the fixed protocol version
    pub fn initialize(id: i64, client: Implementation) -> Self {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: client,
        };
        // InitializeParams only holds strings and maps, to_value cannot fail
        let params = serde_json::to_value(params).unwrap_or_default();
        Self::new(id, "initialize", params)
    }

    pub fn list_tools(id: i64) -> Self {
        Self::new(id, "tools/list", Value::Object(Default::default()))
    }

    pub fn list_resources(id: i64) -> Self {
        Self::new(id, "resources/list", Value::Object(Default::default()))
    }
}

/// A one-way message, no `id` and no reply
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params: None,
        }
    }

    pub fn initialized() -> Self {
        Self::new("notifications/initialized")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

/// Capabilities declared by the harness
#[derive(Debug, Clone, Serialize)]
pub struct ClientCapabilities {
    pub roots: RootsCapability,
    pub sampling: Value,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            roots: RootsCapability { list_changed: true },
            sampling: Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    pub list_changed: bool,
}

/// Client identity (`clientInfo`)
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

// ============================================================================
// Inbound inspection
// ============================================================================

/// A tool or resource entry from a listing reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Descriptor {
    /// Lenient conversion: non-object entries and non-string fields become `None`
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            name: field("name"),
            description: field("description"),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    pub fn display_description(&self) -> &str {
        self.description.as_deref().unwrap_or("No description")
    }
}

/// Extract `result.<key>` as descriptors, empty if the field is absent
pub fn extract_descriptors(reply: &Value, key: &str) -> Vec<Descriptor> {
    reply
        .get("result")
        .and_then(|result| result.get(key))
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(Descriptor::from_value).collect())
        .unwrap_or_default()
}

/// The `error` member of a reply, if any
pub fn reply_error(reply: &Value) -> Option<&Value> {
    reply.get("error").filter(|e| !e.is_null())
}
