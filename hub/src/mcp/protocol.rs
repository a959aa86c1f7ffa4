//! Line-delimited JSON-RPC 2.0 framing for MCP stdio transports
//!
//! Outbound messages are serialized to a single line (no embedded newlines,
//! `serde_json` never emits them). Inbound lines are classified into responses,
//! notifications and server-initiated requests.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::types::ServerInfo;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Versions accepted in the server's `initialize` response
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18", "2025-11-25"];

/// JSON-RPC "method not found"
pub const METHOD_NOT_FOUND: i64 = -32601;

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const ROOTS_LIST: &str = "roots/list";
    pub const PING: &str = "ping";
}

#[derive(Serialize)]
struct OutboundRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct OutboundNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A classified inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to a request this client issued
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// Fire-and-forget message from the server
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Request from the server that expects an answer (e.g. `roots/list`)
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
}

pub fn encode_request(id: u64, method: &str, params: Option<&Value>) -> serde_json::Result<String> {
    serde_json::to_string(&OutboundRequest {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    })
}

pub fn encode_notification(method: &str, params: Option<&Value>) -> serde_json::Result<String> {
    serde_json::to_string(&OutboundNotification {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
    })
}

/// Success reply to a server-initiated request
pub fn encode_result(id: &Value, result: Value) -> String {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }).to_string()
}

/// Error reply to a server-initiated request
pub fn encode_error(id: &Value, error: &RpcError) -> String {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }).to_string()
}

/// Classify one inbound line. The error string describes the violation.
pub fn parse_inbound(line: &str) -> Result<Inbound, String> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON ({}): {}", e, preview(line)))?;

    let Value::Object(mut obj) = value else {
        return Err(format!("message is not a JSON object: {}", preview(line)));
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => return Err(format!("unsupported jsonrpc version {}", other)),
        None => return Err("missing jsonrpc field".to_string()),
    }

    let id = obj.remove("id").filter(|v| !v.is_null());
    let method = obj.remove("method");

    match (method, id) {
        (Some(Value::String(method)), Some(id)) => Ok(Inbound::Request {
            id,
            method,
            params: obj.remove("params"),
        }),
        (Some(Value::String(method)), None) => Ok(Inbound::Notification {
            method,
            params: obj.remove("params"),
        }),
        (Some(other), _) => Err(format!("method must be a string, got {}", other)),
        (None, Some(id)) => {
            let id = id
                .as_u64()
                .ok_or_else(|| format!("response id {} was not issued by this client", id))?;
            parse_outcome(&mut obj).map(|outcome| Inbound::Response { id, outcome })
        }
        (None, None) => match obj.get("error") {
            Some(error) => Err(format!("error response without request id: {}", error)),
            None => Err("message has neither method nor id".to_string()),
        },
    }
}

fn parse_outcome(obj: &mut Map<String, Value>) -> Result<Result<Value, RpcError>, String> {
    if let Some(error) = obj.remove("error") {
        let error: RpcError =
            serde_json::from_value(error).map_err(|e| format!("malformed error object: {}", e))?;
        return Ok(Err(error));
    }
    match obj.remove("result") {
        Some(result) => Ok(Ok(result)),
        None => Err("response carries neither result nor error".to_string()),
    }
}

/// `initialize` result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: ServerInfo,
}

/// One page of a `tools/list` result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsPage {
    #[serde(default)]
    pub tools: Vec<WireTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A tool as advertised on the wire
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

fn preview(line: &str) -> String {
    if line.len() > 120 {
        let mut end = 120;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &line[..end])
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_single_line() {
        let params = json!({"name": "echo", "arguments": {"text": "a\nb"}});
        let line = encode_request(7, methods::TOOLS_CALL, Some(&params)).unwrap();
        assert!(!line.contains('\n'));
        let back: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(back["jsonrpc"], "2.0");
        assert_eq!(back["id"], 7);
        assert_eq!(back["method"], "tools/call");
        assert_eq!(back["params"]["arguments"]["text"], "a\nb");
    }

    #[test]
    fn test_encode_notification_has_no_id() {
        let line = encode_notification(methods::INITIALIZED, None).unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    }

    #[test]
    fn test_parse_result_response() {
        let msg = parse_inbound(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Response {
                id: 3,
                outcome: Ok(json!({"ok": true}))
            }
        );
    }

    #[test]
    fn test_parse_null_result_is_success() {
        let msg = parse_inbound(r#"{"jsonrpc":"2.0","id":4,"result":null}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Response {
                id: 4,
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn test_parse_error_response() {
        let msg = parse_inbound(
            r#"{"jsonrpc":"2.0","id":5,"error":{"code":-32602,"message":"bad params"}}"#,
        )
        .unwrap();
        let Inbound::Response { id, outcome } = msg else {
            panic!("expected response");
        };
        assert_eq!(id, 5);
        let err = outcome.unwrap_err();
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "bad params");
    }

    #[test]
    fn test_parse_notification_and_server_request() {
        let note = parse_inbound(r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#)
            .unwrap();
        assert!(matches!(note, Inbound::Notification { ref method, .. } if method == methods::TOOLS_LIST_CHANGED));

        let req = parse_inbound(r#"{"jsonrpc":"2.0","id":"srv-1","method":"roots/list"}"#).unwrap();
        assert_eq!(
            req,
            Inbound::Request {
                id: json!("srv-1"),
                method: "roots/list".to_string(),
                params: None
            }
        );
    }

    #[test]
    fn test_parse_violations() {
        assert!(parse_inbound("not json").is_err());
        assert!(parse_inbound("[1,2]").is_err());
        assert!(parse_inbound(r#"{"id":1,"result":{}}"#).is_err());
        assert!(parse_inbound(r#"{"jsonrpc":"1.0","id":1,"result":{}}"#).is_err());
        assert!(parse_inbound(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
        assert!(parse_inbound(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#).is_err());
        assert!(parse_inbound(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse"}}"#).is_err());
    }

    #[test]
    fn test_encode_replies() {
        let ok: Value = serde_json::from_str(&encode_result(&json!(9), json!({}))).unwrap();
        assert_eq!(ok["id"], 9);
        assert_eq!(ok["result"], json!({}));

        let err = RpcError {
            code: METHOD_NOT_FOUND,
            message: "Method not found: sampling/createMessage".into(),
            data: None,
        };
        let line: Value = serde_json::from_str(&encode_error(&json!("x"), &err)).unwrap();
        assert_eq!(line["error"]["code"], METHOD_NOT_FOUND);
        assert!(line["error"].get("data").is_none());
    }
}
