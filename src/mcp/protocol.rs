//! Purpose: JSON-RPC 2.0 envelopes and MCP result shapes shared by every transport.
//! Exports: `JsonRpcId`, `JsonRpcRequest`, `JsonRpcResponse`, `JsonRpcError`, error codes,
//! `ToolDescriptor`, `CallToolResult`, `InitializeResult`, `parse_jsonrpc_request`.
//! Role: Wire-level types; no routing, no I/O.
//! Invariants: A response carries exactly one of `result` / `error`.
//! Invariants: Request ids are echoed unchanged (strings, any JSON number, or null).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

pub const JSON_RPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const PARSE_ERROR_CODE: i32 = -32700;
pub const INVALID_REQUEST_CODE: i32 = -32600;
pub const METHOD_NOT_FOUND_CODE: i32 = -32601;
pub const INVALID_PARAMS_CODE: i32 = -32602;
pub const INTERNAL_ERROR_CODE: i32 = -32603;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    String(String),
    Number(Number),
    Null,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id on the `notifications/` namespace expect no reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.starts_with("notifications/")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_result(id: JsonRpcId, result: Result<Value, JsonRpcError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(error) => Self::error(id, error),
        }
    }

    /// Compact single-line encoding used by the TCP and SSE transports.
    pub fn to_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{{\"code\":{INTERNAL_ERROR_CODE},\"message\":\"failed to encode response\"}}}}"
            )
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR_CODE, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST_CODE, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND_CODE, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS_CODE, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR_CODE, message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

impl Default for ServerMetadata {
    fn default() -> Self {
        Self {
            name: "codebridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
    pub resources: ResourcesCapability,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesCapability {
    pub subscribe: bool,
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl InitializeResult {
    pub fn for_server(metadata: &ServerMetadata) -> Self {
        Self {
            protocol_version: metadata.protocol_version.clone(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
                resources: ResourcesCapability {
                    subscribe: false,
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: metadata.name.clone(),
                version: metadata.version.clone(),
            },
        }
    }
}

/// Public half of a registered tool, serialized verbatim by `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(rename = "outputSchema")]
    pub output_schema: Value,
    pub annotations: ToolAnnotations,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    #[serde(rename = "readOnlyHint")]
    pub read_only_hint: bool,
    #[serde(rename = "destructiveHint", default, skip_serializing_if = "is_false")]
    pub destructive_hint: bool,
    #[serde(rename = "openWorldHint", default, skip_serializing_if = "is_false")]
    pub open_world_hint: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(rename = "structuredContent")]
    pub structured_content: Value,
    pub content: Vec<Value>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn from_structured(result: Value) -> Self {
        let text = result.to_string();
        Self {
            structured_content: result,
            content: vec![json!({
                "type": "text",
                "text": text,
            })],
            is_error: false,
        }
    }
}

/// Decode one raw line. Invalid UTF-8 is a parse error, like any other malformed JSON.
pub fn parse_jsonrpc_line(line: &[u8]) -> Result<Value, JsonRpcError> {
    serde_json::from_slice::<Value>(line)
        .map_err(|err| JsonRpcError::parse_error(format!("Parse error: {err}")))
}

/// Validate the envelope shape. Failures come back as ready-to-send error responses.
pub fn parse_jsonrpc_request(value: Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let mut object = match value {
        Value::Object(object) => object,
        _ => {
            return Err(JsonRpcResponse::error(
                JsonRpcId::Null,
                JsonRpcError::invalid_request("Invalid Request: expected a JSON object"),
            ));
        }
    };

    let mut id: Option<JsonRpcId> = None;
    if let Some(raw_id) = object.remove("id") {
        let parsed_id = parse_jsonrpc_id(raw_id)
            .map_err(|error| JsonRpcResponse::error(JsonRpcId::Null, error))?;
        id = Some(parsed_id);
    }
    let error_id = id.clone().unwrap_or(JsonRpcId::Null);

    let jsonrpc = match object.remove("jsonrpc") {
        Some(Value::String(version)) if version == JSON_RPC_VERSION => version,
        _ => {
            return Err(JsonRpcResponse::error(
                error_id,
                JsonRpcError::invalid_request("Invalid Request: jsonrpc must be \"2.0\""),
            ));
        }
    };

    let method = match object.remove("method") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(method)) => method,
        Some(_) => {
            return Err(JsonRpcResponse::error(
                error_id,
                JsonRpcError::invalid_request("Invalid Request: method must be a string"),
            ));
        }
    };

    let params = object.remove("params");
    Ok(JsonRpcRequest {
        jsonrpc,
        id,
        method,
        params,
    })
}

fn parse_jsonrpc_id(value: Value) -> Result<JsonRpcId, JsonRpcError> {
    match value {
        Value::String(value) => Ok(JsonRpcId::String(value)),
        Value::Number(value) => Ok(JsonRpcId::Number(value)),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err(JsonRpcError::invalid_request(
            "Invalid Request: id must be a string, number, or null",
        )),
    }
}

/// Params as an object; absent or null params read as an empty object.
pub fn params_object(params: Option<&Value>) -> Result<Map<String, Value>, JsonRpcError> {
    match params {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(JsonRpcError::invalid_params(
            "params must be an object when provided",
        )),
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_echo_unchanged() {
        for raw in [json!("abc"), json!(7), json!(2.5), json!(-1), Value::Null] {
            let request = parse_jsonrpc_request(json!({
                "jsonrpc": "2.0",
                "id": raw.clone(),
                "method": "ping",
            }))
            .expect("valid request");
            let response = JsonRpcResponse::success(request.id.expect("id"), json!({}));
            let encoded: Value =
                serde_json::from_str(&response.to_compact_json()).expect("json");
            assert_eq!(encoded["id"], raw);
        }
    }

    #[test]
    fn numeric_ids_keep_their_original_text() {
        for raw in ["7", "1.0", "1e3", "-12.50", "123456789012345678901234567890"] {
            let line = format!(r#"{{"jsonrpc":"2.0","id":{raw},"method":"ping"}}"#);
            let value = parse_jsonrpc_line(line.as_bytes()).expect("line");
            let request = parse_jsonrpc_request(value).expect("valid request");
            let encoded =
                JsonRpcResponse::success(request.id.expect("id"), json!({})).to_compact_json();
            assert!(encoded.contains(&format!(r#""id":{raw},"#)), "{raw} -> {encoded}");
        }
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let response = parse_jsonrpc_request(json!({
            "jsonrpc": "1.0",
            "id": 3,
            "method": "tools/list",
        }))
        .expect_err("invalid");
        let error = response.error.expect("error");
        assert_eq!(error.code, INVALID_REQUEST_CODE);
        assert_eq!(response.id, JsonRpcId::Number(3.into()));
        assert!(response.result.is_none());
    }

    #[test]
    fn non_object_is_invalid_request_with_null_id() {
        for value in [json!([1, 2]), json!("x"), json!(4)] {
            let response = parse_jsonrpc_request(value).expect_err("invalid");
            assert_eq!(response.id, JsonRpcId::Null);
            assert_eq!(response.error.expect("error").code, INVALID_REQUEST_CODE);
        }
    }

    #[test]
    fn missing_method_parses_as_empty_name() {
        let request = parse_jsonrpc_request(json!({"jsonrpc": "2.0", "id": 1}))
            .expect("envelope ok");
        assert_eq!(request.method, "");
    }

    #[test]
    fn notifications_are_id_less_notifications_namespace() {
        let request = parse_jsonrpc_request(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .expect("valid");
        assert!(request.is_notification());

        let request = parse_jsonrpc_request(json!({"jsonrpc": "2.0", "method": "tools/list"}))
            .expect("valid");
        assert!(!request.is_notification());
    }

    #[test]
    fn call_tool_result_embeds_compact_text() {
        let result = CallToolResult::from_structured(json!({"success": true, "count": 2}));
        let value = serde_json::to_value(&result).expect("encode");
        assert_eq!(value["isError"], json!(false));
        assert_eq!(value["structuredContent"]["count"], json!(2));
        assert_eq!(value["content"][0]["type"], json!("text"));
        let text = value["content"][0]["text"].as_str().expect("text");
        assert!(!text.contains('\n'));
        let reparsed: Value = serde_json::from_str(text).expect("json text");
        assert_eq!(reparsed, value["structuredContent"]);
    }

    #[test]
    fn parse_error_is_minus_32700() {
        let error = parse_jsonrpc_line(b"{not json").expect_err("parse error");
        assert_eq!(error.code, PARSE_ERROR_CODE);
    }
}
