//! Purpose: Route JSON-RPC methods and MCP tool calls to their handlers.
//! Exports: `ProtocolDispatcher`, `ToolRegistry`, `RegisteredTool`, `method_handler`, `tool_handler`.
//! Role: Transport-agnostic core shared by the raw TCP and HTTP/SSE paths.
//! Invariants: Both registries are filled before the dispatcher is shared and never change after.
//! Invariants: Every dispatched request reaches its reply callback exactly once.
//! Invariants: Handler panics are contained here and answered with -32603.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, error};

use super::completion::Completion;
use super::protocol::{
    CallToolResult, InitializeResult, JsonRpcError, JsonRpcId, JsonRpcResponse, ServerMetadata,
    ToolDescriptor, params_object, parse_jsonrpc_request,
};

pub type MethodHandler = Arc<dyn Fn(Option<Value>, Completion) + Send + Sync>;
pub type ToolHandler = Arc<dyn Fn(Map<String, Value>, Completion) + Send + Sync>;

pub fn method_handler<F>(handler: F) -> MethodHandler
where
    F: Fn(Option<Value>, Completion) + Send + Sync + 'static,
{
    Arc::new(handler)
}

pub fn tool_handler<F>(handler: F) -> ToolHandler
where
    F: Fn(Map<String, Value>, Completion) + Send + Sync + 'static,
{
    Arc::new(handler)
}

#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: ToolHandler,
}

/// Ordered, name-indexed tool table. Order is registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: ToolHandler) {
        let name = descriptor.name.clone();
        let tool = RegisteredTool {
            descriptor,
            handler,
        };
        match self.index.get(&name) {
            Some(&idx) => self.tools[idx] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&idx| &self.tools[idx])
    }

    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|tool| &tool.descriptor).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub struct ProtocolDispatcher {
    metadata: ServerMetadata,
    methods: HashMap<String, MethodHandler>,
    tools: Arc<ToolRegistry>,
}

impl ProtocolDispatcher {
    pub fn new(tools: ToolRegistry) -> Self {
        Self::with_metadata(tools, ServerMetadata::default())
    }

    pub fn with_metadata(tools: ToolRegistry, metadata: ServerMetadata) -> Self {
        let mut dispatcher = Self {
            metadata,
            methods: HashMap::new(),
            tools: Arc::new(tools),
        };
        dispatcher.register_builtin_methods();
        dispatcher
    }

    /// Add or replace a method before the dispatcher is shared.
    pub fn with_method(mut self, name: impl Into<String>, handler: MethodHandler) -> Self {
        self.methods.insert(name.into(), handler);
        self
    }

    pub fn metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Validate a decoded JSON value as a JSON-RPC request and dispatch it.
    /// `reply` receives `None` for notifications, which get no response.
    pub fn dispatch_value<F>(&self, value: Value, reply: F)
    where
        F: FnOnce(Option<JsonRpcResponse>) + Send + 'static,
    {
        let request = match parse_jsonrpc_request(value) {
            Ok(request) => request,
            Err(response) => {
                reply(Some(response));
                return;
            }
        };

        if request.is_notification() {
            debug!(method = %request.method, "notification");
            self.dispatch(&request.method, request.params, JsonRpcId::Null, |_| {});
            reply(None);
            return;
        }

        let id = request.id.unwrap_or(JsonRpcId::Null);
        self.dispatch(&request.method, request.params, id, move |response| {
            reply(Some(response))
        });
    }

    pub fn dispatch<F>(&self, method: &str, params: Option<Value>, id: JsonRpcId, reply: F)
    where
        F: FnOnce(JsonRpcResponse) + Send + 'static,
    {
        if method.is_empty() {
            reply(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Invalid Request: method is required"),
            ));
            return;
        }

        let Some(handler) = self.methods.get(method) else {
            debug!(method, "method not found");
            reply(JsonRpcResponse::error(
                id,
                JsonRpcError::method_not_found(format!("Method not found: {method}")),
            ));
            return;
        };

        let completion = Completion::new(move |result| {
            reply(JsonRpcResponse::from_result(id, result));
        });
        let guard = completion.guard();
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(params, completion)));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(method, %message, "method handler panicked");
            guard.complete_if_pending(Err(JsonRpcError::internal_error(message)));
        }
    }

    fn register_builtin_methods(&mut self) {
        let metadata = self.metadata.clone();
        self.methods.insert(
            "initialize".to_string(),
            method_handler(move |_params, completion| {
                let result = InitializeResult::for_server(&metadata);
                match serde_json::to_value(result) {
                    Ok(value) => completion.succeed(value),
                    Err(_) => completion.fail(JsonRpcError::internal_error(
                        "failed to encode initialize result",
                    )),
                }
            }),
        );

        self.methods.insert(
            "ping".to_string(),
            method_handler(|_params, completion| completion.succeed(json!({}))),
        );

        self.methods.insert(
            "notifications/initialized".to_string(),
            method_handler(|_params, completion| completion.succeed(json!({}))),
        );

        let tools_list = tools_list_value(&self.tools);
        self.methods.insert(
            "tools/list".to_string(),
            method_handler(move |_params, completion| completion.succeed(tools_list.clone())),
        );

        let tools = Arc::clone(&self.tools);
        self.methods.insert(
            "tools/call".to_string(),
            method_handler(move |params, completion| call_tool(&tools, params, completion)),
        );

        self.methods.insert(
            "resources/list".to_string(),
            method_handler(|_params, completion| completion.succeed(json!({ "resources": [] }))),
        );
    }
}

fn tools_list_value(tools: &ToolRegistry) -> Value {
    json!({ "tools": tools.descriptors() })
}

fn call_tool(tools: &ToolRegistry, params: Option<Value>, completion: Completion) {
    let params = match params_object(params.as_ref()) {
        Ok(params) => params,
        Err(error) => return completion.fail(error),
    };
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return completion.fail(JsonRpcError::invalid_params(
            "tools/call requires string param `name`",
        ));
    };
    let arguments = match params.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(arguments)) => arguments.clone(),
        Some(_) => {
            return completion.fail(JsonRpcError::invalid_params(
                "tools/call `arguments` must be an object",
            ));
        }
    };
    let Some(tool) = tools.get(name) else {
        return completion.fail(JsonRpcError::method_not_found(format!(
            "Tool not found: {name}"
        )));
    };

    debug!(tool = name, "tools/call");
    let wrapped = completion.map(|result| {
        let result = result?;
        serde_json::to_value(CallToolResult::from_structured(result))
            .map_err(|_| JsonRpcError::internal_error("failed to encode tool result"))
    });
    (tool.handler)(arguments, wrapped);
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{
        INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE, INVALID_REQUEST_CODE, METHOD_NOT_FOUND_CODE,
        ToolAnnotations,
    };
    use std::sync::mpsc;
    use std::time::Duration;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            title: format!("{name} title"),
            description: format!("{name} description"),
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: json!({"type": "object"}),
            annotations: ToolAnnotations {
                read_only_hint: true,
                ..ToolAnnotations::default()
            },
        }
    }

    fn stub_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            descriptor("echo"),
            tool_handler(|arguments, completion| {
                completion.succeed(json!({ "echo": Value::Object(arguments) }))
            }),
        );
        registry.register(
            descriptor("later"),
            tool_handler(|_arguments, completion| {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    completion.succeed(json!({"success": true}));
                });
            }),
        );
        registry.register(
            descriptor("explode"),
            tool_handler(|_arguments, _completion| panic!("tool blew up")),
        );
        registry
    }

    fn dispatch_sync(
        dispatcher: &ProtocolDispatcher,
        method: &str,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch(method, params, JsonRpcId::Number(1.into()), move |response| {
            tx.send(response).expect("send");
        });
        let response = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("response");
        assert!(rx.try_recv().is_err(), "reply fired more than once");
        response
    }

    #[test]
    fn unknown_method_fails_synchronously_once() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch("tools/unknown", None, JsonRpcId::Null, move |response| {
            tx.send(response).expect("send");
        });
        // The reply is already queued when dispatch returns.
        let response = rx.try_recv().expect("synchronous reply");
        assert!(rx.try_recv().is_err());
        let error = response.error.expect("error");
        assert_eq!(error.code, METHOD_NOT_FOUND_CODE);
        assert_eq!(error.message, "Method not found: tools/unknown");
        assert_eq!(response.id, JsonRpcId::Null);
    }

    #[test]
    fn empty_method_is_invalid_request() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let response = dispatch_sync(&dispatcher, "", None);
        let error = response.error.expect("error");
        assert_eq!(error.code, INVALID_REQUEST_CODE);
        assert_eq!(error.message, "Invalid Request: method is required");
    }

    #[test]
    fn initialize_reports_server_info() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let response = dispatch_sync(&dispatcher, "initialize", Some(json!({})));
        let result = response.result.expect("result");
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result["serverInfo"]["name"], json!("codebridge"));
        assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(false));
    }

    #[test]
    fn tools_list_is_stable_across_calls() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let first = dispatch_sync(&dispatcher, "tools/list", None).to_compact_json();
        let second = dispatch_sync(&dispatcher, "tools/list", Some(json!({}))).to_compact_json();
        assert_eq!(first, second);
        let value: Value = serde_json::from_str(&first).expect("json");
        let names: Vec<_> = value["result"]["tools"]
            .as_array()
            .expect("tools")
            .iter()
            .map(|tool| tool["name"].as_str().expect("name").to_string())
            .collect();
        assert_eq!(names, ["echo", "later", "explode"]);
        assert_eq!(value["result"]["tools"][0]["annotations"]["readOnlyHint"], json!(true));
    }

    #[test]
    fn tools_call_wraps_structured_content() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let response = dispatch_sync(
            &dispatcher,
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"x": 1}})),
        );
        let result = response.result.expect("result");
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["structuredContent"]["echo"]["x"], json!(1));
        assert_eq!(result["content"][0]["text"], json!("{\"echo\":{\"x\":1}}"));
    }

    #[test]
    fn asynchronous_tool_completes_later() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let response = dispatch_sync(&dispatcher, "tools/call", Some(json!({"name": "later"})));
        assert_eq!(
            response.result.expect("result")["structuredContent"]["success"],
            json!(true)
        );
    }

    #[test]
    fn tool_call_errors_map_to_protocol_codes() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let cases = [
            (json!({"arguments": {}}), INVALID_PARAMS_CODE),
            (json!({"name": "echo", "arguments": "nope"}), INVALID_PARAMS_CODE),
            (json!({"name": "missing"}), METHOD_NOT_FOUND_CODE),
            (json!("not-an-object"), INVALID_PARAMS_CODE),
        ];
        for (params, code) in cases {
            let response = dispatch_sync(&dispatcher, "tools/call", Some(params));
            assert_eq!(response.error.expect("error").code, code);
            assert!(response.result.is_none());
        }
    }

    #[test]
    fn panicking_tool_is_internal_error() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let response = dispatch_sync(&dispatcher, "tools/call", Some(json!({"name": "explode"})));
        let error = response.error.expect("error");
        assert_eq!(error.code, INTERNAL_ERROR_CODE);
        assert_eq!(error.message, "tool blew up");
    }

    #[test]
    fn resources_list_is_empty() {
        let dispatcher = ProtocolDispatcher::new(stub_registry());
        let response = dispatch_sync(&dispatcher, "resources/list", None);
        assert_eq!(response.result, Some(json!({"resources": []})));
    }

    #[test]
    fn extra_methods_can_be_added_before_sharing() {
        let dispatcher = ProtocolDispatcher::new(ToolRegistry::new()).with_method(
            "custom/echo",
            method_handler(|params, completion| completion.succeed(params.unwrap_or(Value::Null))),
        );
        let response = dispatch_sync(&dispatcher, "custom/echo", Some(json!([1, 2])));
        assert_eq!(response.result, Some(json!([1, 2])));
    }

    #[test]
    fn dispatch_value_skips_notifications() {
        let dispatcher = ProtocolDispatcher::new(ToolRegistry::new());
        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            move |reply| tx.send(reply).expect("send"),
        );
        assert_eq!(rx.recv().expect("reply"), None);
    }

    #[test]
    fn dispatch_value_rejects_old_protocol_version() {
        let dispatcher = ProtocolDispatcher::new(ToolRegistry::new());
        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch_value(
            json!({"jsonrpc": "1.0", "id": "x", "method": "ping"}),
            move |reply| tx.send(reply).expect("send"),
        );
        let response = rx.recv().expect("reply").expect("response");
        assert_eq!(response.error.expect("error").code, INVALID_REQUEST_CODE);
        assert_eq!(response.id, JsonRpcId::String("x".to_string()));
    }
}
