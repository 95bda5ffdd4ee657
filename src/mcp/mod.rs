//! Purpose: MCP protocol layer: JSON-RPC envelopes, method dispatch, and the tool catalog.
//! Exports: `ProtocolDispatcher`, `Completion`, `ToolRegistry`, protocol types, `build_registry`.
//! Role: Shared by both transports; knows nothing about sockets.

pub mod completion;
pub mod dispatcher;
pub mod protocol;
pub mod tools;

pub use completion::{Completion, MethodResult};
pub use dispatcher::{ProtocolDispatcher, RegisteredTool, ToolRegistry, method_handler, tool_handler};
pub use protocol::{
    JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse, ServerMetadata, ToolDescriptor,
};
pub use tools::{build_registry, tool_descriptors};
