//! Purpose: Library crate behind the `codebridge` MCP server binary and its tests.
//! Exports: `core` (errors), `http`, `transport`, `mcp` (dispatch + tools), `backend`, `server`.
//! Role: Layers depend downward only: server -> mcp/http/transport -> backend -> core.
//! Invariants: Dispatcher and backend are explicit values passed through constructors.
//! Invariants: Nothing here writes to stdout except the `serve` readiness line.
pub mod backend;
pub mod core;
pub mod http;
pub mod mcp;
pub mod server;
pub mod transport;
