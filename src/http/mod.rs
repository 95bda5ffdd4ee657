//! Purpose: Minimal HTTP/1.x surface for the MCP listener.
//! Exports: `request` (streaming-tolerant parser), `response` (byte formatter).
//! Role: Only what JSON-RPC POST, SSE GET and OPTIONS/CORS need; not a general server.

pub mod request;
pub mod response;

pub use request::{HttpMethod, HttpRequest, ParseOutcome};
