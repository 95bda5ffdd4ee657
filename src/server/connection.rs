//! Purpose: Per-socket buffering and routing, independent of any I/O.
//! Exports: `ConnectionState`, `Role`, `Phase`, `Action`.
//! Role: Turns received bytes into actions the connection task performs.
//! Invariants: Pending bytes are only dropped once a full message has been consumed.
//! Invariants: The role is decided once, when the leading bytes can no longer be an HTTP method token.
//! Invariants: An SSE connection never returns to request/response handling.

use bytes::BytesMut;
use serde_json::Value;

use crate::http::request::{self, HttpMethod, ParseOutcome, header_terminator_end};
use crate::http::response::{error_response, no_content};
use crate::mcp::protocol::{JsonRpcError, JsonRpcId, JsonRpcResponse, parse_jsonrpc_line};
use crate::transport::{Transport, classify, is_undecided};

pub const SSE_PATH: &str = "/sse";

/// Upper bound on buffered bytes for a single unfinished message.
pub const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Undetermined,
    JsonRpc,
    Http,
    Sse,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Buffering,
    Dispatching,
    Streaming,
    Closed,
}

#[derive(Debug, PartialEq)]
pub enum Action {
    /// Write bytes and keep the connection open.
    Write(Vec<u8>),
    /// Write bytes, then close.
    WriteAndClose(Vec<u8>),
    /// Dispatch a raw TCP request; the reply goes back on this socket as one line.
    DispatchLine(Value),
    /// Dispatch an HTTP POST body; the reply is broadcast over SSE, then 204 closes this socket.
    DispatchPost(Value),
    /// Answer a plain GET with the server description, then close.
    ServeInfo,
    /// Switch to event streaming and join the broadcast set.
    StartSse,
}

#[derive(Debug)]
pub struct ConnectionState {
    pending: BytesMut,
    role: Role,
    phase: Phase,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::new(),
            role: Role::Undetermined,
            phase: Phase::Buffering,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record that the connection was closed by either side.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.pending.clear();
    }

    /// Append `bytes` and return everything that can be acted on now.
    pub fn on_data(&mut self, bytes: &[u8]) -> Vec<Action> {
        match self.phase {
            Phase::Buffering => {}
            // HTTP requests are one per connection; anything after them is ignored.
            Phase::Dispatching | Phase::Streaming | Phase::Closed => return Vec::new(),
        }
        self.pending.extend_from_slice(bytes);

        if self.role == Role::Undetermined {
            if is_undecided(&self.pending) {
                return Vec::new();
            }
            self.role = match classify(&self.pending) {
                Transport::Http => Role::Http,
                Transport::JsonRpc => Role::JsonRpc,
            };
        }

        match self.role {
            Role::JsonRpc => self.drain_lines(),
            Role::Http => self.try_http().into_iter().collect(),
            Role::Undetermined | Role::Sse => Vec::new(),
        }
    }

    fn drain_lines(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.split_to(newline + 1);
            if let Some(action) = line_action(&line) {
                actions.push(action);
            }
        }

        if self.pending.iter().all(u8::is_ascii_whitespace) {
            return actions;
        }
        match serde_json::from_slice::<Value>(&self.pending) {
            Ok(value) => {
                self.pending.clear();
                actions.push(Action::DispatchLine(value));
            }
            Err(err) if err.is_eof() && self.pending.len() < MAX_PENDING_BYTES => {}
            Err(err) => {
                self.pending.clear();
                actions.push(Action::Write(parse_error_line(&err.to_string())));
            }
        }
        actions
    }

    fn try_http(&mut self) -> Option<Action> {
        if self.pending.len() > MAX_PENDING_BYTES {
            return Some(self.finish(error_response(400, "request too large")));
        }
        header_terminator_end(&self.pending)?;
        let parsed = match request::parse(&self.pending) {
            ParseOutcome::NeedMoreData => return None,
            ParseOutcome::Invalid(message) => return Some(self.finish(error_response(400, &message))),
            ParseOutcome::Complete(parsed) => parsed,
        };
        self.pending.clear();

        let path = parsed.uri.split('?').next().unwrap_or_default();
        match parsed.method {
            HttpMethod::Options => Some(self.finish(no_content())),
            HttpMethod::Get if path == SSE_PATH => {
                self.role = Role::Sse;
                self.phase = Phase::Streaming;
                Some(Action::StartSse)
            }
            HttpMethod::Get => {
                self.phase = Phase::Dispatching;
                Some(Action::ServeInfo)
            }
            HttpMethod::Post => {
                if parsed.body.iter().all(u8::is_ascii_whitespace) {
                    return Some(self.finish(no_content()));
                }
                match serde_json::from_slice::<Value>(&parsed.body) {
                    Ok(value) => {
                        self.phase = Phase::Dispatching;
                        Some(Action::DispatchPost(value))
                    }
                    Err(err) => {
                        Some(self.finish(error_response(400, &format!("Parse error: {err}"))))
                    }
                }
            }
            _ => Some(self.finish(error_response(405, "Method Not Allowed"))),
        }
    }

    fn finish(&mut self, bytes: Vec<u8>) -> Action {
        self.close();
        Action::WriteAndClose(bytes)
    }
}

fn line_action(line: &[u8]) -> Option<Action> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(match parse_jsonrpc_line(line) {
        Ok(value) => Action::DispatchLine(value),
        Err(error) => Action::Write(error_line(error)),
    })
}

fn parse_error_line(detail: &str) -> Vec<u8> {
    error_line(JsonRpcError::parse_error(format!("Parse error: {detail}")))
}

fn error_line(error: JsonRpcError) -> Vec<u8> {
    let mut line = JsonRpcResponse::error(JsonRpcId::Null, error)
        .to_compact_json()
        .into_bytes();
    line.push(b'\n');
    line
}
