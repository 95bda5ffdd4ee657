//! Purpose: Format HTTP responses and SSE frames as raw bytes.
//! Exports: `json_response`, `text_response`, `error_response`, `cors_response`,
//! `no_content`, `sse_prologue`, `sse_event`, `reason_phrase`.
//! Role: Pure formatting; never parses and never touches sockets.
//! Invariants: `Content-Length` is always computed from the body actually written.
//! Invariants: Finite responses are `Connection: close`; only the SSE prologue keeps alive.

use serde_json::json;

pub const SERVER_NAME: &str = concat!("codebridge/", env!("CARGO_PKG_VERSION"));
const HTTP_VERSION: &str = "1.1";

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown Status",
    }
}

pub fn json_response(body: &[u8], status: u16) -> Vec<u8> {
    build(status, CONTENT_TYPE_JSON, &[], body)
}

pub fn text_response(body: &str, status: u16) -> Vec<u8> {
    build(status, CONTENT_TYPE_TEXT, &[], body.as_bytes())
}

/// JSON error document `{"error":{"code":<status>,"message":<message>}}`, with CORS.
pub fn error_response(status: u16, message: &str) -> Vec<u8> {
    let body = json!({
        "error": {
            "code": status,
            "message": message,
        }
    });
    build(status, CONTENT_TYPE_JSON, &CORS_HEADERS, body.to_string().as_bytes())
}

pub fn cors_response(body: &[u8], status: u16) -> Vec<u8> {
    build(status, CONTENT_TYPE_JSON, &CORS_HEADERS, body)
}

pub fn no_content() -> Vec<u8> {
    build(204, CONTENT_TYPE_TEXT, &CORS_HEADERS, &[])
}

/// Response head for a long-lived `text/event-stream`; no length, kept alive.
pub fn sse_prologue() -> Vec<u8> {
    let mut out = status_line(200);
    push_header(&mut out, "Content-Type", "text/event-stream");
    push_header(&mut out, "Cache-Control", "no-cache");
    push_header(&mut out, "Connection", "keep-alive");
    push_header(&mut out, "Server", SERVER_NAME);
    for (name, value) in CORS_HEADERS {
        push_header(&mut out, name, value);
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// One SSE frame. Multi-line payloads are split over several `data:` lines.
pub fn sse_event(event: &str, data: &str) -> Vec<u8> {
    let mut frame = format!("event: {event}\n");
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame.into_bytes()
}

fn build(status: u16, content_type: &str, extra: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = status_line(status);
    push_header(&mut out, "Content-Type", content_type);
    push_header(&mut out, "Content-Length", &body.len().to_string());
    push_header(&mut out, "Server", SERVER_NAME);
    push_header(&mut out, "Connection", "close");
    for (name, value) in extra {
        push_header(&mut out, name, value);
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

fn status_line(status: u16) -> Vec<u8> {
    format!("HTTP/{HTTP_VERSION} {status} {}\r\n", reason_phrase(status)).into_bytes()
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}
