//! Purpose: Classify buffered socket bytes as HTTP or raw JSON-RPC.
//! Exports: `Transport`, `classify`, `is_undecided`.
//! Role: Routing decision for the connection buffer; inspects, never consumes.
//! Invariants: A buffer starting with `{` is never classified as HTTP.
//! Invariants: A buffer starting with `{` or `[` is never undecided.

use crate::http::request::{HttpMethod, is_http_request};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    Http,
    JsonRpc,
}

pub fn classify(buffer: &[u8]) -> Transport {
    if is_http_request(buffer) {
        Transport::Http
    } else {
        Transport::JsonRpc
    }
}

/// True while `buffer` holds only whitespace or a strict prefix of `"<METHOD> "`.
pub fn is_undecided(buffer: &[u8]) -> bool {
    let start = buffer
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(buffer.len());
    let head = &buffer[start..];
    if head.is_empty() {
        return true;
    }
    HttpMethod::ALL.iter().any(|method| {
        let token = method.as_str().as_bytes();
        head.len() <= token.len() && token.starts_with(head)
    })
}

#[cfg(test)]
mod tests {
    use super::{Transport, classify, is_undecided};

    #[test]
    fn json_objects_route_to_jsonrpc() {
        let cases: [&[u8]; 4] = [
            b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n",
            b"{\"host:\":\"POST / HTTP/1.1\"}",
            b"{",
            b"\r\n  {\"partial\":",
        ];
        for buffer in cases {
            assert_eq!(classify(buffer), Transport::JsonRpc);
        }
    }

    #[test]
    fn http_request_heads_route_to_http() {
        assert_eq!(classify(b"POST / HTTP/1.1\r\n"), Transport::Http);
        assert_eq!(classify(b"GET /sse HTTP/1.1\r\nHost: x\r\n\r\n"), Transport::Http);
        assert_eq!(classify(b"DELETE /thing"), Transport::Http);
    }

    #[test]
    fn classify_does_not_need_a_complete_message() {
        assert_eq!(classify(b"OPTIONS "), Transport::Http);
        assert_eq!(classify(b"[1,"), Transport::JsonRpc);
    }

    #[test]
    fn partial_method_tokens_wait_for_more_bytes() {
        let waiting: [&[u8]; 7] = [b"", b"  \r\n", b"P", b"PO", b"POST", b"\r\nOPTI", b"CONNEC"];
        for buffer in waiting {
            assert!(is_undecided(buffer), "{:?}", String::from_utf8_lossy(buffer));
        }
        let decided: [&[u8]; 6] = [b"{", b"[", b"POST ", b"POX", b"post", b"  {\"id\":1"];
        for buffer in decided {
            assert!(!is_undecided(buffer), "{:?}", String::from_utf8_lossy(buffer));
        }
    }
}
