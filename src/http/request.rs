//! Purpose: Parse raw socket bytes into an HTTP request or a "need more data" signal.
//! Exports: `HttpMethod`, `HttpRequest`, `ParseOutcome`, `parse`, `is_http_request`.
//! Role: Stateless parser; retry state lives in the caller's retained buffer.
//! Invariants: `parse` is a pure function of its input; the same grown buffer is re-submitted.
//! Invariants: Malformed header lines are dropped; a malformed request line is fatal.
//! Invariants: Header names are stored lower-cased; the body is sliced from the raw bytes.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static REQUEST_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([A-Z]+) (\S+) HTTP/(\d+\.\d+)$").ok());

const SNIFF_WINDOW: usize = 100;

const COMMON_HEADERS: [&str; 8] = [
    "host:",
    "content-type:",
    "content-length:",
    "user-agent:",
    "accept:",
    "connection:",
    "authorization:",
    "origin:",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
    Connect,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 9] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Patch,
        HttpMethod::Trace,
        HttpMethod::Connect,
    ];

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            "PATCH" => Some(Self::Patch),
            "TRACE" => Some(Self::Trace),
            "CONNECT" => Some(Self::Connect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Result of one parse attempt over the whole buffered request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Complete(HttpRequest),
    /// The declared body is longer than the bytes received so far.
    NeedMoreData,
    Invalid(String),
}

pub fn parse(buffer: &[u8]) -> ParseOutcome {
    if buffer.is_empty() {
        return ParseOutcome::Invalid("empty request".to_string());
    }

    let text = String::from_utf8_lossy(buffer);
    let lines = split_lines(&text);
    let Some(request_line) = lines.first() else {
        return ParseOutcome::Invalid("missing request line".to_string());
    };

    let (method, uri, version) = match parse_request_line(request_line) {
        Ok(parts) => parts,
        Err(message) => return ParseOutcome::Invalid(message),
    };

    let header_end = lines
        .iter()
        .skip(1)
        .position(|line| line.is_empty())
        .map(|idx| idx + 1)
        .unwrap_or(lines.len());
    let headers = parse_headers(&lines[1..header_end]);

    let content_length = match headers.get("content-length") {
        None => 0,
        Some(value) => match value.trim().parse::<usize>() {
            Ok(length) => length,
            Err(_) => {
                return ParseOutcome::Invalid(format!("invalid Content-Length: {value}"));
            }
        },
    };

    let body = if content_length > 0 {
        let body = slice_body(buffer, content_length);
        if body.len() < content_length {
            return ParseOutcome::NeedMoreData;
        }
        body.to_vec()
    } else {
        Vec::new()
    };

    ParseOutcome::Complete(HttpRequest {
        method,
        uri,
        version,
        headers,
        body,
    })
}

/// Heuristic sniff used to route socket bytes to the HTTP or the JSON-RPC path.
pub fn is_http_request(buffer: &[u8]) -> bool {
    let window = &buffer[..buffer.len().min(SNIFF_WINDOW)];
    let first = window.iter().find(|byte| !byte.is_ascii_whitespace());
    if matches!(first, None | Some(b'{') | Some(b'[')) {
        return false;
    }

    let text = String::from_utf8_lossy(window);
    let starts_with_method = HttpMethod::ALL.iter().any(|method| {
        text.strip_prefix(method.as_str())
            .is_some_and(|rest| rest.starts_with(' '))
    });
    if starts_with_method || text.contains("HTTP/1.") || text.contains("HTTP/2.") {
        return true;
    }

    let lowered = text.to_ascii_lowercase();
    COMMON_HEADERS.iter().any(|header| lowered.contains(header))
}

/// Byte offset right after the first header terminator in `buffer`.
pub fn header_terminator_end(buffer: &[u8]) -> Option<usize> {
    let terminators: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r"];
    terminators
        .iter()
        .filter_map(|needle| find(buffer, needle).map(|idx| idx + needle.len()))
        .min()
}

fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(idx) => {
                lines.push(&rest[..idx]);
                let sep_len = if rest[idx..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[idx + sep_len..];
            }
            None => {
                lines.push(rest);
                rest = "";
            }
        }
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

fn parse_request_line(line: &str) -> Result<(HttpMethod, String, String), String> {
    let (method_token, uri, version) = match REQUEST_LINE
        .as_ref()
        .and_then(|pattern| pattern.captures(line))
    {
        Some(captures) => (
            captures[1].to_string(),
            captures[2].to_string(),
            captures[3].to_string(),
        ),
        None => {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 {
                return Err(format!("malformed request line: {line}"));
            }
            let last = tokens[tokens.len() - 1];
            let version = last
                .strip_prefix("HTTP/")
                .ok_or_else(|| format!("malformed HTTP version: {last}"))?;
            (
                tokens[0].to_string(),
                tokens[1].to_string(),
                version.to_string(),
            )
        }
    };

    let method = HttpMethod::parse(&method_token)
        .ok_or_else(|| format!("unsupported HTTP method: {method_token}"))?;
    if !(version.starts_with("1.") || version.starts_with("2.")) {
        return Err(format!("unsupported HTTP version: {version}"));
    }
    Ok((method, uri, version))
}

fn parse_headers(lines: &[&str]) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut last_name: Option<String> = None;

    for line in lines {
        if line.starts_with([' ', '\t']) {
            // Folded continuation of the previous header.
            if let Some(value) = last_name.as_ref().and_then(|name| headers.get_mut(name)) {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            last_name = None;
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            last_name = None;
            continue;
        }
        headers.insert(name.clone(), value.trim().to_string());
        last_name = Some(name);
    }
    headers
}

fn slice_body(buffer: &[u8], content_length: usize) -> &[u8] {
    match header_terminator_end(buffer) {
        Some(start) => {
            let end = start.saturating_add(content_length).min(buffer.len());
            &buffer[start..end]
        }
        None => &buffer[buffer.len().saturating_sub(content_length)..],
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
