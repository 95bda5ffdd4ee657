//! Purpose: End-to-end tests for `codebridge serve` over raw TCP, HTTP, and SSE.
//! Exports: None (integration test module).
//! Role: Drive the real binary on an OS-assigned port with a temp workspace.
//! Invariants: Loopback-only server; reads use socket timeouts so failures never hang.
//! Invariants: Server processes are cleaned up on drop.

use serde_json::{Value, json};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    child: Child,
    addr: SocketAddr,
    workspace: String,
    _stdout: BufReader<ChildStdout>,
}

impl TestServer {
    fn start(workspace: &std::path::Path) -> TestResult<Self> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_codebridge"))
            .arg("serve")
            .arg("--port")
            .arg("0")
            .arg("--workspace")
            .arg(workspace)
            .env("RUST_LOG", "warn")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err("server stdout was not captured".into());
        };
        let mut stdout = BufReader::new(stdout);
        let mut line = String::new();
        stdout.read_line(&mut line)?;
        let ready: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("bad readiness line {line:?}: {err}").into());
            }
        };
        let addr: SocketAddr = ready["listening"]
            .as_str()
            .ok_or("missing listening address")?
            .parse()?;
        let workspace = ready["workspace"]
            .as_str()
            .ok_or("missing workspace")?
            .to_string();

        Ok(Self {
            child,
            addr,
            workspace,
            _stdout: stdout,
        })
    }

    fn connect(&self) -> TestResult<TcpStream> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        Ok(stream)
    }

    fn raw(&self) -> TestResult<RawClient> {
        let stream = self.connect()?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(RawClient { stream, reader })
    }

    /// Send one HTTP request and read until the server closes the socket.
    fn http(&self, request: &str) -> TestResult<String> {
        let mut stream = self.connect()?;
        stream.write_all(request.as_bytes())?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        Ok(response)
    }

    fn wait_exit(&mut self, timeout: Duration) -> TestResult<std::process::ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err("server did not exit".into());
            }
            sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct RawClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl RawClient {
    fn send(&mut self, bytes: &[u8]) -> TestResult<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> TestResult<Value> {
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        if line.is_empty() {
            return Err("connection closed".into());
        }
        Ok(serde_json::from_str(&line)?)
    }

    fn call(&mut self, request: Value) -> TestResult<Value> {
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        self.send(&line)?;
        self.read_response()
    }
}

fn workspace() -> TestResult<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("Cargo.toml"),
        "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
    )?;
    fs::create_dir_all(dir.path().join("src"))?;
    fs::write(dir.path().join("src/main.rs"), "fn main() {\n    println!(\"hi\");\n}\n")?;
    Ok(dir)
}

/// Logs may precede the error envelope on stderr; the envelope is always the final line.
fn last_json_line(bytes: &[u8]) -> TestResult<Value> {
    let text = String::from_utf8_lossy(bytes);
    let line = text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or("empty stderr")?;
    Ok(serde_json::from_str(line)?)
}

fn status_code(response: &str) -> Option<u16> {
    response.split_whitespace().nth(1)?.parse().ok()
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response
        .split("\r\n\r\n")
        .next()?
        .lines()
        .skip(1)
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
}

#[test]
fn readiness_line_reports_workspace() -> TestResult<()> {
    let dir = workspace()?;
    let server = TestServer::start(dir.path())?;
    assert!(server.addr.ip().is_loopback());
    assert_eq!(
        fs::canonicalize(&server.workspace)?,
        fs::canonicalize(dir.path())?
    );
    Ok(())
}

#[test]
fn raw_tcp_lists_tools() -> TestResult<()> {
    let dir = workspace()?;
    let server = TestServer::start(dir.path())?;
    let mut client = server.raw()?;

    let response = client.call(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))?;
    assert_eq!(response["id"], 1);
    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .ok_or("tools array")?
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert_eq!(names.len(), 31);
    for expected in ["build", "list_projects", "quit", "execute_command"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    Ok(())
}

#[test]
fn raw_tcp_initialize_then_call_tool() -> TestResult<()> {
    let dir = workspace()?;
    let server = TestServer::start(dir.path())?;
    let mut client = server.raw()?;

    let init = client.call(json!({
        "jsonrpc": "2.0",
        "id": "init",
        "method": "initialize",
        "params": {"protocolVersion": "2024-11-05", "capabilities": {}},
    }))?;
    assert_eq!(init["result"]["serverInfo"]["name"], "codebridge");

    client.send(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")?;

    let listed = client.call(json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {"name": "get_file_plain_text", "arguments": {"path": "src/main.rs"}},
    }))?;
    assert_eq!(listed["id"], 2, "notification must not produce a reply");
    let result = &listed["result"];
    assert_eq!(result["isError"], false);
    assert_eq!(result["structuredContent"]["success"], true);
    assert!(
        result["structuredContent"]["text"]
            .as_str()
            .ok_or("text")?
            .contains("println!")
    );
    assert_eq!(result["content"][0]["type"], "text");
    Ok(())
}

#[test]
fn raw_tcp_reassembles_split_frames() -> TestResult<()> {
    let dir = workspace()?;
    let server = TestServer::start(dir.path())?;
    let mut client = server.raw()?;

    client.send(b"{\"jsonrpc\":\"2.0\",")?;
    sleep(Duration::from_millis(50));
    client.send(b"\"id\":7,\"method\":\"ping\"}\n{\"jsonrpc\":\"2.0\",\"id\":8,")?;
    sleep(Duration::from_millis(50));
    client.send(b"\"method\":\"ping\"}\n")?;

    assert_eq!(client.read_response()?["id"], 7);
    assert_eq!(client.read_response()?["id"], 8);
    Ok(())
}

#[test]
fn raw_tcp_protocol_errors() -> TestResult<()> {
    let dir = workspace()?;
    let server = TestServer::start(dir.path())?;
    let mut client = server.raw()?;

    let wrong_version = client.call(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}))?;
    assert_eq!(wrong_version["error"]["code"], -32600);

    let unknown = client.call(json!({"jsonrpc": "2.0", "id": 2, "method": "no/such"}))?;
    assert_eq!(unknown["error"]["code"], -32601);

    let missing_tool = client.call(json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": {"name": "does_not_exist"},
    }))?;
    assert_eq!(missing_tool["error"]["code"], -32601);

    client.send(b"{this is not json}\n")?;
    let garbage = client.read_response()?;
    assert_eq!(garbage["error"]["code"], -32700);
    assert_eq!(garbage["id"], Value::Null);

    let still_alive = client.call(json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}))?;
    assert_eq!(still_alive["id"], 4);
    Ok(())
}

#[test]
fn post_response_is_broadcast_over_sse() -> TestResult<()> {
    let dir = workspace()?;
    let server = TestServer::start(dir.path())?;

    let mut sse = server.connect()?;
    sse.write_all(b"GET /sse HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n")?;
    let mut events = BufReader::new(sse.try_clone()?);
    let mut status = String::new();
    events.read_line(&mut status)?;
    assert!(status.starts_with("HTTP/1.1 200"), "{status}");

    let mut line = String::new();
    loop {
        line.clear();
        events.read_line(&mut line)?;
        if line.trim() == "event: endpoint" {
            break;
        }
        assert!(!line.is_empty(), "stream closed before endpoint event");
    }
    line.clear();
    events.read_line(&mut line)?;
    assert_eq!(line.trim(), "data: /sse");

    let body = json!({
        "jsonrpc": "2.0",
        "id": "abc",
        "method": "tools/call",
        "params": {"name": "list_projects", "arguments": {}},
    })
    .to_string();
    let reply = server.http(&format!(
        "POST /message HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    ))?;
    assert_eq!(status_code(&reply), Some(204));
    assert_eq!(header(&reply, "access-control-allow-origin"), Some("*"));

    loop {
        line.clear();
        events.read_line(&mut line)?;
        if line.trim() == "event: message" {
            break;
        }
        assert!(!line.is_empty(), "stream closed before message event");
    }
    line.clear();
    events.read_line(&mut line)?;
    let payload: Value = serde_json::from_str(line.trim().trim_start_matches("data: "))?;
    assert_eq!(payload["id"], "abc");
    let projects = payload["result"]["structuredContent"]["projects"]
        .as_array()
        .ok_or("projects array")?;
    assert!(!projects.is_empty());
    Ok(())
}

#[test]
fn http_routing_edges() -> TestResult<()> {
    let dir = workspace()?;
    let server = TestServer::start(dir.path())?;

    for method in ["PUT", "DELETE", "HEAD", "PATCH", "TRACE", "CONNECT"] {
        let reply = server.http(&format!("{method} / HTTP/1.1\r\nHost: localhost\r\n\r\n"))?;
        assert_eq!(status_code(&reply), Some(405), "{method}");
    }

    let preflight = server.http("OPTIONS /sse HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert_eq!(status_code(&preflight), Some(204));
    assert_eq!(
        header(&preflight, "access-control-allow-methods"),
        Some("GET, POST, OPTIONS")
    );

    let info = server.http("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert_eq!(status_code(&info), Some(200));
    let body = info.split("\r\n\r\n").nth(1).ok_or("info body")?;
    let value: Value = serde_json::from_str(body)?;
    assert_eq!(value["name"], "codebridge");
    assert_eq!(value["endpoints"]["sse"], "/sse");

    let empty = server.http("POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n")?;
    assert_eq!(status_code(&empty), Some(204));

    let bad = server.http("POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\n{oops")?;
    assert_eq!(status_code(&bad), Some(400));
    Ok(())
}

#[test]
fn quit_tool_stops_the_server() -> TestResult<()> {
    let dir = workspace()?;
    let mut server = TestServer::start(dir.path())?;
    let mut client = server.raw()?;

    let response = client.call(json!({
        "jsonrpc": "2.0",
        "id": 99,
        "method": "tools/call",
        "params": {"name": "quit"},
    }))?;
    assert_eq!(response["id"], 99);
    assert_eq!(response["result"]["structuredContent"]["success"], true);

    let status = server.wait_exit(Duration::from_secs(10))?;
    assert!(status.success(), "exit status {status:?}");
    Ok(())
}

#[test]
fn tools_command_prints_catalog() -> TestResult<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_codebridge"))
        .arg("tools")
        .output()?;
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout)?;
    let tools = value["tools"].as_array().ok_or("tools array")?;
    assert_eq!(tools.len(), 31);
    assert!(tools.iter().all(|tool| tool["inputSchema"]["type"] == "object"));
    Ok(())
}

#[test]
fn non_loopback_bind_is_a_usage_error() -> TestResult<()> {
    let dir = workspace()?;
    let output = Command::new(env!("CARGO_BIN_EXE_codebridge"))
        .arg("serve")
        .arg("--bind")
        .arg("0.0.0.0")
        .arg("--workspace")
        .arg(dir.path())
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    let value = last_json_line(&output.stderr)?;
    assert_eq!(value["error"]["kind"], "Usage");
    assert!(value["error"]["hint"].is_string());
    Ok(())
}

#[test]
fn missing_workspace_is_not_found() -> TestResult<()> {
    let dir = tempfile::tempdir()?;
    let output = Command::new(env!("CARGO_BIN_EXE_codebridge"))
        .arg("serve")
        .arg("--port")
        .arg("0")
        .arg("--workspace")
        .arg(dir.path().join("missing"))
        .output()?;
    assert_eq!(output.status.code(), Some(3));
    let value = last_json_line(&output.stderr)?;
    assert_eq!(value["error"]["kind"], "NotFound");
    Ok(())
}
