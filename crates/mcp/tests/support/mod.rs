#![forbid(unsafe_code)]
#![allow(dead_code)]

use serde_json::Value;
use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

pub(crate) const BIN: &str = env!("CARGO_BIN_EXE_cg_mcp");

pub(crate) struct Server {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    storage_dir: PathBuf,
    cleanup_storage: bool,
    next_id: i64,
}

impl Server {
    pub(crate) fn start(test_name: &str) -> Self {
        Self::start_with_args(test_name, &[])
    }

    pub(crate) fn start_with_args(test_name: &str, extra_args: &[&str]) -> Self {
        let storage_dir = temp_dir(test_name);
        Self::start_with_storage_dir(storage_dir, extra_args, true)
    }

    /// Always passes `--no-tty`: a test must never block on a terminal prompt.
    pub(crate) fn start_with_storage_dir(
        storage_dir: PathBuf,
        extra_args: &[&str],
        cleanup_storage: bool,
    ) -> Self {
        std::fs::create_dir_all(&storage_dir).expect("create storage dir");
        let mut child = Command::new(BIN)
            .arg("--storage-dir")
            .arg(&storage_dir)
            .arg("--no-tty")
            .args(extra_args)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn cg_mcp");

        let stdin = child.stdin.take().expect("stdin");
        let stdout = BufReader::new(child.stdout.take().expect("stdout"));

        Self {
            child,
            stdin: Some(stdin),
            stdout,
            storage_dir,
            cleanup_storage,
            next_id: 100,
        }
    }

    pub(crate) fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub(crate) fn send(&mut self, req: Value) {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{req}").expect("write request");
        stdin.flush().expect("flush request");
    }

    pub(crate) fn send_raw(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{line}").expect("write raw line");
        stdin.flush().expect("flush raw line");
    }

    /// Closes stdin and waits for the process to exit on its own.
    pub(crate) fn close_and_wait(&mut self) -> std::process::ExitStatus {
        drop(self.stdin.take());
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            if let Some(status) = self.child.try_wait().expect("poll child") {
                return status;
            }
            assert!(Instant::now() < deadline, "server did not exit after EOF");
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    pub(crate) fn recv(&mut self) -> Value {
        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("read response");
        assert!(!line.trim().is_empty(), "empty response line");
        serde_json::from_str(&line).expect("parse response json")
    }

    pub(crate) fn request(&mut self, req: Value) -> Value {
        self.send(req);
        self.recv()
    }

    pub(crate) fn initialize_default(&mut self) {
        let init = self.request(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "test", "version": "0" } }
        }));
        assert!(init.get("result").is_some(), "initialize must return result");
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {}
        }));
    }

    pub(crate) fn start_initialized(test_name: &str) -> Self {
        let mut server = Self::start(test_name);
        server.initialize_default();
        server
    }

    pub(crate) fn start_initialized_with_args(test_name: &str, extra_args: &[&str]) -> Self {
        let mut server = Self::start_with_args(test_name, extra_args);
        server.initialize_default();
        server
    }

    pub(crate) fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        let resp = self.request(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }));
        assert_eq!(resp.get("id"), Some(&json!(id)), "response id: {resp}");
        resp
    }

    /// Polls `get_job_status` until the job leaves `pending`/`running`.
    pub(crate) fn wait_terminal(&mut self, job_id: i64) -> Value {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let resp = self.call_tool("get_job_status", json!({ "id": job_id }));
            let job = extract_tool_text(&resp);
            let status = job.get("status").and_then(|v| v.as_str()).unwrap_or("");
            if !matches!(status, "pending" | "running") {
                return job;
            }
            assert!(Instant::now() < deadline, "job {job_id} stuck in {status}");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if self.cleanup_storage {
            let _ = std::fs::remove_dir_all(&self.storage_dir);
        }
    }
}

pub(crate) fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("cg_mcp_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn extract_tool_text(resp: &Value) -> Value {
    let text = extract_tool_text_str(resp);
    if let Ok(parsed) = serde_json::from_str(&text) {
        return parsed;
    }
    Value::String(text)
}

pub(crate) fn extract_tool_text_str(resp: &Value) -> String {
    resp.get("result")
        .and_then(|v| v.get("content"))
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("text"))
        .and_then(|v| v.as_str())
        .expect("result.content[0].text")
        .to_string()
}

pub(crate) fn is_tool_error(resp: &Value) -> bool {
    resp.get("result")
        .and_then(|v| v.get("isError"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub(crate) fn assert_json_rpc_error(resp: &Value, expected_code: i64) {
    let code = resp
        .get("error")
        .and_then(|v| v.get("code"))
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| panic!("error.code missing in {resp}"));
    assert_eq!(code, expected_code, "{resp}");
}

/// Same server, Content-Length framing on both directions.
pub(crate) struct ContentLengthClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    storage_dir: PathBuf,
}

impl ContentLengthClient {
    pub(crate) fn start(test_name: &str) -> Self {
        let storage_dir = temp_dir(test_name);
        let mut child = Command::new(BIN)
            .arg("--storage-dir")
            .arg(&storage_dir)
            .arg("--no-tty")
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn cg_mcp");

        let stdin = child.stdin.take().expect("stdin");
        let stdout = BufReader::new(child.stdout.take().expect("stdout"));
        Self {
            child,
            stdin,
            stdout,
            storage_dir,
        }
    }

    pub(crate) fn send(&mut self, req: Value) {
        let body = serde_json::to_vec(&req).expect("serialize request");
        write!(self.stdin, "Content-Length: {}\r\n\r\n", body.len()).expect("write header");
        self.stdin.write_all(&body).expect("write body");
        self.stdin.flush().expect("flush request");
    }

    pub(crate) fn recv(&mut self) -> Value {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line).expect("read header line");
            assert!(read > 0, "unexpected EOF reading response headers");
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("content-length")
            {
                content_length = Some(value.trim().parse().expect("content-length value"));
            }
        }
        let len = content_length.expect("Content-Length header");
        let mut body = vec![0u8; len];
        self.stdout.read_exact(&mut body).expect("read body");
        serde_json::from_slice(&body).expect("parse response body")
    }

    pub(crate) fn request(&mut self, req: Value) -> Value {
        self.send(req);
        self.recv()
    }
}

impl Drop for ContentLengthClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.storage_dir);
    }
}
