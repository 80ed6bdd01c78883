#![forbid(unsafe_code)]

mod support;
use support::*;

use serde_json::json;
use std::process::Command;

#[test]
fn requests_before_initialized_are_refused() {
    let mut server = Server::start("not_initialized");

    let resp = server.request(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/list",
        "params": {}
    }));
    assert_json_rpc_error(&resp, -32002);

    server.initialize_default();
    let resp = server.request(json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }));
    assert_eq!(resp.get("result"), Some(&json!({})));
}

#[test]
fn initialize_reports_protocol_and_server_info() {
    let mut server = Server::start("initialize_info");
    let init = server.request(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "test", "version": "0" } }
    }));
    let result = init.get("result").expect("result");
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "cmdgate");
    assert!(result["capabilities"].get("tools").is_some());
}

#[test]
fn tools_list_names_the_three_tools() {
    let mut server = Server::start_initialized("tools_list");
    let resp = server.request(json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/list",
        "params": {}
    }));
    let tools = resp
        .get("result")
        .and_then(|v| v.get("tools"))
        .and_then(|v| v.as_array())
        .expect("result.tools");
    let mut names = tools
        .iter()
        .filter_map(|tool| tool.get("name").and_then(|v| v.as_str()))
        .collect::<Vec<_>>();
    names.sort();
    assert_eq!(names, vec!["get_job_status", "proxy_call", "run_command"]);
    for tool in tools {
        assert_eq!(tool["inputSchema"]["type"], "object", "{tool}");
    }
}

#[test]
fn run_command_without_terminal_is_rejected_and_never_runs() {
    let mut server = Server::start_initialized("fail_closed");
    let marker = server.storage_dir().join("marker");
    let command = format!("touch '{}'", marker.display());

    let resp = server.call_tool("run_command", json!({ "command": command }));
    assert!(!is_tool_error(&resp), "{resp}");
    let job = extract_tool_text(&resp);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["command"], command.as_str());
    assert!(job["startedAt"].is_null());
    let id = job["id"].as_i64().expect("job id");
    assert!(id >= 1);

    let done = server.wait_terminal(id);
    assert_eq!(done["status"], "rejected");
    assert_eq!(done["error"], "Rejected by operator");
    assert!(done["startedAt"].is_null());
    assert!(done["finishedAt"].is_string());
    assert!(!marker.exists(), "rejected command must not run");
}

#[test]
fn get_job_status_by_id_and_by_command() {
    let mut server = Server::start_initialized("status_lookup");

    let first = extract_tool_text(&server.call_tool("run_command", json!({ "command": "echo one" })));
    let second =
        extract_tool_text(&server.call_tool("run_command", json!({ "command": "echo one" })));
    let first_id = first["id"].as_i64().expect("id");
    let second_id = second["id"].as_i64().expect("id");
    assert!(second_id > first_id);

    let by_id = extract_tool_text(&server.call_tool("get_job_status", json!({ "id": first_id })));
    assert_eq!(by_id["id"], first_id);

    let latest =
        extract_tool_text(&server.call_tool("get_job_status", json!({ "command": "echo one" })));
    assert_eq!(latest["id"], second_id);

    // id wins over command
    let both = extract_tool_text(&server.call_tool(
        "get_job_status",
        json!({ "id": first_id, "command": "echo one" }),
    ));
    assert_eq!(both["id"], first_id);
}

#[test]
fn get_job_status_reports_missing_jobs() {
    let mut server = Server::start_initialized("status_missing");

    let resp = server.call_tool("get_job_status", json!({ "id": 999 }));
    assert!(is_tool_error(&resp));
    assert_eq!(extract_tool_text(&resp), json!({ "error": "Job not found" }));

    let resp = server.call_tool("get_job_status", json!({ "command": "never ran" }));
    assert!(is_tool_error(&resp));
    assert_eq!(extract_tool_text(&resp), json!({ "error": "Job not found" }));
}

#[test]
fn tool_arguments_are_validated_before_any_state_changes() {
    let mut server = Server::start_initialized("validation");

    for args in [json!({}), json!({ "command": "   " }), json!({ "command": 7 })] {
        let resp = server.call_tool("run_command", args.clone());
        assert!(is_tool_error(&resp), "{args}: {resp}");
    }
    let resp = server.call_tool("get_job_status", json!({}));
    assert!(is_tool_error(&resp));
    assert_eq!(
        extract_tool_text_str(&resp),
        "Either id or command is required"
    );
    let resp = server.call_tool("get_job_status", json!({ "id": -1 }));
    assert!(is_tool_error(&resp));

    // Nothing was created by the rejected calls.
    let resp = server.call_tool("get_job_status", json!({ "id": 1 }));
    assert_eq!(extract_tool_text(&resp), json!({ "error": "Job not found" }));

    let resp = server.call_tool("proxy_call", json!({ "tool": "ping" }));
    assert!(is_tool_error(&resp));
    assert_eq!(extract_tool_text_str(&resp), "server is required");
}

#[test]
fn unknown_tools_and_methods_are_protocol_errors() {
    let mut server = Server::start_initialized("unknown_names");

    let resp = server.call_tool("rm_rf", json!({}));
    assert_json_rpc_error(&resp, -32602);

    let resp = server.request(json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "prompts/list",
        "params": {}
    }));
    assert_json_rpc_error(&resp, -32601);

    let resp = server.request(json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": { "name": "run_command", "arguments": "echo hi" }
    }));
    assert_json_rpc_error(&resp, -32602);
}

#[test]
fn malformed_json_gets_a_parse_error_and_the_session_continues() {
    let mut server = Server::start_initialized("parse_error");

    server.send(json!({ "jsonrpc": "2.0", "id": 5, "method": "ping" }));
    let _ = server.recv();

    server.send_raw("{not json");
    let resp = server.recv();
    assert_json_rpc_error(&resp, -32700);
    assert!(resp["id"].is_null(), "{resp}");

    let resp = server.request(json!({ "jsonrpc": "2.0", "id": 6, "method": "ping" }));
    assert_eq!(resp.get("result"), Some(&json!({})));
}

#[test]
fn content_length_framing_is_detected_and_echoed() {
    let mut client = ContentLengthClient::start("content_length");
    let init = client.request(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "test", "version": "0" } }
    }));
    assert!(init.get("result").is_some());
    client.send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }));

    let resp = client.request(json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": { "name": "get_job_status", "arguments": { "id": 1 } }
    }));
    assert_eq!(resp["id"], 2);
    assert_eq!(resp["result"]["isError"], true);
}

#[test]
fn stdin_eof_shuts_down_cleanly() {
    let mut server = Server::start_initialized("eof_shutdown");
    let _ = server.call_tool("run_command", json!({ "command": "echo bye" }));
    let status = server.close_and_wait();
    assert!(status.success(), "exit status {status:?}");
}

#[test]
fn jobs_survive_a_restart() {
    let dir = temp_dir("restart");
    let id = {
        let mut server = Server::start_with_storage_dir(dir.clone(), &[], false);
        server.initialize_default();
        let job = extract_tool_text(&server.call_tool("run_command", json!({ "command": "echo keep" })));
        let id = job["id"].as_i64().expect("id");
        server.wait_terminal(id);
        id
    };

    let mut server = Server::start_with_storage_dir(dir, &[], true);
    server.initialize_default();
    let job = extract_tool_text(&server.call_tool("get_job_status", json!({ "id": id })));
    assert_eq!(job["status"], "rejected");
    assert_eq!(job["command"], "echo keep");
}

#[test]
fn cli_help_and_version_exit_zero_without_creating_storage() {
    let dir = temp_dir("cli");

    let output = Command::new(BIN)
        .arg("--help")
        .current_dir(&dir)
        .output()
        .expect("run cg_mcp --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("USAGE:"), "{stdout}");
    assert!(stdout.contains("--storage-dir"), "{stdout}");

    let output = Command::new(BIN)
        .arg("--version")
        .current_dir(&dir)
        .output()
        .expect("run cg_mcp --version");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("cg_mcp "), "{stdout}");

    assert!(
        !dir.join(".cmdgate").exists(),
        "--help/--version must not open the store"
    );
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_numeric_flag_fails_startup() {
    let dir = temp_dir("bad_flag");
    let output = Command::new(BIN)
        .arg("--storage-dir")
        .arg(&dir)
        .arg("--exec-timeout-ms")
        .arg("soon")
        .output()
        .expect("run cg_mcp");
    assert!(!output.status.success());
    let _ = std::fs::remove_dir_all(&dir);
}
