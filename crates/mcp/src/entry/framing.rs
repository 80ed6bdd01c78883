#![forbid(unsafe_code)]

use crate::{INVALID_REQUEST, JsonRpcRequest, PARSE_ERROR, json_rpc_error};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub(crate) const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransportMode {
    NewlineJson,
    ContentLength,
}

pub(crate) fn detect_mode_from_first_line(line: &str) -> Option<TransportMode> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(TransportMode::NewlineJson);
    }
    // Some clients send Content-Type first; any plausible header line selects header mode.
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("content-length:") || lower.starts_with("content-type:") {
        return Some(TransportMode::ContentLength);
    }
    None
}

pub(crate) fn parse_content_length_header(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    let (key, value) = trimmed.split_once(':')?;
    if !key.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse::<usize>().ok()
}

fn invalid_data(message: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// Reads the rest of a header block starting at `first_header`, then the body.
/// `Ok(None)` means the peer closed the stream mid-frame.
pub(crate) async fn read_content_length_frame<R>(
    reader: &mut R,
    mut header: String,
) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = parse_content_length_header(&header);
    loop {
        if header.trim_end().is_empty() {
            break;
        }
        header.clear();
        if reader.read_line(&mut header).await? == 0 {
            return Ok(None);
        }
        if content_length.is_none() {
            content_length = parse_content_length_header(&header);
        }
    }

    let Some(len) = content_length else {
        return Err(invalid_data("Missing Content-Length header"));
    };
    if len > MAX_FRAME_BYTES {
        return Err(invalid_data("Content-Length exceeds max allowed size"));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Next request body from `reader`, detecting the framing on the first non-empty line.
/// `Ok(None)` is end of input.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    mode: &mut Option<TransportMode>,
) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line.len() > MAX_FRAME_BYTES {
            return Err(invalid_data("frame exceeds max allowed size"));
        }

        let current = match *mode {
            Some(current) => current,
            None => match detect_mode_from_first_line(&line) {
                Some(detected) => {
                    tracing::debug!(mode = ?detected, "detected stdio framing");
                    *mode = Some(detected);
                    detected
                }
                None => continue,
            },
        };

        match current {
            TransportMode::NewlineJson => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                return Ok(Some(raw.as_bytes().to_vec()));
            }
            TransportMode::ContentLength => {
                if line.trim().is_empty() {
                    continue;
                }
                return read_content_length_frame(reader, line).await;
            }
        }
    }
}

pub(crate) fn encode_frame(mode: TransportMode, resp: &Value) -> Vec<u8> {
    let body = serde_json::to_vec(resp).unwrap_or_else(|_| b"{}".to_vec());
    match mode {
        TransportMode::NewlineJson => {
            let mut out = body;
            out.push(b'\n');
            out
        }
        TransportMode::ContentLength => {
            let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
            out.extend_from_slice(&body);
            out
        }
    }
}

pub(crate) fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, Value> {
    let data: Value = serde_json::from_slice(body)
        .map_err(|e| json_rpc_error(None, PARSE_ERROR, &format!("Parse error: {e}")))?;

    let (id, has_method) = match data.as_object() {
        Some(obj) => (obj.get("id").cloned(), obj.contains_key("method")),
        None => return Err(json_rpc_error(None, INVALID_REQUEST, "Invalid Request")),
    };
    if !has_method {
        return Err(json_rpc_error(id, INVALID_REQUEST, "Invalid Request"));
    }

    serde_json::from_value::<JsonRpcRequest>(data)
        .map_err(|e| json_rpc_error(id, INVALID_REQUEST, &format!("Invalid Request: {e}")))
}
