#![forbid(unsafe_code)]

use super::framing::{TransportMode, encode_frame, parse_request, read_frame};
use crate::server::McpServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

async fn write_loop(mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(frame) = rx.recv().await {
        stdout.write_all(&frame).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Serves MCP over stdin/stdout until EOF, a transport error, or `shutdown`.
///
/// Framing is detected once from the first non-empty line and used for every response.
/// `tools/call` runs on its own task so slow proxy calls do not block the reader; a single
/// writer task owns stdout.
pub(crate) async fn run_stdio(
    server: Arc<McpServer>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(write_loop(rx));
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut mode: Option<TransportMode> = None;

    let result = loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            frame = read_frame(&mut reader, &mut mode) => frame,
        };
        let body = match frame {
            Ok(Some(body)) => body,
            Ok(None) => {
                tracing::info!("stdin closed");
                break Ok(());
            }
            Err(err) => break Err(err),
        };
        let Some(reply_mode) = mode else {
            continue;
        };

        let request = match parse_request(&body) {
            Ok(request) => request,
            Err(resp) => {
                let _ = tx.send(encode_frame(reply_mode, &resp));
                continue;
            }
        };

        if request.method == "tools/call" && server.is_initialized() {
            let server = Arc::clone(&server);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(resp) = server.handle(request).await {
                    let _ = tx.send(encode_frame(reply_mode, &resp));
                }
            });
        } else if let Some(resp) = server.handle(request).await {
            let _ = tx.send(encode_frame(reply_mode, &resp));
        }
    };

    drop(tx);
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(Err(err))) => tracing::warn!(error = %err, "stdout writer failed"),
        Ok(_) => {}
        Err(_) => tracing::debug!("in-flight responses abandoned at shutdown"),
    }
    result
}
