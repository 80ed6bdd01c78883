#![forbid(unsafe_code)]

mod config;
mod entry;
mod proxy;
mod server;
mod support;
mod tools;

pub(crate) use support::*;

use cg_runner::{
    ApprovalGate, ApprovalLoop, ApprovalQueue, JobRunner, JobStore, ShellExecutor, TerminalGate,
};
use cg_storage::SqliteStore;
use config::PeersFile;
use proxy::{DefaultConnectorFactory, PeerRegistry, PeerResolver, ProxyClient};
use server::McpServer;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Some MCP clients are strict about the server echoing a compatible protocol version.
const MCP_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "cmdgate";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn usage() -> &'static str {
    "cg_mcp: cmdgate MCP server: operator-approved shell commands and MCP proxying\n\n\
USAGE:\n\
  cg_mcp [--storage-dir DIR] [--peers-config PATH] [--persist-peers]\n\
         [--exec-timeout-ms MS] [--exec-max-output-bytes N]\n\
         [--proxy-timeout-ms MS] [--no-tty]\n\
\n\
FLAGS:\n\
  -h, --help       Print this help and exit\n\
  -V, --version    Print version and exit\n\
\n\
NOTES:\n\
  - Every flag has a CMDGATE_* environment fallback; flags win.\n\
  - Without a controlling terminal (or with --no-tty) every job is rejected.\n"
}

fn version_line() -> String {
    format!("cg_mcp {SERVER_VERSION} (protocol {MCP_VERSION})")
}

fn main() -> ExitCode {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print!("{}", usage());
        return ExitCode::SUCCESS;
    }
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
    {
        println!("{}", version_line());
        return ExitCode::SUCCESS;
    }

    init_logging();

    let config = match GatewayConfig::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(serve(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    code
}

fn open_gate(config: &GatewayConfig) -> Option<Arc<dyn ApprovalGate>> {
    if config.no_tty {
        tracing::info!("terminal prompts disabled; jobs will be rejected");
        return None;
    }
    match TerminalGate::open() {
        Ok(gate) => Some(Arc::new(gate)),
        Err(err) => {
            tracing::warn!(error = %err, "no controlling terminal; jobs will be rejected");
            None
        }
    }
}

fn build_proxy(config: &GatewayConfig) -> Result<ProxyClient, String> {
    let (file, peers) = match config.peers_path() {
        Some(path) => {
            let (file, peers) = PeersFile::load(path).map_err(|err| err.to_string())?;
            (Some(file), peers)
        }
        None => (None, Default::default()),
    };
    let persistence = if config.persist_peers { file } else { None };
    let registry = Arc::new(PeerRegistry::new(peers));
    tracing::info!(peers = registry.len(), "peer registry loaded");
    let resolver = PeerResolver::new(registry, persistence);
    Ok(ProxyClient::new(
        resolver,
        Arc::new(DefaultConnectorFactory),
        config.proxy_timeout,
    ))
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    tracing::warn!(error = %err, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("interrupt received");
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
                _ = term.recv() => tracing::info!("terminate received"),
                _ = shutdown.cancelled() => return,
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
                _ = shutdown.cancelled() => return,
            }
        }
        shutdown.cancel();
    });
}

async fn serve(config: GatewayConfig) -> ExitCode {
    let store = match SqliteStore::open(&config.storage_dir) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, dir = %config.storage_dir.display(), "failed to open job store");
            return ExitCode::FAILURE;
        }
    };
    let jobs = JobStore::new(store);
    if let Ok(counts) = jobs.status_counts().await {
        tracing::info!(
            pending = counts.pending,
            running = counts.running,
            completed = counts.completed,
            failed = counts.failed,
            rejected = counts.rejected,
            "job store opened"
        );
    }

    let proxy = match build_proxy(&config) {
        Ok(proxy) => Arc::new(proxy),
        Err(err) => {
            tracing::error!(error = %err, "failed to load peers file");
            let _ = jobs.close().await;
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let queue = Arc::new(ApprovalQueue::new(jobs.clone(), shutdown.clone()));
    let gate = open_gate(&config);
    let runner = JobRunner::new(
        jobs.clone(),
        Arc::new(ShellExecutor),
        config.exec_limits,
    );
    let approval = ApprovalLoop::new(queue.clone(), gate.clone(), runner);
    let mut approval_task = tokio::spawn(approval.run(shutdown.clone()));
    spawn_signal_listener(shutdown.clone());

    let server = Arc::new(McpServer::new(jobs.clone(), queue, proxy.clone()));
    let mut faulted = false;
    let mut loop_done = None;
    tokio::select! {
        result = entry::run_stdio(server, shutdown.clone()) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "transport failed");
                faulted = true;
            }
        }
        joined = &mut approval_task => {
            if !shutdown.is_cancelled() {
                tracing::error!("approval loop exited early");
                faulted = true;
            }
            loop_done = Some(joined);
        }
    }

    tracing::info!("shutting down");
    shutdown.cancel();

    let joined = match loop_done {
        Some(joined) => Some(joined),
        None => {
            let bound = config.exec_limits.timeout + SHUTDOWN_GRACE;
            match tokio::time::timeout(bound, &mut approval_task).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    tracing::warn!("approval loop did not stop in time");
                    approval_task.abort();
                    let _ = (&mut approval_task).await;
                    match jobs.fail_interrupted().await {
                        Ok(ids) if !ids.is_empty() => {
                            tracing::warn!(jobs = ?ids, "marked aborted jobs failed")
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "failed to mark aborted jobs"),
                    }
                    None
                }
            }
        }
    };
    if let Some(Err(err)) = joined {
        tracing::error!(error = %err, "approval loop panicked");
        faulted = true;
    }

    if let Some(gate) = gate
        && let Err(err) = gate.close().await
    {
        tracing::warn!(error = %err, "failed to close terminal");
    }
    tracing::info!(
        sessions = proxy.session_count().await,
        peers = proxy.resolver().registry().len(),
        "closing peer sessions"
    );
    proxy.close_all().await;
    if let Err(err) = jobs.close().await {
        tracing::warn!(error = %err, "failed to close job store");
    }
    tracing::info!("shutdown complete");

    if faulted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
