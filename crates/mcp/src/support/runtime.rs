#![forbid(unsafe_code)]

use cg_runner::ExecLimits;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_STORAGE_DIR: &str = ".cmdgate";
pub(crate) const DEFAULT_PROXY_TIMEOUT_MS: u64 = 60_000;

/// Settings resolved from flags first, then `CMDGATE_*` environment variables.
#[derive(Clone, Debug)]
pub(crate) struct GatewayConfig {
    pub(crate) storage_dir: PathBuf,
    pub(crate) peers_config: Option<PathBuf>,
    pub(crate) persist_peers: bool,
    pub(crate) exec_limits: ExecLimits,
    pub(crate) proxy_timeout: Duration,
    pub(crate) no_tty: bool,
}

impl GatewayConfig {
    pub(crate) fn from_args(args: &[String]) -> Result<Self, String> {
        let defaults = ExecLimits::default();
        let exec_timeout_ms =
            parse_u64_setting(args, "--exec-timeout-ms", "CMDGATE_EXEC_TIMEOUT_MS")?;
        let exec_max_output_bytes = parse_u64_setting(
            args,
            "--exec-max-output-bytes",
            "CMDGATE_EXEC_MAX_OUTPUT_BYTES",
        )?;
        let proxy_timeout_ms =
            parse_u64_setting(args, "--proxy-timeout-ms", "CMDGATE_PROXY_TIMEOUT_MS")?;

        let max_output_bytes = match exec_max_output_bytes {
            Some(n) => usize::try_from(n)
                .map_err(|_| "--exec-max-output-bytes is too large".to_string())?,
            None => defaults.max_output_bytes,
        };

        Ok(Self {
            storage_dir: parse_storage_dir(args),
            peers_config: parse_peers_config(args),
            persist_peers: parse_switch(args, "--persist-peers", "CMDGATE_PERSIST_PEERS"),
            exec_limits: ExecLimits {
                timeout: exec_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.timeout),
                max_output_bytes,
            },
            proxy_timeout: Duration::from_millis(
                proxy_timeout_ms.unwrap_or(DEFAULT_PROXY_TIMEOUT_MS),
            ),
            no_tty: parse_switch(args, "--no-tty", "CMDGATE_NO_TTY"),
        })
    }

    /// Peers file read at startup. With `--persist-peers` and no explicit file, newly
    /// registered peers go to `<storage_dir>/peers.json`.
    pub(crate) fn peers_path(&self) -> Option<PathBuf> {
        match (&self.peers_config, self.persist_peers) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(self.storage_dir.join("peers.json")),
            (None, false) => None,
        }
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.as_str() == flag {
            return iter.next().cloned();
        }
        if let Some(value) = arg
            .strip_prefix(flag)
            .and_then(|rest| rest.strip_prefix('='))
        {
            return Some(value.to_string());
        }
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg.as_str() == flag)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_storage_dir(args: &[String]) -> PathBuf {
    flag_value(args, "--storage-dir")
        .or_else(|| env_value("CMDGATE_STORAGE_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR))
}

pub(crate) fn parse_peers_config(args: &[String]) -> Option<PathBuf> {
    flag_value(args, "--peers-config")
        .or_else(|| env_value("CMDGATE_PEERS_CONFIG"))
        .map(PathBuf::from)
}

fn parse_switch(args: &[String], flag: &str, env_key: &str) -> bool {
    has_flag(args, flag) || parse_bool_env(env_key)
}

fn parse_u64_setting(args: &[String], flag: &str, env_key: &str) -> Result<Option<u64>, String> {
    let (source, raw) = match flag_value(args, flag) {
        Some(raw) => (flag, raw),
        None => match env_value(env_key) {
            Some(raw) => (env_key, raw),
            None => return Ok(None),
        },
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(format!("{source} must be greater than zero")),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(format!("{source} must be a positive integer, got '{raw}'")),
    }
}

fn parse_bool_env(key: &str) -> bool {
    let Ok(value) = std::env::var(key) else {
        return false;
    };
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
