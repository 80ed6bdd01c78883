#![forbid(unsafe_code)]

use async_trait::async_trait;
use cg_storage::JobRow;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};

#[cfg(unix)]
const TTY_PATH: &str = "/dev/tty";
#[cfg(not(unix))]
const TTY_PATH: &str = "CON";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("no interactive terminal available: {0}")]
    Unavailable(String),
    #[error("approval prompt was closed")]
    Closed,
    #[error("approval prompt failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Human decision point between queuing and execution.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn ask(&self, job: &JobRow) -> Result<Decision, GateError>;

    async fn close(&self) -> Result<(), GateError> {
        Ok(())
    }
}

/// `y`/`yes` approve, `n`/`no` reject; anything else is unintelligible and re-prompted.
pub fn parse_answer(raw: &str) -> Option<Decision> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(Decision::Approve),
        "n" | "no" => Some(Decision::Reject),
        _ => None,
    }
}

fn prompt_text(job: &JobRow) -> String {
    format!(
        "\n[cmdgate] job #{} requests:\n  {}\nApprove? [y/n]: ",
        job.id, job.command
    )
}

#[derive(Debug)]
struct Tty {
    reader: BufReader<File>,
    writer: File,
}

impl Tty {
    fn ask(&mut self, prompt: &str) -> Result<Decision, GateError> {
        self.writer.write_all(prompt.as_bytes())?;
        self.writer.flush()?;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(GateError::Closed);
            }
            if let Some(decision) = parse_answer(&line) {
                return Ok(decision);
            }
            self.writer.write_all(b"Please answer y or n: ")?;
            self.writer.flush()?;
        }
    }
}

/// Gate bound to the controlling terminal, so prompts never mix with the stdio transport.
#[derive(Debug, Clone)]
pub struct TerminalGate {
    tty: Arc<Mutex<Option<Tty>>>,
}

impl TerminalGate {
    pub fn open() -> Result<Self, GateError> {
        let writer = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TTY_PATH)
            .map_err(|err| GateError::Unavailable(format!("{TTY_PATH}: {err}")))?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self {
            tty: Arc::new(Mutex::new(Some(Tty { reader, writer }))),
        })
    }
}

#[async_trait]
impl ApprovalGate for TerminalGate {
    async fn ask(&self, job: &JobRow) -> Result<Decision, GateError> {
        let prompt = prompt_text(job);
        let tty = Arc::clone(&self.tty);
        tokio::task::spawn_blocking(move || {
            let mut guard = tty.lock().map_err(|_| GateError::Closed)?;
            let tty = guard.as_mut().ok_or(GateError::Closed)?;
            tty.ask(&prompt)
        })
        .await
        .unwrap_or(Err(GateError::Closed))
    }

    async fn close(&self) -> Result<(), GateError> {
        // A prompt still blocked on a read keeps the lock; that thread is abandoned with the
        // process.
        match self.tty.try_lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(_) => tracing::debug!("terminal gate busy; leaving the pending read behind"),
        }
        Ok(())
    }
}

/// Gate that answers from a fixed script of replies, re-prompting past unintelligible ones.
/// Running out of replies closes the gate.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<i64>>,
}

impl ScriptedGate {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Ids of the jobs asked about, one entry per prompt shown (re-prompts included).
    pub fn prompts(&self) -> Vec<i64> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self) -> Option<String> {
        self.replies.lock().ok()?.pop_front()
    }

    fn record_prompt(&self, id: i64) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(id);
        }
    }
}

#[async_trait]
impl ApprovalGate for ScriptedGate {
    async fn ask(&self, job: &JobRow) -> Result<Decision, GateError> {
        loop {
            self.record_prompt(job.id);
            let reply = self.next_reply().ok_or(GateError::Closed)?;
            if let Some(decision) = parse_answer(&reply) {
                return Ok(decision);
            }
        }
    }
}
