#![forbid(unsafe_code)]

//! Job lifecycle engine: the async store handle, the approval queue, the human gate and the
//! single-consumer loop that runs approved commands.

pub mod exec;
pub mod gate;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod store;

pub use cg_storage::{JobRow, JobUpdate, StoreError};
pub use exec::{CommandExecutor, ExecExit, ExecLimits, ExecOutcome, ShellExecutor};
pub use gate::{ApprovalGate, Decision, GateError, ScriptedGate, TerminalGate, parse_answer};
pub use pipeline::{ApprovalLoop, LoopSummary};
pub use queue::ApprovalQueue;
pub use runner::JobRunner;
pub use store::JobStore;
