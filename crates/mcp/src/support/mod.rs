#![forbid(unsafe_code)]

mod jsonrpc;
mod logging;
mod runtime;
mod time;

pub(crate) use jsonrpc::*;
pub(crate) use logging::*;
pub(crate) use runtime::*;
pub(crate) use time::*;
