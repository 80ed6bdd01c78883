#![forbid(unsafe_code)]

mod tokenize;
mod types;

pub use tokenize::*;
pub use types::*;
