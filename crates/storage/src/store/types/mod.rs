#![forbid(unsafe_code)]

mod jobs;

pub use jobs::*;
