#![forbid(unsafe_code)]

mod definitions;
mod dispatch;
mod jobs;
mod proxy;

pub(crate) use definitions::tool_definitions;
pub(crate) use dispatch::dispatch_tool;

use serde_json::Value;

/// What a tool hands back to `tools/call`.
#[derive(Debug, PartialEq)]
pub(crate) enum ToolReply {
    /// Payload rendered as a single text content block.
    Payload { body: Value, is_error: bool },
    /// A peer's `tools/call` result, returned untouched.
    Passthrough(Value),
}

impl ToolReply {
    pub(crate) fn ok(body: Value) -> Self {
        Self::Payload {
            body,
            is_error: false,
        }
    }

    pub(crate) fn error(body: Value) -> Self {
        Self::Payload {
            body,
            is_error: true,
        }
    }

    pub(crate) fn error_message(message: impl Into<String>) -> Self {
        Self::error(Value::String(message.into()))
    }

    pub(crate) fn into_result(self) -> Value {
        match self {
            Self::Payload { body, is_error } => crate::tool_result(&body, is_error),
            Self::Passthrough(result) => result,
        }
    }
}
