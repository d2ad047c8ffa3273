//! Command invocation results and result codes

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Result code reported by a device command
///
/// Commands that complete synchronously report a terminal code directly.
/// Long running commands return `Queued` or `Started` from the initial
/// invocation and report their terminal code later through an event on the
/// `command_result` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    Started,
    Queued,
    Failed,
    Aborted,
    Rejected,
    NotAllowed,
}

impl ResultCode {
    /// Whether this code means the command will report completion later
    pub fn is_in_progress(&self) -> bool {
        matches!(self, ResultCode::Started | ResultCode::Queued)
    }

    /// Whether this code is terminal (no further reporting expected)
    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    /// Whether this code indicates definite failure
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ResultCode::Failed | ResultCode::Aborted | ResultCode::Rejected | ResultCode::NotAllowed
        )
    }

    /// The codes treated as definite failure for long running commands
    pub fn error_codes() -> &'static [ResultCode] {
        &[
            ResultCode::Failed,
            ResultCode::Aborted,
            ResultCode::Rejected,
            ResultCode::NotAllowed,
        ]
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::Ok => "OK",
            ResultCode::Started => "STARTED",
            ResultCode::Queued => "QUEUED",
            ResultCode::Failed => "FAILED",
            ResultCode::Aborted => "ABORTED",
            ResultCode::Rejected => "REJECTED",
            ResultCode::NotAllowed => "NOT_ALLOWED",
        };
        write!(f, "{s}")
    }
}

/// The outcome of one command invocation
///
/// The `id` pairs an invocation with its later completion event for long
/// running commands. Ids are ULIDs generated at invocation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Unique id of the invocation
    pub id: String,

    /// Result code reported by the device
    pub code: ResultCode,

    /// Optional message or payload returned by the device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    /// Create a result with a fresh ULID id
    pub fn new(code: ResultCode) -> Self {
        Self {
            id: Ulid::new().to_string(),
            code,
            message: None,
        }
    }

    /// Create a result for a known invocation id
    pub fn with_id(id: impl Into<String>, code: ResultCode) -> Self {
        Self {
            id: id.into(),
            code,
            message: None,
        }
    }

    /// Attach a message to the result
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "[{}] {} ({})", self.id, self.code, msg),
            None => write!(f, "[{}] {}", self.id, self.code),
        }
    }
}
