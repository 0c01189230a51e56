//! Error types for the debugger front-end
//!
//! User-command failures carry enough context for the dispatcher to print
//! an actionable message and return to the prompt.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debugger front-end
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    #[error("no debug session is active")]
    NoActiveSession,

    #[error("the target is not running yet. Use 'run' to start it")]
    NotRunning,

    #[error("the target is not stopped. Use 'pause' to break in")]
    NotStopped,

    // === Lookup Errors ===
    #[error("breakpoint {index} not found")]
    BreakpointNotFound { index: usize },

    #[error("no breakpoint carries adapter id {id}")]
    BreakpointIdNotFound { id: i64 },

    #[error("thread {0} not found")]
    ThreadNotFound(i64),

    #[error("frame {0} is out of range")]
    FrameNotFound(usize),

    // === Capability Errors ===
    #[error("the debug adapter does not support {0}")]
    UnsupportedCapability(&'static str),

    // === User Input Errors ===
    #[error("invalid breakpoint location: {0}")]
    InvalidLocation(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    // === Adapter Errors ===
    #[error("debug adapter failed to start: {0}")]
    AdapterStartFailed(String),

    #[error("debug adapter exited unexpectedly")]
    AdapterCrashed,

    #[error("DAP request '{command}' failed: {message}")]
    AdapterRequestFailed { command: String, message: String },

    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("operation aborted")]
    Aborted,

    // === Configuration Errors ===
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an adapter request failed error
    pub fn adapter_request_failed(command: &str, message: &str) -> Self {
        Self::AdapterRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// True when the error came from the adapter rejecting a request,
    /// as opposed to a front-end validation failure.
    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            Self::AdapterRequestFailed { .. } | Self::AdapterCrashed | Self::DapProtocol(_)
        )
    }
}
