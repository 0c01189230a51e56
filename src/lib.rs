//! Interactive command-line debugger front-end for DAP adapters
//!
//! This library holds the debugger engine: the session state machine,
//! the thread and breakpoint registries, the source cache, and the
//! command contract the REPL dispatcher drives.

pub mod adapter;
pub mod common;
pub mod console;
pub mod dap;
pub mod engine;
pub mod repl;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{Debugger, SessionState};
