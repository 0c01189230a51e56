//! Debug Adapter Protocol support
//!
//! Wire types, message framing, and the session transport the engine
//! drives.

pub mod codec;
pub mod session;
pub mod types;

pub use session::{DapSession, StdioSession};
pub use types::*;
