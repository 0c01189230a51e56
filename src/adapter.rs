//! Adapter descriptors
//!
//! Everything the engine needs to know about one debug adapter: how to
//! spawn it, whether it launches or attaches, and the adapter-specific
//! transformations applied to launch/attach arguments and evaluated
//! expressions.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

/// How the session acquires a debuggee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterAction {
    Launch,
    Attach,
}

/// Adapter family, for specialized argument handling
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// lldb-dap (LLVM debugger)
    #[default]
    LldbDap,
    /// debugpy (Python debugger)
    Debugpy,
    /// Generic DAP adapter (no special handling)
    Generic,
}

/// Description of one configured debug adapter
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    /// Adapter executable
    pub command: PathBuf,
    /// Arguments for the adapter process itself
    pub args: Vec<String>,
    pub kind: AdapterKind,
    pub action: AdapterAction,
    /// Raw launch argument blob, transformed before sending
    pub launch_arguments: Value,
    /// Raw attach argument blob, transformed before sending
    pub attach_arguments: Value,
    /// Thread to pause after attaching, when the adapter names one
    pub async_stop_thread: Option<i64>,
}

impl AdapterDescriptor {
    /// Identifier sent in the initialize request
    pub fn adapter_id(&self) -> &'static str {
        match self.kind {
            AdapterKind::LldbDap => "lldb-dap",
            AdapterKind::Debugpy => "debugpy",
            AdapterKind::Generic => "dap",
        }
    }

    /// Whether the adapter accepts multi-line code blocks in evaluate
    pub fn supports_code_blocks(&self) -> bool {
        matches!(self.kind, AdapterKind::Debugpy)
    }

    /// Adapter-specific launch argument transformation
    pub fn transform_launch_arguments(&self) -> Value {
        let mut args = self.launch_arguments.clone();
        match self.kind {
            // debugpy insists on an explicit request discriminator.
            AdapterKind::Debugpy => {
                if let Value::Object(map) = &mut args {
                    map.entry("request".to_string())
                        .or_insert_with(|| Value::String("launch".to_string()));
                    map.entry("console".to_string())
                        .or_insert_with(|| Value::String("internalConsole".to_string()));
                }
                args
            }
            AdapterKind::LldbDap | AdapterKind::Generic => args,
        }
    }

    /// Adapter-specific attach argument transformation
    pub fn transform_attach_arguments(&self) -> Value {
        let mut args = self.attach_arguments.clone();
        match self.kind {
            AdapterKind::Debugpy => {
                if let Value::Object(map) = &mut args {
                    map.entry("request".to_string())
                        .or_insert_with(|| Value::String("attach".to_string()));
                }
                args
            }
            AdapterKind::LldbDap | AdapterKind::Generic => args,
        }
    }

    /// Adapter-specific expression rewriting for evaluate
    pub fn transform_expression(&self, expression: &str, is_block: bool) -> String {
        match self.kind {
            // lldb-dap evaluates REPL input as commands unless the
            // expression is marked explicitly.
            AdapterKind::LldbDap if !expression.starts_with('`') => {
                format!("`{}", expression)
            }
            AdapterKind::Debugpy if is_block => {
                // Blocks run as statements; strip the trailing newline the
                // REPL keeps for continuation detection.
                expression.trim_end().to_string()
            }
            _ => expression.to_string(),
        }
    }
}
