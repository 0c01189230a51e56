//! Breakpoint registry
//!
//! Breakpoints carry two identities. The index is the user-facing
//! handle: dense, assigned at creation, never reused, and stable across
//! adapter sessions. The adapter id is volatile, arrives with a
//! setBreakpoints response, and is used only to match incoming
//! breakpoint events. The two must never be conflated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

/// Enablement state of a breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    Enabled,
    Disabled,
    /// Auto-disables the first time it is hit
    Once,
}

/// Where a breakpoint binds
#[derive(Debug, Clone)]
pub enum BreakpointKind {
    Source {
        path: PathBuf,
        line: u32,
    },
    /// A function breakpoint, plus the source location the adapter
    /// resolved it to, if any
    Function {
        name: String,
        path: Option<PathBuf>,
        line: Option<u32>,
    },
}

/// A user breakpoint
#[derive(Debug, Clone)]
pub struct Breakpoint {
    index: usize,
    id: Option<i64>,
    kind: BreakpointKind,
    state: BreakpointState,
    verified: bool,
    message: Option<String>,
}

impl Breakpoint {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Adapter-assigned id, absent until a response carried one
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn kind(&self) -> &BreakpointKind {
        &self.kind
    }

    pub fn state(&self) -> BreakpointState {
        self.state
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, BreakpointKind::Source { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, BreakpointKind::Function { .. })
    }

    /// Enabled or once; the states sent to the adapter
    pub fn is_active(&self) -> bool {
        matches!(self.state, BreakpointState::Enabled | BreakpointState::Once)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            BreakpointKind::Source { path, .. } => Some(path),
            BreakpointKind::Function { path, .. } => path.as_deref(),
        }
    }

    pub fn line(&self) -> Option<u32> {
        match &self.kind {
            BreakpointKind::Source { line, .. } => Some(*line),
            BreakpointKind::Function { line, .. } => *line,
        }
    }

    pub fn function_name(&self) -> Option<&str> {
        match &self.kind {
            BreakpointKind::Function { name, .. } => Some(name),
            BreakpointKind::Source { .. } => None,
        }
    }

    /// Flip enabled/disabled; once collapses to disabled
    fn toggle_state(&mut self) {
        self.state = match self.state {
            BreakpointState::Enabled | BreakpointState::Once => BreakpointState::Disabled,
            BreakpointState::Disabled => BreakpointState::Enabled,
        };
    }
}

/// Registry of all user breakpoints
#[derive(Debug, Default)]
pub struct BreakpointCollection {
    breakpoints: BTreeMap<usize, Breakpoint>,
    next_index: usize,
    once_supported: bool,
}

impl BreakpointCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the once state may be used
    ///
    /// Requires the adapter to report breakpoint ids on stop events;
    /// the engine flips this after the initialize response.
    pub fn supports_once_state(&self) -> bool {
        self.once_supported
    }

    pub fn enable_once_state(&mut self) {
        self.once_supported = true;
    }

    fn allocate(&mut self, kind: BreakpointKind, once: bool) -> Result<usize> {
        if once && !self.once_supported {
            return Err(Error::UnsupportedCapability("one-shot breakpoints"));
        }
        let index = self.next_index;
        self.next_index += 1;
        self.breakpoints.insert(
            index,
            Breakpoint {
                index,
                id: None,
                kind,
                state: if once {
                    BreakpointState::Once
                } else {
                    BreakpointState::Enabled
                },
                verified: false,
                message: None,
            },
        );
        Ok(index)
    }

    pub fn add_source_breakpoint(&mut self, path: &Path, line: u32, once: bool) -> Result<usize> {
        self.allocate(
            BreakpointKind::Source {
                path: path.to_path_buf(),
                line,
            },
            once,
        )
    }

    pub fn add_function_breakpoint(&mut self, name: &str, once: bool) -> Result<usize> {
        self.allocate(
            BreakpointKind::Function {
                name: name.to_string(),
                path: None,
                line: None,
            },
            once,
        )
    }

    pub fn delete_breakpoint(&mut self, index: usize) -> Result<Breakpoint> {
        self.breakpoints
            .remove(&index)
            .ok_or(Error::BreakpointNotFound { index })
    }

    pub fn delete_all_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn get_breakpoint_by_index(&self, index: usize) -> Result<&Breakpoint> {
        self.breakpoints
            .get(&index)
            .ok_or(Error::BreakpointNotFound { index })
    }

    /// Index of the breakpoint carrying the given adapter id
    pub fn index_for_id(&self, id: i64) -> Result<usize> {
        self.breakpoints
            .values()
            .find(|b| b.id == Some(id))
            .map(|b| b.index)
            .ok_or(Error::BreakpointIdNotFound { id })
    }

    pub fn get_breakpoint_by_id(&self, id: i64) -> Result<&Breakpoint> {
        let index = self.index_for_id(id)?;
        self.get_breakpoint_by_index(index)
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Breakpoint> {
        self.breakpoints
            .get_mut(&index)
            .ok_or(Error::BreakpointNotFound { index })
    }

    pub fn set_breakpoint_id(&mut self, index: usize, id: i64) -> Result<()> {
        self.get_mut(index)?.id = Some(id);
        Ok(())
    }

    pub fn set_breakpoint_verified(&mut self, index: usize, verified: bool) -> Result<()> {
        self.get_mut(index)?.verified = verified;
        Ok(())
    }

    pub fn set_breakpoint_message(&mut self, index: usize, message: Option<String>) -> Result<()> {
        self.get_mut(index)?.message = message;
        Ok(())
    }

    /// Record the source location an adapter resolved a function
    /// breakpoint to
    pub fn set_path_and_line(&mut self, index: usize, path: &Path, line: u32) -> Result<()> {
        let bp = self.get_mut(index)?;
        match &mut bp.kind {
            BreakpointKind::Function {
                path: resolved_path,
                line: resolved_line,
                ..
            } => {
                *resolved_path = Some(path.to_path_buf());
                *resolved_line = Some(line);
                Ok(())
            }
            BreakpointKind::Source { .. } => Err(Error::Internal(format!(
                "breakpoint {} is not a function breakpoint",
                index
            ))),
        }
    }

    /// Set the enablement state, validating once support
    pub fn set_state(&mut self, index: usize, state: BreakpointState) -> Result<()> {
        if state == BreakpointState::Once && !self.once_supported {
            return Err(Error::UnsupportedCapability("one-shot breakpoints"));
        }
        self.get_mut(index)?.state = state;
        Ok(())
    }

    /// Restore a previously observed state, bypassing validation
    ///
    /// Used for rollback after a failed adapter call and for the
    /// once-to-disabled transition on stop.
    pub fn restore_state(&mut self, index: usize, state: BreakpointState) -> Result<()> {
        self.get_mut(index)?.state = state;
        Ok(())
    }

    pub fn toggle(&mut self, index: usize) -> Result<BreakpointState> {
        let bp = self.get_mut(index)?;
        bp.toggle_state();
        Ok(bp.state)
    }

    /// Enabled-or-once source breakpoints at `path`, ascending by index
    pub fn get_all_enabled_breakpoints_for_source(&self, path: &Path) -> Vec<Breakpoint> {
        self.breakpoints
            .values()
            .filter(|b| b.is_active() && b.is_source() && b.path() == Some(path))
            .cloned()
            .collect()
    }

    /// Source paths carrying at least one active breakpoint, with their
    /// active breakpoints in index order
    pub fn get_all_enabled_breakpoints_by_path(&self) -> BTreeMap<PathBuf, Vec<Breakpoint>> {
        let mut map: BTreeMap<PathBuf, Vec<Breakpoint>> = BTreeMap::new();
        for b in self.breakpoints.values() {
            if b.is_active() && b.is_source() {
                if let Some(path) = b.path() {
                    map.entry(path.to_path_buf()).or_default().push(b.clone());
                }
            }
        }
        map
    }

    /// Enabled-or-once function breakpoints, ascending by index
    pub fn get_all_enabled_function_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints
            .values()
            .filter(|b| b.is_active() && b.is_function())
            .cloned()
            .collect()
    }

    /// Every source path with any breakpoint, regardless of state
    pub fn get_all_breakpoint_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .breakpoints
            .values()
            .filter(|b| b.is_source())
            .filter_map(|b| b.path().map(Path::to_path_buf))
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    pub fn has_function_breakpoints(&self) -> bool {
        self.breakpoints.values().any(|b| b.is_function())
    }

    /// Every breakpoint, ascending by index
    pub fn all_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}
