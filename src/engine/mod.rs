//! Debugger engine
//!
//! The session state machine. Drives the adapter through a `DapSession`,
//! consumes its event stream, reconciles the breakpoint registry with
//! the adapter, and gates REPL input on the console.
//!
//! Everything runs on a single-threaded cooperative scheduler: at any
//! instant either a command handler or an event handler is executing,
//! never both. Suspension points are exactly the awaits on outstanding
//! DAP requests, so every mutator must leave the registry consistent
//! before any await.

pub mod breakpoints;
pub mod source_cache;
pub mod threads;

use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use futures_util::future::join_all;
use serde_json::Value;

use crate::adapter::{AdapterAction, AdapterDescriptor};
use crate::common::{Error, Result};
use crate::console::ConsoleIO;
use crate::dap::{self, DapSession, Event, InitializeArguments};
use crate::repl::Command;

pub use breakpoints::{Breakpoint, BreakpointCollection, BreakpointKind, BreakpointState};
pub use source_cache::SourceFileCache;
pub use threads::{Thread, ThreadCollection};

/// Message attached to breakpoints created before the target starts
const PENDING_MESSAGE: &str = "Breakpoint pending until program starts.";

/// Constructor for new sessions; called once per launch or relaunch
pub type SessionFactory = Box<dyn FnMut(&AdapterDescriptor) -> Result<Box<dyn DapSession>>>;

/// Engine-level session state; the single source of truth every
/// user-visible operation validates against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created; waiting for the initialized event
    Initializing,
    /// Breakpoint-configuration window before the target runs
    Configuring,
    /// Target executing
    Running,
    /// Target paused at a stop event
    Stopped,
    /// Target gone
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Configuring => write!(f, "configuring"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Result of creating a breakpoint
#[derive(Debug, Clone)]
pub struct AddedBreakpoint {
    pub index: usize,
    pub message: Option<String>,
}

/// One scope plus its variables; `variables` is absent for expensive
/// scopes that were listed but not queried
#[derive(Debug, Clone)]
pub struct ScopeVariables {
    pub scope: dap::Scope,
    pub variables: Option<Vec<dap::Variable>>,
}

enum StepKind {
    Over,
    Into,
    Out,
}

/// The debugger engine
pub struct Debugger {
    console: Rc<dyn ConsoleIO>,
    connect: SessionFactory,
    adapter: Option<AdapterDescriptor>,
    session: Option<Box<dyn DapSession>>,
    capabilities: dap::Capabilities,
    state: SessionState,
    threads: ThreadCollection,
    breakpoints: BreakpointCollection,
    sources: SourceFileCache,
    stop_hooks: Vec<Rc<dyn Command>>,
    exception_filters: Vec<String>,
    mute_output_categories: HashSet<String>,
    /// Set while tearing down a session we initiated; the resulting
    /// adapter-exited event is recognized and ignored
    disconnecting: bool,
    ready_for_evaluations: bool,
    exit_requested: bool,
}

impl Debugger {
    pub fn new(console: Rc<dyn ConsoleIO>, connect: SessionFactory) -> Self {
        let mut mute_output_categories = HashSet::new();
        mute_output_categories.insert("telemetry".to_string());
        Self {
            console,
            connect,
            adapter: None,
            session: None,
            capabilities: dap::Capabilities::default(),
            state: SessionState::Initializing,
            threads: ThreadCollection::new(),
            breakpoints: BreakpointCollection::new(),
            sources: SourceFileCache::new(),
            stop_hooks: Vec::new(),
            exception_filters: Vec::new(),
            mute_output_categories,
            disconnecting: false,
            ready_for_evaluations: false,
            exit_requested: false,
        }
    }

    /// Register a command whose `on_stopped` hook runs on every stop
    pub fn register_command(&mut self, command: Rc<dyn Command>) {
        self.stop_hooks.push(command);
    }

    // === Inspection ===

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn adapter_caps(&self) -> &dap::Capabilities {
        &self.capabilities
    }

    pub fn supports_code_blocks(&self) -> bool {
        self.adapter
            .as_ref()
            .map(AdapterDescriptor::supports_code_blocks)
            .unwrap_or(false)
    }

    pub fn supports_stopped_at_breakpoint(&self) -> bool {
        self.capabilities.supports_breakpoint_id_on_stop
    }

    pub fn console(&self) -> &Rc<dyn ConsoleIO> {
        &self.console
    }

    pub fn focus_thread_id(&self) -> Option<i64> {
        self.threads.focus_thread_id()
    }

    pub fn set_focus_thread(&mut self, id: i64) -> Result<()> {
        self.threads.set_focus_thread(id)
    }

    pub fn threads_snapshot(&self) -> Vec<Thread> {
        self.threads.all_threads().cloned().collect()
    }

    /// Whether the host should exit; set on attach-mode termination and
    /// by the quit command
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    // === Session lifecycle ===

    /// Start a debug session against `adapter`
    ///
    /// Initializes a fresh breakpoint registry, then relaunches.
    pub async fn launch(&mut self, adapter: AdapterDescriptor) -> Result<()> {
        self.adapter = Some(adapter);
        self.breakpoints = BreakpointCollection::new();
        self.relaunch().await
    }

    /// Tear down the current session and start a new one
    ///
    /// Breakpoints survive; they are re-sent once the new session
    /// reaches running.
    pub async fn relaunch(&mut self) -> Result<()> {
        let adapter = self.adapter.clone().ok_or(Error::NoActiveSession)?;

        if let Some(session) = self.session.take() {
            self.disconnecting = true;
            let _ = session
                .disconnect(adapter.action == AdapterAction::Launch)
                .await;
        }
        self.threads.clear();
        self.sources.flush();
        self.ready_for_evaluations = false;
        self.state = SessionState::Initializing;

        let session = (self.connect)(&adapter)?;

        let caps = match session
            .initialize(InitializeArguments::new(adapter.adapter_id()))
            .await
        {
            Ok(caps) => caps,
            Err(e) => self.fatal_launch_failure(e),
        };
        self.capabilities = caps.clone();
        if caps.supports_breakpoint_id_on_stop {
            self.breakpoints.enable_once_state();
        }

        self.session = Some(session);
        let session = match self.session.as_deref() {
            Some(s) => s,
            None => return Err(Error::NoActiveSession),
        };
        let result = match adapter.action {
            AdapterAction::Launch => session.launch(adapter.transform_launch_arguments()).await,
            AdapterAction::Attach => session.attach(adapter.transform_attach_arguments()).await,
        };
        if let Err(e) = result {
            self.fatal_launch_failure(e);
        }
        Ok(())
    }

    // Legacy front-end behavior: a session that cannot start is not an
    // error the prompt can recover from.
    fn fatal_launch_failure(&self, e: Error) -> ! {
        self.console
            .output_line(&format!("Failed to start the debug session: {}", e));
        tracing::error!("fatal launch failure: {}", e);
        std::process::exit(0);
    }

    /// Finish configuration and let the target run (launch mode)
    pub async fn run(&mut self) -> Result<()> {
        let adapter = self.adapter.as_ref().ok_or(Error::NoActiveSession)?;
        if adapter.action == AdapterAction::Attach {
            return Err(Error::Internal(
                "the target is attached and already running".to_string(),
            ));
        }
        match self.state {
            SessionState::Configuring => {}
            SessionState::Running | SessionState::Stopped => {
                return Err(Error::Internal("the target is already running".to_string()))
            }
            _ => return Err(Error::NotRunning),
        }

        self.reset_all_breakpoints().await?;
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        if self.capabilities.supports_configuration_done_request {
            session.configuration_done().await?;
        }
        self.state = SessionState::Running;
        self.console.stop_input();
        Ok(())
    }

    /// Disconnect and drop the session
    pub async fn close_session(&mut self) -> Result<()> {
        self.disconnecting = true;
        if let Some(session) = self.session.take() {
            let terminate = self
                .adapter
                .as_ref()
                .map(|a| a.action == AdapterAction::Launch)
                .unwrap_or(true);
            let _ = session.disconnect(terminate).await;
        }
        self.threads.clear();
        self.sources.flush();
        self.state = SessionState::Terminated;
        Ok(())
    }

    // === Execution control ===

    pub async fn continue_execution(&mut self) -> Result<()> {
        self.ensure_stopped()?;
        let thread_id = self.focus_or_first_stopped()?;
        // Output can arrive between the request and the continued
        // event; stop the prompt at the request site.
        self.console.stop_input();
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        match session.continue_execution(thread_id).await {
            Ok(all_threads) => {
                if all_threads {
                    self.threads.mark_all_threads_running();
                } else {
                    self.threads.mark_thread_running(thread_id);
                }
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                self.console.start_input();
                Err(e)
            }
        }
    }

    pub async fn step_over(&mut self) -> Result<()> {
        self.step(StepKind::Over).await
    }

    pub async fn step_in(&mut self) -> Result<()> {
        self.step(StepKind::Into).await
    }

    pub async fn step_out(&mut self) -> Result<()> {
        self.step(StepKind::Out).await
    }

    async fn step(&mut self, kind: StepKind) -> Result<()> {
        self.ensure_stopped()?;
        let thread_id = self.focus_or_first_stopped()?;
        self.console.stop_input();
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        let result = match kind {
            StepKind::Over => session.next(thread_id).await,
            StepKind::Into => session.step_in(thread_id).await,
            StepKind::Out => session.step_out(thread_id).await,
        };
        match result {
            Ok(()) => {
                self.threads.mark_thread_running(thread_id);
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                self.console.start_input();
                Err(e)
            }
        }
    }

    /// Break into a running target
    pub async fn pause(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Err(Error::NoActiveSession);
        }
        if self.state != SessionState::Running {
            return Err(Error::NotRunning);
        }

        let known = self
            .threads
            .focus_thread_id()
            .or_else(|| self.threads.all_threads().next().map(Thread::id));
        let thread_id = match known {
            Some(id) => id,
            None => {
                let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
                let list = session.threads().await?;
                self.threads.update_threads(&list);
                list.first()
                    .map(|t| t.id)
                    .ok_or_else(|| Error::Internal("no threads available".to_string()))?
            }
        };

        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        session.pause(thread_id).await
    }

    // === Stack and variable inspection ===

    pub async fn get_stack_trace(
        &mut self,
        thread_id: i64,
        levels: i64,
    ) -> Result<Vec<dap::StackFrame>> {
        if self.session.is_none() {
            return Err(Error::NoActiveSession);
        }
        let thread = self
            .threads
            .get_thread_by_id(thread_id)
            .ok_or(Error::ThreadNotFound(thread_id))?;
        if !thread.is_stopped() {
            return Err(Error::NotStopped);
        }
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        session.stack_trace(thread_id, levels).await
    }

    /// Frame at the focus thread's selected index
    pub async fn get_current_stack_frame(&mut self) -> Result<dap::StackFrame> {
        self.ensure_stopped()?;
        let thread_id = self.focus_or_first_stopped()?;
        let index = self
            .threads
            .get_thread_by_id(thread_id)
            .map(Thread::selected_stack_frame)
            .unwrap_or(0);
        let frames = self.get_stack_trace(thread_id, (index + 1) as i64).await?;
        frames
            .into_iter()
            .nth(index)
            .ok_or(Error::FrameNotFound(index))
    }

    pub async fn set_selected_stack_frame(&mut self, thread_id: i64, index: usize) -> Result<()> {
        let frames = self.get_stack_trace(thread_id, (index + 1) as i64).await?;
        if frames.len() <= index {
            return Err(Error::FrameNotFound(index));
        }
        self.threads
            .get_thread_by_id_mut(thread_id)
            .ok_or(Error::ThreadNotFound(thread_id))?
            .set_selected_stack_frame(index);
        Ok(())
    }

    /// Variables of the selected frame, grouped by scope
    ///
    /// With a scope name, only that scope is queried. Without one, all
    /// non-expensive scopes are queried concurrently; expensive scopes
    /// are listed with their variables absent. Scope order is the
    /// adapter's.
    pub async fn get_variables_by_scope(
        &mut self,
        name: Option<&str>,
    ) -> Result<Vec<ScopeVariables>> {
        let frame = self.get_current_stack_frame().await?;
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        let scopes = session.scopes(frame.id).await?;
        let selected: Vec<dap::Scope> = match name {
            Some(n) => scopes.into_iter().filter(|s| s.name == n).collect(),
            None => scopes,
        };

        let queries = selected.iter().map(|scope| {
            let skip = name.is_none() && scope.expensive;
            async move {
                if skip {
                    Ok(None)
                } else {
                    session.variables(scope.variables_reference).await.map(Some)
                }
            }
        });
        let results = join_all(queries).await;

        let mut out = Vec::with_capacity(selected.len());
        for (scope, variables) in selected.iter().zip(results) {
            out.push(ScopeVariables {
                scope: scope.clone(),
                variables: variables?,
            });
        }
        Ok(out)
    }

    pub async fn get_variables_by_reference(
        &mut self,
        reference: i64,
    ) -> Result<Vec<dap::Variable>> {
        self.ensure_stopped()?;
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        session.variables(reference).await
    }

    // === Evaluation ===

    pub async fn evaluate_expression(
        &mut self,
        expression: &str,
        is_block: bool,
    ) -> Result<dap::EvaluateResponseBody> {
        let adapter = self.adapter.as_ref().ok_or(Error::NoActiveSession)?;
        if is_block && !adapter.supports_code_blocks() {
            return Err(Error::UnsupportedCapability("multi-line code blocks"));
        }
        let expression = adapter.transform_expression(expression, is_block);
        let frame_id = if self.state == SessionState::Stopped {
            Some(self.get_current_stack_frame().await?.id)
        } else {
            None
        };
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        session
            .evaluate(dap::EvaluateArguments {
                expression,
                frame_id,
                context: Some("repl".to_string()),
            })
            .await
    }

    // === Sources ===

    /// Cached lines for a DAP source, fetched through the session for
    /// reference-only sources
    pub async fn get_source_lines(&mut self, source: &dap::Source) -> Result<Vec<String>> {
        if let Some(path) = &source.path {
            return Ok(self.sources.get_by_path(Path::new(path)).to_vec());
        }
        if let Some(reference) = source.source_reference {
            let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
            let lines = self
                .sources
                .get_by_reference(reference, |r| async move { session.source(r).await })
                .await;
            return Ok(lines.to_vec());
        }
        Err(Error::Internal(
            "source has neither path nor reference".to_string(),
        ))
    }

    /// Adapter-reported session information
    pub async fn adapter_info(&mut self) -> Result<Value> {
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        session.info().await
    }

    /// Re-query the thread list and return the refreshed snapshot
    pub async fn refresh_threads(&mut self) -> Result<Vec<Thread>> {
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        let list = session.threads().await?;
        self.threads.update_threads(&list);
        Ok(self.threads_snapshot())
    }

    // === Breakpoint management ===

    pub async fn set_source_breakpoint(
        &mut self,
        path: &Path,
        line: u32,
        once: bool,
    ) -> Result<AddedBreakpoint> {
        let index = self.breakpoints.add_source_breakpoint(path, line, once)?;
        if self.can_send_breakpoints() {
            if let Err(e) = self.sync_source_breakpoints(path).await {
                let _ = self.breakpoints.delete_breakpoint(index);
                return Err(e);
            }
            let message = self
                .breakpoints
                .get_breakpoint_by_index(index)?
                .message()
                .map(str::to_string);
            Ok(AddedBreakpoint { index, message })
        } else {
            let _ = self
                .breakpoints
                .set_breakpoint_message(index, Some(PENDING_MESSAGE.to_string()));
            Ok(AddedBreakpoint {
                index,
                message: Some(PENDING_MESSAGE.to_string()),
            })
        }
    }

    pub async fn set_function_breakpoint(
        &mut self,
        name: &str,
        once: bool,
    ) -> Result<AddedBreakpoint> {
        if !self.capabilities.supports_function_breakpoints {
            return Err(Error::UnsupportedCapability("function breakpoints"));
        }
        let index = self.breakpoints.add_function_breakpoint(name, once)?;
        if self.can_send_breakpoints() {
            if let Err(e) = self.sync_function_breakpoints().await {
                let _ = self.breakpoints.delete_breakpoint(index);
                return Err(e);
            }
            let message = self
                .breakpoints
                .get_breakpoint_by_index(index)?
                .message()
                .map(str::to_string);
            Ok(AddedBreakpoint { index, message })
        } else {
            let _ = self
                .breakpoints
                .set_breakpoint_message(index, Some(PENDING_MESSAGE.to_string()));
            Ok(AddedBreakpoint {
                index,
                message: Some(PENDING_MESSAGE.to_string()),
            })
        }
    }

    pub fn get_all_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.all_breakpoints()
    }

    pub fn get_breakpoint_by_index(&self, index: usize) -> Result<Breakpoint> {
        self.breakpoints.get_breakpoint_by_index(index).cloned()
    }

    pub async fn set_breakpoint_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let prior = self.breakpoints.get_breakpoint_by_index(index)?.state();
        let next = if enabled {
            BreakpointState::Enabled
        } else {
            BreakpointState::Disabled
        };
        if prior == next {
            return Ok(());
        }
        self.breakpoints.restore_state(index, next)?;
        self.resync_after_state_change(index, prior).await
    }

    /// Flip one breakpoint between enabled and disabled
    ///
    /// A failed adapter call rolls the breakpoint back to its prior
    /// state and re-throws.
    pub async fn toggle_breakpoint(&mut self, index: usize) -> Result<()> {
        let prior = self.breakpoints.get_breakpoint_by_index(index)?.state();
        self.breakpoints.toggle(index)?;
        self.resync_after_state_change(index, prior).await
    }

    pub async fn toggle_all_breakpoints(&mut self) -> Result<()> {
        for bp in self.breakpoints.all_breakpoints() {
            self.breakpoints.toggle(bp.index())?;
        }
        self.resync_all_breakpoint_groups().await
    }

    pub async fn set_all_breakpoints_enabled(&mut self, enabled: bool) -> Result<()> {
        let state = if enabled {
            BreakpointState::Enabled
        } else {
            BreakpointState::Disabled
        };
        for bp in self.breakpoints.all_breakpoints() {
            self.breakpoints.restore_state(bp.index(), state)?;
        }
        self.resync_all_breakpoint_groups().await
    }

    pub async fn delete_breakpoint(&mut self, index: usize) -> Result<()> {
        let removed = self.breakpoints.delete_breakpoint(index)?;
        if self.can_send_breakpoints() {
            match removed.kind() {
                BreakpointKind::Source { path, .. } => {
                    let path = path.clone();
                    self.sync_source_breakpoints(&path).await?;
                }
                BreakpointKind::Function { .. } => {
                    self.sync_function_breakpoints().await?;
                }
            }
        }
        Ok(())
    }

    pub async fn delete_all_breakpoints(&mut self) -> Result<()> {
        let paths = self.breakpoints.get_all_breakpoint_paths();
        let had_functions = self.breakpoints.has_function_breakpoints();
        self.breakpoints.delete_all_breakpoints();
        if self.can_send_breakpoints() {
            for path in paths {
                self.sync_source_breakpoints(&path).await?;
            }
            if had_functions {
                self.sync_function_breakpoints().await?;
            }
        }
        Ok(())
    }

    // === Breakpoint reconciliation ===

    fn can_send_breakpoints(&self) -> bool {
        self.session.is_some()
            && matches!(self.state, SessionState::Running | SessionState::Stopped)
    }

    /// Re-establish every breakpoint group on the adapter
    ///
    /// Invoked when a session reaches running and after a one-shot
    /// breakpoint trips.
    async fn reset_all_breakpoints(&mut self) -> Result<()> {
        for path in self.breakpoints.get_all_breakpoint_paths() {
            self.sync_source_breakpoints(&path).await?;
        }
        if self.breakpoints.has_function_breakpoints() {
            self.sync_function_breakpoints().await?;
        }
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        session
            .set_exception_breakpoints(self.exception_filters.clone())
            .await?;
        Ok(())
    }

    /// Replace the adapter's breakpoints for one source
    ///
    /// The request carries the active breakpoints in index order; the
    /// response is paired with it positionally.
    async fn sync_source_breakpoints(&mut self, path: &Path) -> Result<()> {
        let locals = self.breakpoints.get_all_enabled_breakpoints_for_source(path);
        let request: Vec<dap::SourceBreakpoint> = locals
            .iter()
            .map(|b| dap::SourceBreakpoint {
                line: b.line().unwrap_or(0),
                column: None,
                condition: None,
            })
            .collect();
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        let response = session
            .set_breakpoints(dap::Source::from_path(path), request)
            .await?;
        self.apply_breakpoint_response(&locals, &response);
        Ok(())
    }

    async fn sync_function_breakpoints(&mut self) -> Result<()> {
        let locals = self.breakpoints.get_all_enabled_function_breakpoints();
        let request: Vec<dap::FunctionBreakpoint> = locals
            .iter()
            .map(|b| dap::FunctionBreakpoint {
                name: b.function_name().unwrap_or_default().to_string(),
                condition: None,
            })
            .collect();
        let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
        let response = session.set_function_breakpoints(request).await?;
        self.apply_breakpoint_response(&locals, &response);
        Ok(())
    }

    /// Pair request and response lists positionally and record the
    /// adapter's id, verified flag, and message on each local
    fn apply_breakpoint_response(&mut self, locals: &[Breakpoint], remotes: &[dap::Breakpoint]) {
        if locals.len() != remotes.len() {
            tracing::warn!(
                "adapter answered {} breakpoints to a request of {}",
                remotes.len(),
                locals.len()
            );
        }
        for (local, remote) in locals.iter().zip(remotes) {
            let index = local.index();
            match remote.id {
                Some(id) => {
                    let _ = self.breakpoints.set_breakpoint_id(index, id);
                    let _ = self.breakpoints.set_breakpoint_verified(index, remote.verified);
                }
                // Without an id a later breakpoint event cannot be
                // correlated, so assume verified.
                None => {
                    let _ = self.breakpoints.set_breakpoint_verified(index, true);
                }
            }
            let _ = self
                .breakpoints
                .set_breakpoint_message(index, remote.message.clone());
            if local.is_function() {
                if let (Some(source), Some(line)) = (&remote.source, remote.line) {
                    if let Some(path) = &source.path {
                        let _ =
                            self.breakpoints
                                .set_path_and_line(index, Path::new(path), line);
                    }
                }
            }
        }
    }

    async fn resync_after_state_change(
        &mut self,
        index: usize,
        prior: BreakpointState,
    ) -> Result<()> {
        if !self.can_send_breakpoints() {
            return Ok(());
        }
        let kind = self.breakpoints.get_breakpoint_by_index(index)?.kind().clone();
        let result = match kind {
            BreakpointKind::Source { path, .. } => self.sync_source_breakpoints(&path).await,
            BreakpointKind::Function { .. } => self.sync_function_breakpoints().await,
        };
        if let Err(e) = result {
            let _ = self.breakpoints.restore_state(index, prior);
            return Err(e);
        }
        Ok(())
    }

    async fn resync_all_breakpoint_groups(&mut self) -> Result<()> {
        if !self.can_send_breakpoints() {
            return Ok(());
        }
        for path in self.breakpoints.get_all_breakpoint_paths() {
            self.sync_source_breakpoints(&path).await?;
        }
        if self.breakpoints.has_function_breakpoints() {
            self.sync_function_breakpoints().await?;
        }
        Ok(())
    }

    // === Event handling ===

    /// Dispatch one adapter event
    ///
    /// Handler failures are reported to the console, never thrown back
    /// into the event loop.
    pub async fn handle_event(&mut self, event: Event) {
        let result = match event {
            Event::Initialized => self.on_initialized().await,
            Event::Output(body) => {
                self.on_output(&body);
                Ok(())
            }
            Event::Continued {
                thread_id,
                all_threads_continued,
            } => {
                self.on_continued(thread_id, all_threads_continued);
                Ok(())
            }
            Event::Stopped(body) => self.on_stopped(body).await,
            Event::Thread(body) => self.on_thread_event(body).await,
            Event::Exited(body) => self.on_exited(body.exit_code).await,
            Event::Terminated(_) => self.on_terminated().await,
            Event::AdapterExited => self.on_adapter_exited().await,
            Event::Breakpoint { reason, breakpoint } => {
                self.on_breakpoint_event(&reason, &breakpoint);
                Ok(())
            }
            Event::Custom { event, .. } => {
                self.on_custom_event(&event);
                Ok(())
            }
        };
        if let Err(e) = result {
            self.console.output_line(&format!("error: {}", e));
            tracing::warn!("event handler failed: {}", e);
        }
    }

    async fn on_initialized(&mut self) -> Result<()> {
        self.disconnecting = false;
        let adapter = self.adapter.clone().ok_or(Error::NoActiveSession)?;
        match adapter.action {
            AdapterAction::Launch => {
                self.state = SessionState::Configuring;
                if self.ready_for_evaluations {
                    self.console.start_input();
                }
                Ok(())
            }
            AdapterAction::Attach => {
                // No user-visible configuring window: finish
                // configuration and force a stop on a chosen thread.
                self.reset_all_breakpoints().await?;
                let session = self.session.as_deref().ok_or(Error::NoActiveSession)?;
                if self.capabilities.supports_configuration_done_request {
                    session.configuration_done().await?;
                }
                let list = session.threads().await?;
                self.threads.update_threads(&list);
                self.state = SessionState::Running;

                let target = adapter
                    .async_stop_thread
                    .or_else(|| list.first().map(|t| t.id));
                match target {
                    Some(id) => session.pause(id).await?,
                    None => self.console.start_input(),
                }
                Ok(())
            }
        }
    }

    fn on_output(&mut self, body: &dap::OutputEventBody) {
        let category = body.category.as_deref().unwrap_or("console");
        if self.mute_output_categories.contains(category) {
            return;
        }
        self.console.output(&body.output);
    }

    fn on_continued(&mut self, thread_id: i64, all_threads_continued: bool) {
        if all_threads_continued {
            self.threads.mark_all_threads_running();
        } else {
            self.threads.mark_thread_running(thread_id);
        }
        if self.threads.all_threads_running() {
            self.console.stop_input();
            if self.state == SessionState::Stopped {
                self.state = SessionState::Running;
            }
        }
    }

    async fn on_stopped(&mut self, body: dap::StoppedEventBody) -> Result<()> {
        let first_stop = self.threads.all_threads_running();

        // The event may name a thread we have not seen yet.
        if let Some(id) = body.thread_id {
            if self.threads.get_thread_by_id(id).is_none() {
                if let Some(session) = self.session.as_deref() {
                    if let Ok(list) = session.threads().await {
                        self.threads.update_threads(&list);
                    }
                }
                if self.threads.get_thread_by_id(id).is_none() {
                    self.threads.add_thread(id, format!("thread {}", id));
                }
            }
        }

        if body.all_threads_stopped {
            self.threads.mark_all_threads_stopped();
        } else if let Some(id) = body.thread_id {
            self.threads.mark_thread_stopped(id);
        }

        // One-shot breakpoints disable themselves on the first hit.
        if self.capabilities.supports_breakpoint_id_on_stop {
            let mut tripped = false;
            for id in &body.hit_breakpoint_ids {
                if let Ok(index) = self.breakpoints.index_for_id(*id) {
                    if self.breakpoints.get_breakpoint_by_index(index)?.state()
                        == BreakpointState::Once
                    {
                        self.breakpoints
                            .restore_state(index, BreakpointState::Disabled)?;
                        tripped = true;
                    }
                }
            }
            if tripped {
                self.reset_all_breakpoints().await?;
            }
        }

        let focus = body
            .thread_id
            .or_else(|| self.threads.first_stopped_thread().map(Thread::id));
        if let Some(id) = focus {
            let _ = self.threads.set_focus_thread(id);
        }

        if first_stop {
            self.print_stop_banner(&body).await;
        }

        self.state = SessionState::Stopped;
        self.console.start_input();

        let hooks = self.stop_hooks.clone();
        for hook in hooks {
            if let Err(e) = hook.on_stopped(self).await {
                tracing::warn!("stop hook failed: {}", e);
            }
        }
        Ok(())
    }

    async fn print_stop_banner(&mut self, body: &dap::StoppedEventBody) {
        let Some(thread_id) = self.threads.focus_thread_id() else {
            return;
        };
        let Some(session) = self.session.as_deref() else {
            return;
        };
        let frames = match session.stack_trace(thread_id, 1).await {
            Ok(frames) => frames,
            Err(_) => return,
        };
        let Some(frame) = frames.first() else {
            let what = body
                .description
                .clone()
                .unwrap_or_else(|| body.reason.clone());
            self.console.output_line(&format!("Stopped ({})", what));
            return;
        };

        match &frame.source {
            Some(source) => {
                let name = source.display_name();
                let line = frame.line;
                let lines = self.get_source_lines(source).await.unwrap_or_default();
                let text = source_cache::line_at(&lines, line)
                    .map(|t| format!("  {}", t.trim()))
                    .unwrap_or_default();
                self.console
                    .output_line(&format!("Stopped at {}:{}{}", name, line, text));
            }
            None => {
                self.console
                    .output_line(&format!("Stopped in {}", frame.name));
            }
        }
    }

    async fn on_thread_event(&mut self, body: dap::ThreadEventBody) -> Result<()> {
        match body.reason.as_str() {
            "started" => {
                self.threads
                    .add_thread(body.thread_id, format!("thread {}", body.thread_id));
                // The start event carries no name; re-query the list.
                if let Some(session) = self.session.as_deref() {
                    if let Ok(list) = session.threads().await {
                        self.threads.update_threads(&list);
                    }
                }
            }
            "exited" => self.threads.remove_thread(body.thread_id),
            other => tracing::debug!("unhandled thread event reason: {}", other),
        }
        Ok(())
    }

    async fn on_exited(&mut self, exit_code: i32) -> Result<()> {
        if !self.session_is_live() {
            return Ok(());
        }
        self.console
            .output_line(&format!("Process exited with code {}.", exit_code));
        self.finish_session().await
    }

    async fn on_terminated(&mut self) -> Result<()> {
        if !self.session_is_live() {
            return Ok(());
        }
        self.console.output_line("Debug session terminated.");
        self.finish_session().await
    }

    async fn on_adapter_exited(&mut self) -> Result<()> {
        if self.state == SessionState::Initializing && self.disconnecting {
            // Teardown we initiated ourselves.
            return Ok(());
        }
        if !self.session_is_live() {
            return Ok(());
        }
        self.console.output_line("The debug adapter exited.");
        self.finish_session().await
    }

    fn session_is_live(&self) -> bool {
        matches!(
            self.state,
            SessionState::Configuring | SessionState::Running | SessionState::Stopped
        )
    }

    async fn finish_session(&mut self) -> Result<()> {
        self.state = SessionState::Terminated;
        self.threads.clear();
        self.sources.flush();
        match self.adapter.as_ref().map(|a| a.action) {
            Some(AdapterAction::Launch) => {
                self.console.start_input();
                self.relaunch().await
            }
            Some(AdapterAction::Attach) | None => {
                // Attach mode: the target is gone and so are we.
                self.exit_requested = true;
                Ok(())
            }
        }
    }

    fn on_breakpoint_event(&mut self, reason: &str, breakpoint: &dap::Breakpoint) {
        if !matches!(reason, "new" | "changed") {
            return;
        }
        let Some(id) = breakpoint.id else {
            return;
        };
        if let Ok(index) = self.breakpoints.index_for_id(id) {
            let _ = self
                .breakpoints
                .set_breakpoint_verified(index, breakpoint.verified);
            if breakpoint.message.is_some() {
                let _ = self
                    .breakpoints
                    .set_breakpoint_message(index, breakpoint.message.clone());
            }
        }
    }

    fn on_custom_event(&mut self, event: &str) {
        if event == "readyForEvaluations" {
            self.ready_for_evaluations = true;
            if self.state == SessionState::Configuring {
                self.console.start_input();
            }
        } else {
            tracing::debug!("unhandled custom event: {}", event);
        }
    }

    // === Validation helpers ===

    fn ensure_stopped(&self) -> Result<()> {
        if self.session.is_none() {
            return Err(Error::NoActiveSession);
        }
        match self.state {
            SessionState::Stopped => Ok(()),
            SessionState::Initializing | SessionState::Configuring => Err(Error::NotRunning),
            _ => Err(Error::NotStopped),
        }
    }

    fn focus_or_first_stopped(&self) -> Result<i64> {
        self.threads
            .focus_thread_id()
            .or_else(|| self.threads.first_stopped_thread().map(Thread::id))
            .ok_or(Error::NotStopped)
    }
}
