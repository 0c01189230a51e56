//! Built-in REPL commands
//!
//! Each command translates its arguments into one engine operation and
//! formats the result for the console.

use std::path::PathBuf;
use std::rc::Rc;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::engine::{source_cache, Breakpoint, BreakpointKind, BreakpointState, Debugger};

use super::Command;

/// The default command set, in help-listing order
pub fn default_commands() -> Vec<Rc<dyn Command>> {
    vec![
        Rc::new(RunCommand),
        Rc::new(ContinueCommand),
        Rc::new(NextCommand),
        Rc::new(StepCommand),
        Rc::new(FinishCommand),
        Rc::new(PauseCommand),
        Rc::new(BacktraceCommand),
        Rc::new(FrameCommand),
        Rc::new(ThreadsCommand),
        Rc::new(ThreadCommand),
        Rc::new(BreakpointCommand),
        Rc::new(VariablesCommand),
        Rc::new(PrintCommand),
        Rc::new(ListCommand),
        Rc::new(InfoCommand),
        Rc::new(QuitCommand),
    ]
}

/// Where a user asked for a breakpoint
enum Location {
    Source { path: PathBuf, line: u32 },
    Function(String),
}

/// `file:line` is a source location; anything else is a function name
fn parse_location(text: &str) -> Result<Location> {
    if let Some((path, line)) = text.rsplit_once(':') {
        if let Ok(line) = line.parse::<u32>() {
            if path.is_empty() || line == 0 {
                return Err(Error::InvalidLocation(text.to_string()));
            }
            return Ok(Location::Source {
                path: PathBuf::from(path),
                line,
            });
        }
    }
    if text.is_empty() {
        return Err(Error::InvalidLocation(text.to_string()));
    }
    Ok(Location::Function(text.to_string()))
}

fn parse_index(args: &[&str], position: usize, usage: &'static str) -> Result<usize> {
    args.get(position)
        .and_then(|s| s.parse().ok())
        .ok_or(Error::Usage(usage))
}

fn describe_breakpoint(bp: &Breakpoint) -> String {
    let state = match bp.state() {
        BreakpointState::Enabled => "enabled",
        BreakpointState::Disabled => "disabled",
        BreakpointState::Once => "once",
    };
    let verified = if bp.verified() { "" } else { " (unverified)" };
    let location = match bp.kind() {
        BreakpointKind::Source { path, line } => format!("{}:{}", path.display(), line),
        BreakpointKind::Function { name, path, line } => match (path, line) {
            (Some(path), Some(line)) => {
                format!("{} at {}:{}", name, path.display(), line)
            }
            _ => name.clone(),
        },
    };
    let message = bp
        .message()
        .map(|m| format!("  {}", m))
        .unwrap_or_default();
    format!(
        "#{} {} [{}]{}{}",
        bp.index(),
        location,
        state,
        verified,
        message
    )
}

async fn add_breakpoint(debugger: &mut Debugger, location: &str, once: bool) -> Result<()> {
    let added = match parse_location(location)? {
        Location::Source { path, line } => {
            debugger.set_source_breakpoint(&path, line, once).await?
        }
        Location::Function(name) => debugger.set_function_breakpoint(&name, once).await?,
    };
    let console = debugger.console();
    match added.message {
        Some(message) => console.output_line(&format!("Breakpoint {}: {}", added.index, message)),
        None => console.output_line(&format!("Breakpoint {} set.", added.index)),
    }
    Ok(())
}

pub struct RunCommand;

#[async_trait(?Send)]
impl Command for RunCommand {
    fn name(&self) -> &'static str {
        "run"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["r"]
    }
    fn usage(&self) -> &'static str {
        "run"
    }
    fn description(&self) -> &'static str {
        "Start the target running"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        debugger.run().await
    }
}

pub struct ContinueCommand;

#[async_trait(?Send)]
impl Command for ContinueCommand {
    fn name(&self) -> &'static str {
        "continue"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["c"]
    }
    fn usage(&self) -> &'static str {
        "continue"
    }
    fn description(&self) -> &'static str {
        "Resume execution"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        debugger.continue_execution().await
    }
}

pub struct NextCommand;

#[async_trait(?Send)]
impl Command for NextCommand {
    fn name(&self) -> &'static str {
        "next"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["n"]
    }
    fn usage(&self) -> &'static str {
        "next"
    }
    fn description(&self) -> &'static str {
        "Step over the current line"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        debugger.step_over().await
    }
}

pub struct StepCommand;

#[async_trait(?Send)]
impl Command for StepCommand {
    fn name(&self) -> &'static str {
        "step"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["s"]
    }
    fn usage(&self) -> &'static str {
        "step"
    }
    fn description(&self) -> &'static str {
        "Step into function calls"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        debugger.step_in().await
    }
}

pub struct FinishCommand;

#[async_trait(?Send)]
impl Command for FinishCommand {
    fn name(&self) -> &'static str {
        "finish"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["out"]
    }
    fn usage(&self) -> &'static str {
        "finish"
    }
    fn description(&self) -> &'static str {
        "Run until the current function returns"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        debugger.step_out().await
    }
}

pub struct PauseCommand;

#[async_trait(?Send)]
impl Command for PauseCommand {
    fn name(&self) -> &'static str {
        "pause"
    }
    fn usage(&self) -> &'static str {
        "pause"
    }
    fn description(&self) -> &'static str {
        "Break into the running target"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        debugger.pause().await
    }
}

pub struct BacktraceCommand;

#[async_trait(?Send)]
impl Command for BacktraceCommand {
    fn name(&self) -> &'static str {
        "backtrace"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["bt"]
    }
    fn usage(&self) -> &'static str {
        "backtrace [depth]"
    }
    fn description(&self) -> &'static str {
        "Print the focus thread's stack"
    }
    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()> {
        let levels: i64 = match args.first() {
            Some(s) => s.parse().map_err(|_| Error::Usage("backtrace [depth]"))?,
            None => 20,
        };
        let thread_id = debugger.focus_thread_id().ok_or(Error::NotStopped)?;
        let selected = debugger
            .threads_snapshot()
            .iter()
            .find(|t| t.id() == thread_id)
            .map(|t| t.selected_stack_frame())
            .unwrap_or(0);
        let frames = debugger.get_stack_trace(thread_id, levels).await?;
        let console = debugger.console();
        for (i, frame) in frames.iter().enumerate() {
            let marker = if i == selected { "*" } else { " " };
            let location = frame
                .source
                .as_ref()
                .map(|s| format!(" at {}:{}", s.display_name(), frame.line))
                .unwrap_or_default();
            console.output_line(&format!("{} #{:<2} {}{}", marker, i, frame.name, location));
        }
        Ok(())
    }
}

pub struct FrameCommand;

#[async_trait(?Send)]
impl Command for FrameCommand {
    fn name(&self) -> &'static str {
        "frame"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["f"]
    }
    fn usage(&self) -> &'static str {
        "frame <index>"
    }
    fn description(&self) -> &'static str {
        "Select a stack frame on the focus thread"
    }
    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()> {
        let index = parse_index(args, 0, "frame <index>")?;
        let thread_id = debugger.focus_thread_id().ok_or(Error::NotStopped)?;
        debugger.set_selected_stack_frame(thread_id, index).await?;
        let frame = debugger.get_current_stack_frame().await?;
        let location = frame
            .source
            .as_ref()
            .map(|s| format!(" at {}:{}", s.display_name(), frame.line))
            .unwrap_or_default();
        debugger
            .console()
            .output_line(&format!("#{} {}{}", index, frame.name, location));
        Ok(())
    }
}

pub struct ThreadsCommand;

#[async_trait(?Send)]
impl Command for ThreadsCommand {
    fn name(&self) -> &'static str {
        "threads"
    }
    fn usage(&self) -> &'static str {
        "threads"
    }
    fn description(&self) -> &'static str {
        "List the target's threads"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        let threads = match debugger.refresh_threads().await {
            Ok(threads) => threads,
            Err(_) => debugger.threads_snapshot(),
        };
        let focus = debugger.focus_thread_id();
        let console = debugger.console();
        if threads.is_empty() {
            console.output_line("No threads.");
            return Ok(());
        }
        for thread in threads {
            let marker = if Some(thread.id()) == focus { "*" } else { " " };
            let state = if thread.is_stopped() {
                "stopped"
            } else {
                "running"
            };
            console.output_line(&format!(
                "{} {} {} ({})",
                marker,
                thread.id(),
                thread.name(),
                state
            ));
        }
        Ok(())
    }
}

pub struct ThreadCommand;

#[async_trait(?Send)]
impl Command for ThreadCommand {
    fn name(&self) -> &'static str {
        "thread"
    }
    fn usage(&self) -> &'static str {
        "thread <id>"
    }
    fn description(&self) -> &'static str {
        "Switch the focus thread"
    }
    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()> {
        let id: i64 = args
            .first()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::Usage("thread <id>"))?;
        debugger.set_focus_thread(id)?;
        debugger
            .console()
            .output_line(&format!("Focus thread is now {}.", id));
        Ok(())
    }
}

pub struct BreakpointCommand;

const BREAKPOINT_USAGE: &str =
    "breakpoint <file:line | function> | once <loc> | list | delete <i> | clear | \
     enable <i|all> | disable <i|all> | toggle <i|all> | \
     enable-all | disable-all | toggle-all";

#[async_trait(?Send)]
impl Command for BreakpointCommand {
    fn name(&self) -> &'static str {
        "breakpoint"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["b", "break"]
    }
    fn usage(&self) -> &'static str {
        "breakpoint <loc>|list|..."
    }
    fn description(&self) -> &'static str {
        "Manage breakpoints"
    }
    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()> {
        match args.first().copied() {
            None => Err(Error::Usage(BREAKPOINT_USAGE)),
            Some("list") => {
                let breakpoints = debugger.get_all_breakpoints();
                let console = debugger.console();
                if breakpoints.is_empty() {
                    console.output_line("No breakpoints.");
                } else {
                    for bp in &breakpoints {
                        console.output_line(&describe_breakpoint(bp));
                    }
                }
                Ok(())
            }
            Some("clear") => {
                debugger.delete_all_breakpoints().await?;
                debugger.console().output_line("All breakpoints deleted.");
                Ok(())
            }
            Some("delete") => {
                let index = parse_index(args, 1, BREAKPOINT_USAGE)?;
                debugger.delete_breakpoint(index).await?;
                debugger
                    .console()
                    .output_line(&format!("Breakpoint {} deleted.", index));
                Ok(())
            }
            Some("enable") => match args.get(1).copied() {
                Some("all") => debugger.set_all_breakpoints_enabled(true).await,
                Some(_) => {
                    let index = parse_index(args, 1, BREAKPOINT_USAGE)?;
                    debugger.set_breakpoint_enabled(index, true).await
                }
                None => Err(Error::Usage(BREAKPOINT_USAGE)),
            },
            Some("disable") => match args.get(1).copied() {
                Some("all") => debugger.set_all_breakpoints_enabled(false).await,
                Some(_) => {
                    let index = parse_index(args, 1, BREAKPOINT_USAGE)?;
                    debugger.set_breakpoint_enabled(index, false).await
                }
                None => Err(Error::Usage(BREAKPOINT_USAGE)),
            },
            Some("toggle") => match args.get(1).copied() {
                Some("all") => debugger.toggle_all_breakpoints().await,
                Some(_) => {
                    let index = parse_index(args, 1, BREAKPOINT_USAGE)?;
                    debugger.toggle_breakpoint(index).await
                }
                None => Err(Error::Usage(BREAKPOINT_USAGE)),
            },
            Some("enable-all") => debugger.set_all_breakpoints_enabled(true).await,
            Some("disable-all") => debugger.set_all_breakpoints_enabled(false).await,
            Some("toggle-all") => debugger.toggle_all_breakpoints().await,
            Some("once") => {
                let location = args.get(1).copied().ok_or(Error::Usage(BREAKPOINT_USAGE))?;
                add_breakpoint(debugger, location, true).await
            }
            Some(location) => add_breakpoint(debugger, location, false).await,
        }
    }
}

pub struct VariablesCommand;

#[async_trait(?Send)]
impl Command for VariablesCommand {
    fn name(&self) -> &'static str {
        "variables"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["v"]
    }
    fn usage(&self) -> &'static str {
        "variables [scope]"
    }
    fn description(&self) -> &'static str {
        "Show variables of the selected frame"
    }
    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()> {
        let scope_name = args.first().copied();
        let scopes = debugger.get_variables_by_scope(scope_name).await?;
        let console = debugger.console();
        if scopes.is_empty() {
            console.output_line("No matching scopes.");
            return Ok(());
        }
        for entry in scopes {
            console.output_line(&format!("{}:", entry.scope.name));
            match entry.variables {
                Some(variables) => {
                    for v in variables {
                        match v.type_name {
                            Some(t) => console
                                .output_line(&format!("  {}: {} = {}", v.name, t, v.value)),
                            None => console.output_line(&format!("  {} = {}", v.name, v.value)),
                        }
                    }
                }
                None => console.output_line("  (expensive scope; not queried)"),
            }
        }
        Ok(())
    }
}

pub struct PrintCommand;

#[async_trait(?Send)]
impl Command for PrintCommand {
    fn name(&self) -> &'static str {
        "print"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["p"]
    }
    fn usage(&self) -> &'static str {
        "print <expression>"
    }
    fn description(&self) -> &'static str {
        "Evaluate an expression in the selected frame"
    }
    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()> {
        if args.is_empty() {
            return Err(Error::Usage("print <expression>"));
        }
        let expression = args.join(" ");
        let result = debugger.evaluate_expression(&expression, false).await?;
        debugger.console().output_line(&result.result);
        Ok(())
    }
}

pub struct ListCommand;

#[async_trait(?Send)]
impl Command for ListCommand {
    fn name(&self) -> &'static str {
        "list"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["l"]
    }
    fn usage(&self) -> &'static str {
        "list [context]"
    }
    fn description(&self) -> &'static str {
        "Show source around the current position"
    }
    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()> {
        let context: u32 = match args.first() {
            Some(s) => s.parse().map_err(|_| Error::Usage("list [context]"))?,
            None => 5,
        };
        let frame = debugger.get_current_stack_frame().await?;
        let source = frame
            .source
            .as_ref()
            .ok_or_else(|| Error::Internal("the current frame has no source".to_string()))?;
        let lines = debugger.get_source_lines(source).await?;
        let first = frame.line.saturating_sub(context).max(1);
        let last = frame
            .line
            .saturating_add(context)
            .min(lines.len() as u32);
        let console = debugger.console();
        for n in first..=last {
            let marker = if n == frame.line { "->" } else { "  " };
            let text = source_cache::line_at(&lines, n).unwrap_or_default();
            console.output_line(&format!("{} {:>5}  {}", marker, n, text));
        }
        Ok(())
    }
}

pub struct InfoCommand;

#[async_trait(?Send)]
impl Command for InfoCommand {
    fn name(&self) -> &'static str {
        "info"
    }
    fn usage(&self) -> &'static str {
        "info"
    }
    fn description(&self) -> &'static str {
        "Show session state and adapter capabilities"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        let state = debugger.state();
        let caps = debugger.adapter_caps().clone();
        let console = debugger.console();
        console.output_line(&format!("State: {}", state));
        console.output_line(&format!(
            "Function breakpoints: {}",
            caps.supports_function_breakpoints
        ));
        console.output_line(&format!(
            "Conditional breakpoints: {}",
            caps.supports_conditional_breakpoints
        ));
        console.output_line(&format!(
            "One-shot breakpoints: {}",
            caps.supports_breakpoint_id_on_stop
        ));
        console.output_line(&format!(
            "Code blocks in evaluate: {}",
            debugger.supports_code_blocks()
        ));
        if let Ok(extra) = debugger.adapter_info().await {
            if !extra.is_null() {
                debugger
                    .console()
                    .output_line(&format!("Adapter info: {}", extra));
            }
        }
        Ok(())
    }
}

pub struct QuitCommand;

#[async_trait(?Send)]
impl Command for QuitCommand {
    fn name(&self) -> &'static str {
        "quit"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["q", "exit"]
    }
    fn usage(&self) -> &'static str {
        "quit"
    }
    fn description(&self) -> &'static str {
        "End the session and exit"
    }
    async fn run(&self, debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        debugger.close_session().await?;
        debugger.console().close();
        debugger.request_exit();
        Ok(())
    }
}
