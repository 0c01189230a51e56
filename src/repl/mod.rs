//! REPL command contract and dispatcher
//!
//! Commands are thin adapters from typed lines to engine operations.
//! The dispatcher parses one line, finds the command by name or alias,
//! runs it, and prints failures. Commands registered with the engine
//! additionally get their `on_stopped` hook invoked on every stop.

pub mod commands;

use std::rc::Rc;

use async_trait::async_trait;

use crate::common::Result;
use crate::engine::Debugger;

/// One REPL command
#[async_trait(?Send)]
pub trait Command {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Short argument synopsis shown in help output
    fn usage(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn run(&self, debugger: &mut Debugger, args: &[&str]) -> Result<()>;

    /// Invoked by the engine after every stop event
    async fn on_stopped(&self, _debugger: &mut Debugger) -> Result<()> {
        Ok(())
    }
}

/// Parses lines and routes them to commands
pub struct CommandDispatcher {
    commands: Vec<Rc<dyn Command>>,
}

impl CommandDispatcher {
    /// Dispatcher with the built-in command set
    pub fn with_default_commands() -> Self {
        Self {
            commands: commands::default_commands(),
        }
    }

    pub fn register(&mut self, command: Rc<dyn Command>) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Rc<dyn Command>] {
        &self.commands
    }

    fn find(&self, name: &str) -> Option<Rc<dyn Command>> {
        self.commands
            .iter()
            .find(|c| c.name() == name || c.aliases().contains(&name))
            .cloned()
    }

    /// Run one line of user input
    pub async fn dispatch(&self, debugger: &mut Debugger, line: &str) {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            self.reprompt(debugger);
            return;
        };
        let args: Vec<&str> = parts.collect();

        if name == "help" {
            self.print_help(debugger);
            self.reprompt(debugger);
            return;
        }

        match self.find(name) {
            Some(command) => {
                if let Err(e) = command.run(debugger, &args).await {
                    debugger.console().output_line(&format!("error: {}", e));
                }
            }
            None => {
                debugger.console().output_line(&format!(
                    "Unknown command '{}'. Type 'help' for the command list.",
                    name
                ));
            }
        }
        self.reprompt(debugger);
    }

    fn print_help(&self, debugger: &Debugger) {
        let console = debugger.console();
        console.output_line("Commands:");
        for command in &self.commands {
            console.output_line(&format!(
                "  {:<28} {}",
                command.usage(),
                command.description()
            ));
        }
        console.output_line("  help                         Show this list");
    }

    fn reprompt(&self, debugger: &Debugger) {
        let console = debugger.console();
        if console.input_active() {
            console.output(crate::console::PROMPT);
        }
    }
}
