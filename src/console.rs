//! Console collaborator
//!
//! The engine talks to the terminal exclusively through `ConsoleIO`:
//! semantic output plus prompt gating. `start_input`/`stop_input` track
//! whether the REPL prompt is live; typed lines are still delivered so
//! break-in and breakpoint commands work while the target runs.

use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

use tokio::sync::mpsc;

/// Prompt shown when input is active
pub const PROMPT: &str = "(dap) ";

/// Terminal surface the engine emits to
pub trait ConsoleIO {
    /// Write text without a trailing newline
    fn output(&self, text: &str);
    /// Write one line
    fn output_line(&self, text: &str);
    /// Activate the prompt
    fn start_input(&self);
    /// Deactivate the prompt
    fn stop_input(&self);
    /// Tear down the console on session end
    fn close(&self);
    /// Whether the prompt is currently active
    fn input_active(&self) -> bool;
}

/// `ConsoleIO` over the process's stdout
#[derive(Clone, Default)]
pub struct StdioConsole {
    active: Rc<Cell<bool>>,
}

impl StdioConsole {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsoleIO for StdioConsole {
    fn output(&self, text: &str) {
        print!("{}", text);
        let _ = std::io::stdout().flush();
    }

    fn output_line(&self, text: &str) {
        println!("{}", text);
    }

    fn start_input(&self) {
        if !self.active.replace(true) {
            print!("{}", PROMPT);
            let _ = std::io::stdout().flush();
        }
    }

    fn stop_input(&self) {
        self.active.set(false);
    }

    fn close(&self) {
        self.active.set(false);
        let _ = std::io::stdout().flush();
    }

    fn input_active(&self) -> bool {
        self.active.get()
    }
}

/// Feed stdin lines into a channel
///
/// Reading stdin blocks, so this lives on a plain thread. The channel
/// closes when stdin reaches EOF.
pub fn spawn_input_task() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(line.trim_end().to_string()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
