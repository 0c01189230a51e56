//! dap-repl - interactive debugger front-end speaking DAP
//!
//! Spawns a debug adapter, runs the engine's event loop, and reads user
//! commands from a prompt.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::sync::mpsc;

use dap_repl::adapter::{AdapterAction, AdapterDescriptor};
use dap_repl::common::{config::Config, logging, Error, Result};
use dap_repl::console::{self, ConsoleIO, StdioConsole};
use dap_repl::dap::{DapSession, Event, StdioSession};
use dap_repl::engine::{Debugger, SessionFactory};
use dap_repl::repl::CommandDispatcher;

#[derive(Parser)]
#[command(name = "dap-repl", about = "Interactive DAP debugger front-end")]
#[command(version, long_about = None)]
struct Cli {
    /// Program to debug
    program: Option<PathBuf>,

    /// Arguments passed to the program
    #[arg(last = true)]
    args: Vec<String>,

    /// Attach to a running process instead of launching
    #[arg(long)]
    attach: Option<u32>,

    /// Debug adapter to use (default: lldb-dap)
    #[arg(long)]
    adapter: Option<String>,

    /// Named preset from the config file
    #[arg(long)]
    preset: Option<String>,

    /// Path to an alternate config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let descriptor = build_descriptor(&cli, &config)?;

    let console = Rc::new(StdioConsole::new());
    let mut input_rx = console::spawn_input_task();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let initialize_timeout = Duration::from_secs(config.timeouts.initialize_secs);
    let connect: SessionFactory = Box::new(move |adapter: &AdapterDescriptor| {
        let session = StdioSession::spawn(
            &adapter.command,
            &adapter.args,
            event_tx.clone(),
            initialize_timeout,
        )?;
        Ok(Box::new(session) as Box<dyn DapSession>)
    });

    let mut debugger = Debugger::new(console.clone(), connect);
    let dispatcher = CommandDispatcher::with_default_commands();
    for command in dispatcher.commands() {
        debugger.register_command(command.clone());
    }

    debugger.launch(descriptor).await?;

    loop {
        tokio::select! {
            line = input_rx.recv() => match line {
                Some(line) => dispatcher.dispatch(&mut debugger, &line).await,
                None => break,
            },
            event = event_rx.recv() => {
                if let Some(event) = event {
                    debugger.handle_event(event).await;
                }
            }
        }
        if debugger.exit_requested() {
            break;
        }
    }

    console.close();
    Ok(())
}

fn build_descriptor(cli: &Cli, config: &Config) -> Result<AdapterDescriptor> {
    let preset = cli
        .preset
        .as_ref()
        .map(|name| {
            config
                .presets
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Config(format!("unknown preset '{}'", name)))
        })
        .transpose()?
        .unwrap_or_default();

    let adapter_name = cli
        .adapter
        .clone()
        .or_else(|| preset.adapter.clone())
        .unwrap_or_else(|| config.defaults.adapter.clone());
    let adapter_config = config.get_adapter(&adapter_name).ok_or_else(|| {
        Error::Config(format!(
            "adapter '{}' not found; configure it or put it on PATH",
            adapter_name
        ))
    })?;

    let attach_pid = cli.attach.or(preset.pid);
    let action = match (attach_pid, preset.action.as_deref()) {
        (Some(_), _) | (None, Some("attach")) => AdapterAction::Attach,
        _ => AdapterAction::Launch,
    };

    let program = cli.program.clone().or_else(|| preset.program.clone());
    if action == AdapterAction::Launch && program.is_none() {
        return Err(Error::Config(
            "no program to launch; pass one, or use --preset or --attach".to_string(),
        ));
    }

    let args = if cli.args.is_empty() {
        preset.args.clone()
    } else {
        cli.args.clone()
    };
    let cwd = std::env::current_dir()
        .ok()
        .map(|p| p.to_string_lossy().into_owned());

    let launch_arguments = json!({
        "program": program.as_ref().map(|p| p.to_string_lossy().into_owned()),
        "args": args,
        "cwd": cwd,
    });
    let attach_arguments = json!({ "pid": attach_pid });

    Ok(AdapterDescriptor {
        command: adapter_config.path,
        args: adapter_config.args,
        kind: adapter_config.kind,
        action,
        launch_arguments,
        attach_arguments,
        async_stop_thread: preset.stop_thread,
    })
}
