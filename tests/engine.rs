//! End-to-end engine tests against a scripted adapter session
//!
//! Each test drives the `Debugger` the way the REPL loop would: engine
//! operations for user commands, `handle_event` for the adapter's event
//! stream, with a `MockSession` recording every DAP request.

mod support;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::json;

use dap_repl::adapter::{AdapterAction, AdapterDescriptor, AdapterKind};
use dap_repl::dap::{self, Event};
use dap_repl::engine::{BreakpointState, Debugger, SessionState};
use dap_repl::repl::Command;
use dap_repl::{Error, Result};
use support::{MockSession, TestConsole};

fn adapter(action: AdapterAction) -> AdapterDescriptor {
    AdapterDescriptor {
        command: "/usr/bin/fake-adapter".into(),
        args: Vec::new(),
        kind: AdapterKind::Generic,
        action,
        launch_arguments: json!({ "program": "/bin/target" }),
        attach_arguments: json!({ "pid": 7 }),
        async_stop_thread: None,
    }
}

fn caps(customize: impl FnOnce(&mut dap::Capabilities)) -> dap::Capabilities {
    let mut caps = dap::Capabilities {
        supports_configuration_done_request: true,
        ..Default::default()
    };
    customize(&mut caps);
    caps
}

fn thread(id: i64, name: &str) -> dap::Thread {
    dap::Thread {
        id,
        name: name.to_string(),
    }
}

fn frame(id: i64, path: &str, line: u32) -> dap::StackFrame {
    dap::StackFrame {
        id,
        name: "main".to_string(),
        source: Some(dap::Source {
            name: None,
            path: Some(path.to_string()),
            source_reference: None,
        }),
        line,
        column: 1,
    }
}

fn stopped_event(thread_id: i64, reason: &str) -> Event {
    Event::Stopped(dap::StoppedEventBody {
        reason: reason.to_string(),
        thread_id: Some(thread_id),
        all_threads_stopped: true,
        ..Default::default()
    })
}

async fn launched(
    mock: &MockSession,
    console: &TestConsole,
    descriptor: AdapterDescriptor,
) -> Debugger {
    let mut debugger = Debugger::new(Rc::new(console.clone()), mock.factory());
    debugger.launch(descriptor).await.unwrap();
    debugger
}

/// Engine ready in the configuring window of a launch-mode session
async fn configuring(mock: &MockSession, console: &TestConsole) -> Debugger {
    let mut debugger = launched(mock, console, adapter(AdapterAction::Launch)).await;
    debugger.handle_event(Event::Initialized).await;
    assert_eq!(debugger.state(), SessionState::Configuring);
    debugger
}

#[tokio::test]
async fn launch_breakpoint_continue_stop() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    let added = debugger
        .set_source_breakpoint(Path::new("/a.c"), 7, false)
        .await
        .unwrap();
    assert_eq!(added.index, 0);
    assert_eq!(
        added.message.as_deref(),
        Some("Breakpoint pending until program starts.")
    );
    // Nothing goes to the adapter while configuring.
    assert!(mock.requests_for("setBreakpoints").is_empty());

    debugger.run().await.unwrap();

    let set = mock.requests_for("setBreakpoints");
    assert_eq!(set.len(), 1);
    assert_eq!(set[0]["source"]["path"], "/a.c");
    assert_eq!(set[0]["breakpoints"], json!([{ "line": 7 }]));
    assert_eq!(mock.requests_for("setExceptionBreakpoints").len(), 1);
    assert_eq!(mock.requests_for("configurationDone").len(), 1);

    let log = mock.command_log();
    let bp_at = log.iter().position(|c| c == "setBreakpoints").unwrap();
    let done_at = log.iter().position(|c| c == "configurationDone").unwrap();
    assert!(bp_at < done_at);

    assert_eq!(debugger.state(), SessionState::Running);
    assert!(!console.is_input_active());
    let starts_while_running = console.start_input_calls();

    debugger.handle_event(stopped_event(1, "breakpoint")).await;

    assert_eq!(debugger.state(), SessionState::Stopped);
    assert_eq!(debugger.focus_thread_id(), Some(1));
    assert!(console.is_input_active());
    // Input started exactly at the transition out of running.
    assert_eq!(console.start_input_calls(), starts_while_running + 1);
    assert!(console
        .lines()
        .iter()
        .any(|l| l.contains("Stopped (breakpoint)")));
}

#[tokio::test]
async fn one_shot_breakpoint_disables_itself_and_resyncs() {
    let mock = MockSession::new(caps(|c| c.supports_breakpoint_id_on_stop = true));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    debugger
        .set_source_breakpoint(Path::new("/a.c"), 7, true)
        .await
        .unwrap();

    mock.push_response(
        "setBreakpoints",
        json!({ "breakpoints": [{ "id": 0, "verified": true }] }),
    );
    debugger.run().await.unwrap();
    let bp = debugger.get_breakpoint_by_index(0).unwrap();
    assert_eq!(bp.id(), Some(0));
    assert_eq!(bp.state(), BreakpointState::Once);

    debugger
        .handle_event(Event::Stopped(dap::StoppedEventBody {
            reason: "breakpoint".to_string(),
            thread_id: Some(1),
            all_threads_stopped: true,
            hit_breakpoint_ids: vec![0],
            ..Default::default()
        }))
        .await;

    assert_eq!(
        debugger.get_breakpoint_by_index(0).unwrap().state(),
        BreakpointState::Disabled
    );
    let set = mock.requests_for("setBreakpoints");
    let last = set.last().unwrap();
    assert_eq!(last["source"]["path"], "/a.c");
    assert_eq!(last["breakpoints"], json!([]));
}

#[tokio::test]
async fn once_requires_the_stop_id_capability() {
    let mock = MockSession::new(caps(|_| {}));
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    assert!(matches!(
        debugger
            .set_source_breakpoint(Path::new("/a.c"), 7, true)
            .await,
        Err(Error::UnsupportedCapability(_))
    ));
}

#[tokio::test]
async fn failed_toggle_rolls_back_and_rethrows() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    debugger
        .set_source_breakpoint(Path::new("/a.c"), 7, false)
        .await
        .unwrap();
    debugger.run().await.unwrap();

    mock.push_error(
        "setBreakpoints",
        Error::adapter_request_failed("setBreakpoints", "injected failure"),
    );
    let err = debugger.toggle_breakpoint(0).await.unwrap_err();
    assert!(matches!(err, Error::AdapterRequestFailed { .. }));
    assert_eq!(
        debugger.get_breakpoint_by_index(0).unwrap().state(),
        BreakpointState::Enabled
    );

    // Double toggle without failures returns to the original state.
    debugger.toggle_breakpoint(0).await.unwrap();
    assert_eq!(
        debugger.get_breakpoint_by_index(0).unwrap().state(),
        BreakpointState::Disabled
    );
    debugger.toggle_breakpoint(0).await.unwrap();
    assert_eq!(
        debugger.get_breakpoint_by_index(0).unwrap().state(),
        BreakpointState::Enabled
    );
}

#[tokio::test]
async fn function_breakpoint_resolves_to_source() {
    let mock = MockSession::new(caps(|c| c.supports_function_breakpoints = true));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();

    mock.push_response(
        "setFunctionBreakpoints",
        json!({
            "breakpoints": [{
                "id": 42,
                "verified": true,
                "source": { "path": "/x.c" },
                "line": 9
            }]
        }),
    );
    let added = debugger.set_function_breakpoint("foo", false).await.unwrap();
    assert_eq!(added.index, 0);

    let requests = mock.requests_for("setFunctionBreakpoints");
    assert_eq!(requests[0]["breakpoints"], json!([{ "name": "foo" }]));

    let bp = debugger.get_breakpoint_by_index(0).unwrap();
    assert_eq!(bp.id(), Some(42));
    assert!(bp.verified());
    assert_eq!(bp.path(), Some(Path::new("/x.c")));
    assert_eq!(bp.line(), Some(9));
}

#[tokio::test]
async fn function_breakpoints_require_the_capability() {
    let mock = MockSession::new(caps(|_| {}));
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    assert!(matches!(
        debugger.set_function_breakpoint("foo", false).await,
        Err(Error::UnsupportedCapability(_))
    ));
}

#[tokio::test]
async fn attach_forces_a_stop_on_the_declared_thread() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(3, "main"), thread(5, "worker")]);
    let console = TestConsole::new();

    let mut descriptor = adapter(AdapterAction::Attach);
    descriptor.async_stop_thread = Some(3);
    let mut debugger = launched(&mock, &console, descriptor).await;
    assert!(mock.command_log().contains(&"attach".to_string()));

    debugger.handle_event(Event::Initialized).await;

    assert_eq!(mock.requests_for("configurationDone").len(), 1);
    assert_eq!(mock.requests_for("threads").len(), 1);
    let pause = mock.requests_for("pause");
    assert_eq!(pause.len(), 1);
    assert_eq!(pause[0]["threadId"], 3);
    assert_eq!(debugger.state(), SessionState::Running);

    debugger.handle_event(stopped_event(3, "pause")).await;
    assert_eq!(debugger.state(), SessionState::Stopped);
    assert_eq!(debugger.focus_thread_id(), Some(3));
    assert!(console.is_input_active());
}

#[tokio::test]
async fn attach_without_a_stop_thread_pauses_the_first_thread() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(8, "main")]);
    let console = TestConsole::new();

    let mut debugger = launched(&mock, &console, adapter(AdapterAction::Attach)).await;
    debugger.handle_event(Event::Initialized).await;

    assert_eq!(mock.requests_for("pause")[0]["threadId"], 8);
}

#[tokio::test]
async fn exited_in_launch_mode_relaunches_and_resends_breakpoints() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    debugger
        .set_source_breakpoint(Path::new("/a.c"), 7, false)
        .await
        .unwrap();
    debugger.run().await.unwrap();
    assert_eq!(mock.requests_for("setBreakpoints").len(), 1);

    debugger
        .handle_event(Event::Exited(dap::ExitedEventBody { exit_code: 0 }))
        .await;

    assert!(console
        .lines()
        .iter()
        .any(|l| l.contains("exited with code 0")));
    assert!(console.is_input_active());
    // The engine tore the old session down and started a new one.
    assert_eq!(mock.requests_for("initialize").len(), 2);
    assert_eq!(mock.requests_for("launch").len(), 2);
    assert!(mock.command_log().contains(&"disconnect".to_string()));
    assert_eq!(debugger.state(), SessionState::Initializing);

    // The adapter-exited event from our own teardown is ignored.
    let lines_before = console.lines().len();
    debugger.handle_event(Event::AdapterExited).await;
    assert_eq!(debugger.state(), SessionState::Initializing);
    assert_eq!(console.lines().len(), lines_before);

    debugger.handle_event(Event::Initialized).await;
    debugger.run().await.unwrap();

    let set = mock.requests_for("setBreakpoints");
    assert_eq!(set.len(), 2);
    assert_eq!(set[1]["breakpoints"], json!([{ "line": 7 }]));
    assert_eq!(
        debugger.get_breakpoint_by_index(0).unwrap().state(),
        BreakpointState::Enabled
    );
}

#[tokio::test]
async fn attach_mode_termination_requests_host_exit() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(3, "main")]);
    let console = TestConsole::new();

    let mut debugger = launched(&mock, &console, adapter(AdapterAction::Attach)).await;
    debugger.handle_event(Event::Initialized).await;
    assert!(!debugger.exit_requested());

    debugger.handle_event(Event::Terminated(None)).await;
    assert_eq!(debugger.state(), SessionState::Terminated);
    assert!(debugger.exit_requested());
}

#[tokio::test]
async fn stepping_and_continue_require_a_stopped_target() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    // Configuring: stepping is a not-running failure.
    assert!(matches!(
        debugger.continue_execution().await,
        Err(Error::NotRunning)
    ));

    debugger.run().await.unwrap();
    assert!(matches!(debugger.step_over().await, Err(Error::NotStopped)));
    assert!(matches!(
        debugger.continue_execution().await,
        Err(Error::NotStopped)
    ));

    debugger.handle_event(stopped_event(1, "pause")).await;
    debugger.continue_execution().await.unwrap();
    assert_eq!(debugger.state(), SessionState::Running);
    assert!(!console.is_input_active());
    assert_eq!(mock.requests_for("continue")[0]["threadId"], 1);
}

#[tokio::test]
async fn stepping_marks_only_the_focus_thread_running() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main"), thread(2, "worker")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();
    debugger.handle_event(stopped_event(1, "pause")).await;

    debugger.step_over().await.unwrap();
    assert_eq!(mock.requests_for("next")[0]["threadId"], 1);
    assert_eq!(debugger.state(), SessionState::Running);

    // The continued event for the stepped thread keeps others stopped.
    debugger
        .handle_event(Event::Continued {
            thread_id: 1,
            all_threads_continued: false,
        })
        .await;
    let snapshot = debugger.threads_snapshot();
    assert!(!snapshot.iter().find(|t| t.id() == 1).unwrap().is_stopped());
    assert!(snapshot.iter().find(|t| t.id() == 2).unwrap().is_stopped());
}

#[tokio::test]
async fn stack_trace_validates_thread_and_state() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();
    debugger.handle_event(stopped_event(1, "pause")).await;

    assert!(matches!(
        debugger.get_stack_trace(99, 20).await,
        Err(Error::ThreadNotFound(99))
    ));

    debugger.continue_execution().await.unwrap();
    assert!(matches!(
        debugger.get_stack_trace(1, 20).await,
        Err(Error::NotStopped)
    ));
}

#[tokio::test]
async fn selected_frame_is_validated_against_depth() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    mock.set_frames(vec![frame(11, "/a.c", 7), frame(12, "/a.c", 20)]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();
    debugger.handle_event(stopped_event(1, "pause")).await;

    debugger.set_selected_stack_frame(1, 1).await.unwrap();
    let current = debugger.get_current_stack_frame().await.unwrap();
    assert_eq!(current.id, 12);

    assert!(matches!(
        debugger.set_selected_stack_frame(1, 5).await,
        Err(Error::FrameNotFound(5))
    ));
}

#[tokio::test]
async fn variables_skip_expensive_scopes_unless_named() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    mock.set_frames(vec![frame(11, "/a.c", 7)]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();
    debugger.handle_event(stopped_event(1, "pause")).await;

    let scopes_body = json!({
        "scopes": [
            { "name": "Locals", "variablesReference": 100 },
            { "name": "Registers", "variablesReference": 200, "expensive": true }
        ]
    });
    mock.push_response("scopes", scopes_body.clone());
    mock.push_response(
        "variables",
        json!({ "variables": [{ "name": "x", "value": "1", "variablesReference": 0 }] }),
    );

    let result = debugger.get_variables_by_scope(None).await.unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].scope.name, "Locals");
    assert_eq!(result[0].variables.as_ref().unwrap()[0].name, "x");
    assert!(result[1].variables.is_none());
    // Only the non-expensive scope was queried.
    let queried = mock.requests_for("variables");
    assert_eq!(queried.len(), 1);
    assert_eq!(queried[0]["variablesReference"], 100);

    // Named explicitly, an expensive scope is queried after all.
    mock.push_response("scopes", scopes_body);
    let named = debugger
        .get_variables_by_scope(Some("Registers"))
        .await
        .unwrap();
    assert_eq!(named.len(), 1);
    assert!(named[0].variables.is_some());
    let queried = mock.requests_for("variables");
    assert_eq!(queried.last().unwrap()["variablesReference"], 200);
}

#[tokio::test]
async fn evaluate_uses_repl_context_and_the_selected_frame() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    mock.set_frames(vec![frame(11, "/a.c", 7)]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();
    debugger.handle_event(stopped_event(1, "pause")).await;

    debugger.evaluate_expression("x + 1", false).await.unwrap();

    let requests = mock.requests_for("evaluate");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["expression"], "x + 1");
    assert_eq!(requests[0]["context"], "repl");
    assert_eq!(requests[0]["frameId"], 11);
}

#[tokio::test]
async fn deleting_a_breakpoint_resends_the_remaining_group() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();

    debugger
        .set_source_breakpoint(Path::new("/a.c"), 3, false)
        .await
        .unwrap();
    debugger
        .set_source_breakpoint(Path::new("/a.c"), 9, false)
        .await
        .unwrap();

    debugger.delete_breakpoint(0).await.unwrap();

    let set = mock.requests_for("setBreakpoints");
    assert_eq!(set.last().unwrap()["breakpoints"], json!([{ "line": 9 }]));
    assert!(matches!(
        debugger.get_breakpoint_by_index(0),
        Err(Error::BreakpointNotFound { index: 0 })
    ));
    // Index 0 is never reused.
    let added = debugger
        .set_source_breakpoint(Path::new("/a.c"), 12, false)
        .await
        .unwrap();
    assert_eq!(added.index, 2);
}

#[tokio::test]
async fn breakpoint_event_updates_verification_by_adapter_id() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    debugger
        .set_source_breakpoint(Path::new("/a.c"), 7, false)
        .await
        .unwrap();
    mock.push_response(
        "setBreakpoints",
        json!({ "breakpoints": [{ "id": 5, "verified": false }] }),
    );
    debugger.run().await.unwrap();
    assert!(!debugger.get_breakpoint_by_index(0).unwrap().verified());

    debugger
        .handle_event(Event::Breakpoint {
            reason: "changed".to_string(),
            breakpoint: dap::Breakpoint {
                id: Some(5),
                verified: true,
                message: None,
                source: None,
                line: None,
                column: None,
            },
        })
        .await;

    assert!(debugger.get_breakpoint_by_index(0).unwrap().verified());
}

#[tokio::test]
async fn responses_without_ids_count_as_verified() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    debugger
        .set_source_breakpoint(Path::new("/a.c"), 7, false)
        .await
        .unwrap();
    // Default mock response: { verified: true } with no id.
    debugger.run().await.unwrap();

    let bp = debugger.get_breakpoint_by_index(0).unwrap();
    assert_eq!(bp.id(), None);
    assert!(bp.verified());
}

#[tokio::test]
async fn muted_output_categories_are_dropped() {
    let mock = MockSession::new(caps(|_| {}));
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    debugger
        .handle_event(Event::Output(dap::OutputEventBody {
            category: Some("telemetry".to_string()),
            output: "usage ping\n".to_string(),
        }))
        .await;
    debugger
        .handle_event(Event::Output(dap::OutputEventBody {
            category: Some("stdout".to_string()),
            output: "hello\n".to_string(),
        }))
        .await;

    assert_eq!(console.raw_output(), "hello\n");
}

#[tokio::test]
async fn ready_for_evaluations_starts_input_while_configuring() {
    let mock = MockSession::new(caps(|_| {}));
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    assert!(!console.is_input_active());

    debugger
        .handle_event(Event::Custom {
            event: "readyForEvaluations".to_string(),
            body: None,
        })
        .await;
    assert!(console.is_input_active());
}

struct RecordingHook {
    hits: Rc<RefCell<usize>>,
}

#[async_trait(?Send)]
impl Command for RecordingHook {
    fn name(&self) -> &'static str {
        "record"
    }
    fn usage(&self) -> &'static str {
        "record"
    }
    fn description(&self) -> &'static str {
        "records stops"
    }
    async fn run(&self, _debugger: &mut Debugger, _args: &[&str]) -> Result<()> {
        Ok(())
    }
    async fn on_stopped(&self, _debugger: &mut Debugger) -> Result<()> {
        *self.hits.borrow_mut() += 1;
        Ok(())
    }
}

#[tokio::test]
async fn registered_commands_get_their_stop_hook_invoked() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;

    let hits = Rc::new(RefCell::new(0));
    debugger.register_command(Rc::new(RecordingHook { hits: hits.clone() }));

    debugger.run().await.unwrap();
    debugger.handle_event(stopped_event(1, "breakpoint")).await;

    assert_eq!(*hits.borrow(), 1);
}

#[tokio::test]
async fn thread_events_maintain_the_collection() {
    let mock = MockSession::new(caps(|_| {}));
    mock.set_threads(vec![thread(1, "main"), thread(2, "worker")]);
    let console = TestConsole::new();
    let mut debugger = configuring(&mock, &console).await;
    debugger.run().await.unwrap();

    debugger
        .handle_event(Event::Thread(dap::ThreadEventBody {
            reason: "started".to_string(),
            thread_id: 2,
        }))
        .await;
    // Names were refreshed from the adapter's list.
    let snapshot = debugger.threads_snapshot();
    assert_eq!(
        snapshot.iter().find(|t| t.id() == 2).unwrap().name(),
        "worker"
    );

    debugger
        .handle_event(Event::Thread(dap::ThreadEventBody {
            reason: "exited".to_string(),
            thread_id: 2,
        }))
        .await;
    assert!(debugger
        .threads_snapshot()
        .iter()
        .all(|t| t.id() != 2));
}
