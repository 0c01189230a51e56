//! Test doubles for the engine's collaborators
//!
//! `MockSession` is a scripted `DapSession`: it records every request
//! and answers from a per-command response queue, falling back to
//! protocol-shaped defaults. `TestConsole` records console traffic and
//! prompt gating. Both are cheaply cloneable handles over shared state
//! so tests keep a view into what the engine did.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::{json, Value};

use dap_repl::console::ConsoleIO;
use dap_repl::dap::{self, DapSession};
use dap_repl::engine::SessionFactory;
use dap_repl::{Error, Result};

/// One request the engine issued
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub command: String,
    pub arguments: Value,
}

#[derive(Default)]
struct MockInner {
    capabilities: dap::Capabilities,
    requests: RefCell<Vec<RecordedRequest>>,
    responses: RefCell<HashMap<String, VecDeque<Result<Value>>>>,
    threads: RefCell<Vec<dap::Thread>>,
    frames: RefCell<Vec<dap::StackFrame>>,
}

/// Scripted in-process DAP session
#[derive(Clone, Default)]
pub struct MockSession {
    inner: Rc<MockInner>,
}

impl MockSession {
    pub fn new(capabilities: dap::Capabilities) -> Self {
        Self {
            inner: Rc::new(MockInner {
                capabilities,
                ..Default::default()
            }),
        }
    }

    /// Session factory handing the engine clones of this mock
    pub fn factory(&self) -> SessionFactory {
        let mock = self.clone();
        Box::new(move |_| Ok(Box::new(mock.clone()) as Box<dyn DapSession>))
    }

    /// Queue the next response body for `command`
    pub fn push_response(&self, command: &str, body: Value) {
        self.inner
            .responses
            .borrow_mut()
            .entry(command.to_string())
            .or_default()
            .push_back(Ok(body));
    }

    /// Queue the next failure for `command`
    pub fn push_error(&self, command: &str, error: Error) {
        self.inner
            .responses
            .borrow_mut()
            .entry(command.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Thread list answered by default to `threads` requests
    pub fn set_threads(&self, threads: Vec<dap::Thread>) {
        *self.inner.threads.borrow_mut() = threads;
    }

    /// Frames answered by default to `stackTrace` requests
    pub fn set_frames(&self, frames: Vec<dap::StackFrame>) {
        *self.inner.frames.borrow_mut() = frames;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.borrow().clone()
    }

    /// Commands issued so far, in order
    pub fn command_log(&self) -> Vec<String> {
        self.inner
            .requests
            .borrow()
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }

    /// Argument blobs of every request for one command, in order
    pub fn requests_for(&self, command: &str) -> Vec<Value> {
        self.inner
            .requests
            .borrow()
            .iter()
            .filter(|r| r.command == command)
            .map(|r| r.arguments.clone())
            .collect()
    }

    fn call(&self, command: &str, arguments: Value) -> Result<Value> {
        self.inner.requests.borrow_mut().push(RecordedRequest {
            command: command.to_string(),
            arguments: arguments.clone(),
        });
        if let Some(queue) = self.inner.responses.borrow_mut().get_mut(command) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        Ok(self.default_response(command, &arguments))
    }

    fn default_response(&self, command: &str, arguments: &Value) -> Value {
        match command {
            "initialize" => {
                serde_json::to_value(&self.inner.capabilities).unwrap_or(Value::Null)
            }
            "setBreakpoints" | "setFunctionBreakpoints" => {
                let count = arguments
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                let breakpoints: Vec<Value> =
                    (0..count).map(|_| json!({ "verified": true })).collect();
                json!({ "breakpoints": breakpoints })
            }
            "threads" => json!({ "threads": self.inner.threads.borrow().clone() }),
            "stackTrace" => json!({ "stackFrames": self.inner.frames.borrow().clone() }),
            "scopes" => json!({ "scopes": [] }),
            "variables" => json!({ "variables": [] }),
            "continue" => json!({ "allThreadsContinued": true }),
            "evaluate" => json!({ "result": "", "variablesReference": 0 }),
            "source" => json!({ "content": "" }),
            _ => json!({}),
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(body: Value) -> Result<T> {
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait(?Send)]
impl DapSession for MockSession {
    async fn initialize(&self, args: dap::InitializeArguments) -> Result<dap::Capabilities> {
        let body = self.call("initialize", serde_json::to_value(&args)?)?;
        Self::parse(body)
    }

    async fn launch(&self, arguments: Value) -> Result<()> {
        self.call("launch", arguments)?;
        Ok(())
    }

    async fn attach(&self, arguments: Value) -> Result<()> {
        self.call("attach", arguments)?;
        Ok(())
    }

    async fn disconnect(&self, terminate_debuggee: bool) -> Result<()> {
        self.call(
            "disconnect",
            json!({ "terminateDebuggee": terminate_debuggee }),
        )?;
        Ok(())
    }

    async fn configuration_done(&self) -> Result<()> {
        self.call("configurationDone", Value::Null)?;
        Ok(())
    }

    async fn set_breakpoints(
        &self,
        source: dap::Source,
        breakpoints: Vec<dap::SourceBreakpoint>,
    ) -> Result<Vec<dap::Breakpoint>> {
        let args = dap::SetBreakpointsArguments {
            source,
            breakpoints,
        };
        let body = self.call("setBreakpoints", serde_json::to_value(&args)?)?;
        let parsed: dap::SetBreakpointsResponseBody = Self::parse(body)?;
        Ok(parsed.breakpoints)
    }

    async fn set_function_breakpoints(
        &self,
        breakpoints: Vec<dap::FunctionBreakpoint>,
    ) -> Result<Vec<dap::Breakpoint>> {
        let args = dap::SetFunctionBreakpointsArguments { breakpoints };
        let body = self.call("setFunctionBreakpoints", serde_json::to_value(&args)?)?;
        let parsed: dap::SetBreakpointsResponseBody = Self::parse(body)?;
        Ok(parsed.breakpoints)
    }

    async fn set_exception_breakpoints(&self, filters: Vec<String>) -> Result<()> {
        self.call("setExceptionBreakpoints", json!({ "filters": filters }))?;
        Ok(())
    }

    async fn threads(&self) -> Result<Vec<dap::Thread>> {
        let body = self.call("threads", Value::Null)?;
        let parsed: dap::ThreadsResponseBody = Self::parse(body)?;
        Ok(parsed.threads)
    }

    async fn stack_trace(&self, thread_id: i64, levels: i64) -> Result<Vec<dap::StackFrame>> {
        let body = self.call(
            "stackTrace",
            json!({ "threadId": thread_id, "levels": levels }),
        )?;
        let parsed: dap::StackTraceResponseBody = Self::parse(body)?;
        Ok(parsed.stack_frames)
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<dap::Scope>> {
        let body = self.call("scopes", json!({ "frameId": frame_id }))?;
        let parsed: dap::ScopesResponseBody = Self::parse(body)?;
        Ok(parsed.scopes)
    }

    async fn variables(&self, variables_reference: i64) -> Result<Vec<dap::Variable>> {
        let body = self.call(
            "variables",
            json!({ "variablesReference": variables_reference }),
        )?;
        let parsed: dap::VariablesResponseBody = Self::parse(body)?;
        Ok(parsed.variables)
    }

    async fn pause(&self, thread_id: i64) -> Result<()> {
        self.call("pause", json!({ "threadId": thread_id }))?;
        Ok(())
    }

    async fn continue_execution(&self, thread_id: i64) -> Result<bool> {
        let body = self.call("continue", json!({ "threadId": thread_id }))?;
        let parsed: dap::ContinueResponseBody = Self::parse(body)?;
        Ok(parsed.all_threads_continued)
    }

    async fn next(&self, thread_id: i64) -> Result<()> {
        self.call("next", json!({ "threadId": thread_id }))?;
        Ok(())
    }

    async fn step_in(&self, thread_id: i64) -> Result<()> {
        self.call("stepIn", json!({ "threadId": thread_id }))?;
        Ok(())
    }

    async fn step_out(&self, thread_id: i64) -> Result<()> {
        self.call("stepOut", json!({ "threadId": thread_id }))?;
        Ok(())
    }

    async fn evaluate(&self, args: dap::EvaluateArguments) -> Result<dap::EvaluateResponseBody> {
        let body = self.call("evaluate", serde_json::to_value(&args)?)?;
        Self::parse(body)
    }

    async fn source(&self, source_reference: i64) -> Result<String> {
        let body = self.call("source", json!({ "sourceReference": source_reference }))?;
        let parsed: dap::SourceResponseBody = Self::parse(body)?;
        Ok(parsed.content)
    }

    async fn info(&self) -> Result<Value> {
        self.call("info", Value::Null)
    }
}

#[derive(Default)]
struct ConsoleState {
    output: String,
    lines: Vec<String>,
    start_input_calls: usize,
    stop_input_calls: usize,
    input_active: bool,
    closed: bool,
}

/// Recording `ConsoleIO`
#[derive(Clone, Default)]
pub struct TestConsole {
    state: Rc<RefCell<ConsoleState>>,
}

impl TestConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written through `output`, concatenated
    pub fn raw_output(&self) -> String {
        self.state.borrow().output.clone()
    }

    /// Lines written through `output_line`
    pub fn lines(&self) -> Vec<String> {
        self.state.borrow().lines.clone()
    }

    pub fn start_input_calls(&self) -> usize {
        self.state.borrow().start_input_calls
    }

    pub fn stop_input_calls(&self) -> usize {
        self.state.borrow().stop_input_calls
    }

    pub fn is_input_active(&self) -> bool {
        self.state.borrow().input_active
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl ConsoleIO for TestConsole {
    fn output(&self, text: &str) {
        self.state.borrow_mut().output.push_str(text);
    }

    fn output_line(&self, text: &str) {
        self.state.borrow_mut().lines.push(text.to_string());
    }

    fn start_input(&self) {
        let mut state = self.state.borrow_mut();
        state.start_input_calls += 1;
        state.input_active = true;
    }

    fn stop_input(&self) {
        let mut state = self.state.borrow_mut();
        state.stop_input_calls += 1;
        state.input_active = false;
    }

    fn close(&self) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        state.input_active = false;
    }

    fn input_active(&self) -> bool {
        self.state.borrow().input_active
    }
}
