//! DAP session transport
//!
//! `DapSession` is the request surface the engine drives; `StdioSession`
//! implements it over an adapter subprocess. A background reader task
//! correlates responses to in-flight requests by sequence number and
//! forwards events, in arrival order, to the channel supplied at spawn
//! time.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::common::{Error, Result};

use super::codec;
use super::types::*;

/// Request surface of one DAP conversation
///
/// Methods take `&self`: multiple requests may be in flight at once and
/// the transport correlates the responses.
#[async_trait(?Send)]
pub trait DapSession {
    async fn initialize(&self, args: InitializeArguments) -> Result<Capabilities>;
    async fn launch(&self, arguments: Value) -> Result<()>;
    async fn attach(&self, arguments: Value) -> Result<()>;
    async fn disconnect(&self, terminate_debuggee: bool) -> Result<()>;
    async fn configuration_done(&self) -> Result<()>;
    async fn set_breakpoints(
        &self,
        source: Source,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>>;
    async fn set_function_breakpoints(
        &self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<Breakpoint>>;
    async fn set_exception_breakpoints(&self, filters: Vec<String>) -> Result<()>;
    async fn threads(&self) -> Result<Vec<Thread>>;
    async fn stack_trace(&self, thread_id: i64, levels: i64) -> Result<Vec<StackFrame>>;
    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>>;
    async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>>;
    async fn pause(&self, thread_id: i64) -> Result<()>;
    async fn continue_execution(&self, thread_id: i64) -> Result<bool>;
    async fn next(&self, thread_id: i64) -> Result<()>;
    async fn step_in(&self, thread_id: i64) -> Result<()>;
    async fn step_out(&self, thread_id: i64) -> Result<()>;
    async fn evaluate(&self, args: EvaluateArguments) -> Result<EvaluateResponseBody>;
    async fn source(&self, source_reference: i64) -> Result<String>;
    async fn info(&self) -> Result<Value>;
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>;

/// DAP session over an adapter subprocess's stdio
pub struct StdioSession {
    /// Adapter subprocess, killed on drop
    child: Child,
    /// Sequence number for requests
    seq: AtomicI64,
    /// In-flight requests waiting for responses
    pending: PendingMap,
    /// Outbound channel to the writer task
    write_tx: mpsc::UnboundedSender<String>,
    /// Timeout applied to the initialize request only
    initialize_timeout: Duration,
}

impl StdioSession {
    /// Spawn a debug adapter and connect a session to its stdio
    ///
    /// Parsed events are pushed to `event_tx` in the order the adapter
    /// emits them. When the adapter's stdout closes, a final
    /// `Event::AdapterExited` is pushed and every in-flight request
    /// fails with `AdapterCrashed`.
    pub fn spawn(
        command: &Path,
        args: &[String],
        event_tx: mpsc::UnboundedSender<Event>,
        initialize_timeout: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!("failed to start {}: {}", command.display(), e))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::AdapterStartFailed("failed to get adapter stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("failed to get adapter stdout".to_string())
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(json) = write_rx.recv().await {
                if let Err(e) = codec::write_message(&mut writer, &json).await {
                    tracing::debug!("adapter stdin closed: {}", e);
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                let json = match codec::read_message(&mut reader).await {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::debug!("adapter stdout closed: {}", e);
                        break;
                    }
                };
                tracing::debug!("DAP <<< {}", json);
                route_message(&json, &reader_pending, &event_tx);
            }
            // Fail whatever is still in flight, then tell the engine.
            lock(&reader_pending).clear();
            let _ = event_tx.send(Event::AdapterExited);
        });

        Ok(Self {
            child,
            seq: AtomicI64::new(1),
            pending,
            write_tx,
            initialize_timeout,
        })
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn encode(&self, seq: i64, command: &str, arguments: Option<Value>) -> Result<String> {
        let request = match arguments {
            Some(args) => serde_json::json!({
                "seq": seq,
                "type": "request",
                "command": command,
                "arguments": args,
            }),
            None => serde_json::json!({
                "seq": seq,
                "type": "request",
                "command": command,
            }),
        };
        Ok(serde_json::to_string(&request)?)
    }

    /// Send a request and wait for its response body
    async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Value> {
        let seq = self.next_seq();
        let json = self.encode(seq, command, arguments)?;
        tracing::debug!("DAP >>> {}", json);

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(seq, tx);

        if self.write_tx.send(json).is_err() {
            lock(&self.pending).remove(&seq);
            return Err(Error::AdapterCrashed);
        }

        let response = rx.await.map_err(|_| Error::AdapterCrashed)?;
        if response.success {
            Ok(response.body.unwrap_or(Value::Null))
        } else {
            Err(Error::adapter_request_failed(
                command,
                response.message.as_deref().unwrap_or("unknown error"),
            ))
        }
    }

    /// Send a request without waiting for the response
    ///
    /// Used for disconnect, where the adapter may exit before replying.
    fn post(&self, command: &str, arguments: Option<Value>) -> Result<()> {
        let json = self.encode(self.next_seq(), command, arguments)?;
        tracing::debug!("DAP >>> {}", json);
        let _ = self.write_tx.send(json);
        Ok(())
    }

    async fn request_as<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let body = self.request(command, arguments).await?;
        serde_json::from_value(body).map_err(|e| {
            Error::DapProtocol(format!("failed to parse {} response: {}", command, e))
        })
    }
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<i64, oneshot::Sender<ResponseMessage>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn route_message(
    json: &str,
    pending: &PendingMap,
    event_tx: &mpsc::UnboundedSender<Event>,
) {
    let msg: Value = match serde_json::from_str(json) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("dropping unparseable DAP message: {}", e);
            return;
        }
    };

    let msg_type = msg
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    match msg_type.as_str() {
        "response" => {
            if let Ok(response) = serde_json::from_value::<ResponseMessage>(msg) {
                if let Some(tx) = lock(pending).remove(&response.request_seq) {
                    let _ = tx.send(response);
                }
            }
        }
        "event" => {
            if let Ok(event_msg) = serde_json::from_value::<EventMessage>(msg) {
                let _ = event_tx.send(Event::from_message(&event_msg));
            }
        }
        other => {
            tracing::warn!("unknown DAP message type: {:?}", other);
        }
    }
}

#[async_trait(?Send)]
impl DapSession for StdioSession {
    async fn initialize(&self, args: InitializeArguments) -> Result<Capabilities> {
        let fut = self.request_as::<Capabilities>("initialize", Some(serde_json::to_value(&args)?));
        match tokio::time::timeout(self.initialize_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::adapter_request_failed("initialize", "timed out")),
        }
    }

    async fn launch(&self, arguments: Value) -> Result<()> {
        self.request("launch", Some(arguments)).await?;
        Ok(())
    }

    async fn attach(&self, arguments: Value) -> Result<()> {
        self.request("attach", Some(arguments)).await?;
        Ok(())
    }

    async fn disconnect(&self, terminate_debuggee: bool) -> Result<()> {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(terminate_debuggee),
        };
        self.post("disconnect", Some(serde_json::to_value(&args)?))
    }

    async fn configuration_done(&self) -> Result<()> {
        self.request("configurationDone", None).await?;
        Ok(())
    }

    async fn set_breakpoints(
        &self,
        source: Source,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source,
            breakpoints,
        };
        let body: SetBreakpointsResponseBody = self
            .request_as("setBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(body.breakpoints)
    }

    async fn set_function_breakpoints(
        &self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetFunctionBreakpointsArguments { breakpoints };
        let body: SetBreakpointsResponseBody = self
            .request_as("setFunctionBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(body.breakpoints)
    }

    async fn set_exception_breakpoints(&self, filters: Vec<String>) -> Result<()> {
        let args = SetExceptionBreakpointsArguments { filters };
        self.request("setExceptionBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn threads(&self) -> Result<Vec<Thread>> {
        let body: ThreadsResponseBody = self.request_as("threads", None).await?;
        Ok(body.threads)
    }

    async fn stack_trace(&self, thread_id: i64, levels: i64) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: Some(levels),
        };
        let body: StackTraceResponseBody = self
            .request_as("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(body.stack_frames)
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let args = ScopesArguments { frame_id };
        let body: ScopesResponseBody = self
            .request_as("scopes", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(body.scopes)
    }

    async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let args = VariablesArguments {
            variables_reference,
        };
        let body: VariablesResponseBody = self
            .request_as("variables", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(body.variables)
    }

    async fn pause(&self, thread_id: i64) -> Result<()> {
        let args = PauseArguments { thread_id };
        self.request("pause", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn continue_execution(&self, thread_id: i64) -> Result<bool> {
        let args = ContinueArguments {
            thread_id,
            single_thread: false,
        };
        let body: ContinueResponseBody = self
            .request_as("continue", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(body.all_threads_continued)
    }

    async fn next(&self, thread_id: i64) -> Result<()> {
        let args = StepArguments {
            thread_id,
            granularity: Some("statement".to_string()),
        };
        self.request("next", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn step_in(&self, thread_id: i64) -> Result<()> {
        let args = StepArguments {
            thread_id,
            granularity: Some("statement".to_string()),
        };
        self.request("stepIn", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn step_out(&self, thread_id: i64) -> Result<()> {
        let args = StepArguments {
            thread_id,
            granularity: Some("statement".to_string()),
        };
        self.request("stepOut", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn evaluate(&self, args: EvaluateArguments) -> Result<EvaluateResponseBody> {
        self.request_as("evaluate", Some(serde_json::to_value(&args)?))
            .await
    }

    async fn source(&self, source_reference: i64) -> Result<String> {
        let args = SourceArguments { source_reference };
        let body: SourceResponseBody = self
            .request_as("source", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(body.content)
    }

    async fn info(&self) -> Result<Value> {
        self.request("info", None).await
    }
}

impl Drop for StdioSession {
    fn drop(&mut self) {
        // Best effort; we cannot await in drop.
        let _ = self.child.start_kill();
    }
}
