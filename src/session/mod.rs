//! Debug session state machine
//!
//! [`DebugSession`] owns everything that lives for one debug run: the backend
//! client, the breakpoint mirror and the handle tables. It consumes decoded
//! front-end messages one at a time, answers every request exactly once and
//! turns backend replies and notifications into protocol events.
//!
//! Execution commands (`continue`, `next`, `stepIn`, `stepOut`) are answered
//! as soon as the backend call is issued. The call itself runs on its own task
//! and its outcome re-enters the loop as a `stopped`, `exited` or `terminated`
//! event, so `pause` and `disconnect` are still processed while the debuggee
//! runs.

pub mod breakpoints;
pub mod commands;
pub mod error;
pub mod paths;
pub mod variables;


use futures_util::future::try_join;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};

use crate::dap::codec::CodecError;
use crate::dap::endpoint::{DIAGNOSTIC_EVENT, Endpoint};
use crate::dap::handles::HandleTable;
use crate::dap::protocol::{ErrorDestination, ProtocolMessage, Request, Response};
use crate::dap::types::{
    AttachArguments, Breakpoint, Capabilities, DisconnectArguments, EvaluateArguments,
    InitializeArguments, LaunchArguments, LaunchMode, OutputEventBody, Scope, ScopesArguments,
    SetBreakpointsArguments, Source, SourceArguments, StackFrame, StackTraceArguments,
    StoppedEventBody, Thread, Variable, VariablesArguments,
};
use crate::delve::config::DEFAULT_DLV_PATH;
use crate::delve::types::{DebuggerState, EvalScope, command as delve_command};
use crate::delve::{
    BackendError, BackendEvent, BackendLauncher, DelveClient, DelveConfig, DelveConfigBuilder,
    DelveMode, RpcError,
};
use crate::io::Inbound;
use crate::{log_dap_message, log_timing};

use breakpoints::BreakpointStore;
use commands::{Command, CommandTable, DuplicateCommand};
use error::SessionError;
use paths::PathMapper;
use variables::{VariableRef, VariableSource, children_at, display_name, display_value};

/// Frames fetched when the front end does not say how many it wants
const DEFAULT_STACK_DEPTH: usize = 50;

/// Deepest stack the debugger is ever asked for
const MAX_STACK_DEPTH: usize = 1024;

/// Goroutine id the debugger reads as "the current one"
const CURRENT_GOROUTINE: i64 = -1;

// ============================================================================
// Configuration
// ============================================================================

/// Adapter-wide settings that outlive individual debug runs
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// `dlv` executable used when a request does not name one
    pub dlv_path: String,
    /// Bound on inspection calls to the backend
    pub request_timeout: Duration,
    /// Bound on waiting for the backend to accept its connection
    pub connect_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            dlv_path: DEFAULT_DLV_PATH.to_string(),
            request_timeout: Duration::from_millis(10_000),
            connect_timeout: Duration::from_millis(30_000),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Terminated,
}

/// Result of an execution command, delivered back to the session loop
struct ExecutionOutcome {
    /// Debug run the command belongs to; outcomes from earlier runs are dropped
    generation: u64,
    command: Command,
    result: Result<DebuggerState, BackendError>,
}

pub struct DebugSession {
    config: AdapterConfig,
    endpoint: Endpoint,
    launcher: Arc<dyn BackendLauncher>,
    commands: CommandTable,
    state: SessionState,

    lines_start_at1: bool,
    columns_start_at1: bool,

    backend: Option<DelveClient>,
    debugger_state: Option<DebuggerState>,
    breakpoints: BreakpointStore,
    variables: HandleTable<VariableRef>,
    frames: HandleTable<EvalScope>,
    paths: Option<PathMapper>,

    generation: u64,
    stop_on_entry: bool,
    configuration_done: bool,
    executing: Option<Command>,
    pause_requested: bool,
    terminated_sent: bool,

    /// Events that must follow the response currently being produced
    deferred: Vec<(&'static str, Value)>,

    backend_events: Option<mpsc::UnboundedReceiver<BackendEvent>>,
    executions_tx: mpsc::UnboundedSender<ExecutionOutcome>,
    executions: mpsc::UnboundedReceiver<ExecutionOutcome>,
}

fn backend_failure(command: Command) -> impl Fn(BackendError) -> SessionError {
    move |e| SessionError::backend(command, &e)
}

fn parse_args<T: DeserializeOwned>(command: Command, request: &Request) -> Result<T, SessionError> {
    let arguments = match &request.arguments {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|e| SessionError::invalid_arguments(command, e))
}

fn to_body<T: Serialize>(body: T) -> Result<Value, SessionError> {
    serde_json::to_value(body).map_err(SessionError::internal)
}

/// Pending forever when there is no receiver, so `select!` can poll it uniformly
async fn recv_optional<T>(receiver: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

impl DebugSession {
    pub fn new(
        config: AdapterConfig,
        endpoint: Endpoint,
        launcher: Arc<dyn BackendLauncher>,
    ) -> Result<Self, DuplicateCommand> {
        let commands = CommandTable::new()?;
        endpoint.on_event(DIAGNOSTIC_EVENT, |event| {
            warn!(
                "DebugSession: {}",
                event.body["message"].as_str().unwrap_or("diagnostic without message")
            );
        });

        let (executions_tx, executions) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            endpoint,
            launcher,
            commands,
            state: SessionState::Uninitialized,
            lines_start_at1: true,
            columns_start_at1: true,
            backend: None,
            debugger_state: None,
            breakpoints: BreakpointStore::new(),
            variables: HandleTable::new(),
            frames: HandleTable::new(),
            paths: None,
            generation: 0,
            stop_on_entry: false,
            configuration_done: false,
            executing: None,
            pause_requested: false,
            terminated_sent: false,
            deferred: Vec::new(),
            backend_events: None,
            executions_tx,
            executions,
        })
    }

    /// Process front-end messages until disconnect, end of stream or a framing error
    pub async fn run(mut self, mut inbound: Inbound<ProtocolMessage, CodecError>) {
        info!("DebugSession: started");

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(Ok(message)) => {
                        if self.on_message(message).await.is_break() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("DebugSession: closing after framing error: {}", e);
                        break;
                    }
                    None => {
                        info!("DebugSession: front end closed the stream");
                        break;
                    }
                },
                Some(outcome) = self.executions.recv() => self.finish_execution(outcome).await,
                event = recv_optional(&mut self.backend_events) => match event {
                    Some(event) => self.on_backend_event(event).await,
                    None => self.backend_events = None,
                },
            }
        }

        self.shutdown().await;
    }

    async fn on_message(&mut self, message: ProtocolMessage) -> ControlFlow<()> {
        match message {
            ProtocolMessage::Request(request) => return self.dispatch(request).await,
            ProtocolMessage::Response(response) => self.endpoint.handle_response(response),
            ProtocolMessage::Event(event) => self.endpoint.handle_event(event),
        }
        ControlFlow::Continue(())
    }

    async fn dispatch(&mut self, request: Request) -> ControlFlow<()> {
        log_dap_message!(Level::DEBUG, "inbound", request.command.as_str(), &request.arguments);
        let started = Instant::now();

        let command = self.commands.lookup(&request.command);
        let result = match command {
            None => Err(SessionError::unhandled(&request.command)),
            Some(command) if command.requires_backend() && self.backend.is_none() => {
                Err(SessionError::not_launched(command))
            }
            Some(command) => self.handle(command, &request).await,
        };

        let response = match result {
            Ok(body) => Response::success(&request, body),
            Err(e) => {
                warn!("DebugSession: {} failed: {}", request.command, e);
                Response::error(&request, e.to_error_message())
            }
        };
        if let Err(e) = self.endpoint.send_response(response) {
            error!("DebugSession: could not answer {}: {}", request.command, e);
        }
        self.flush_deferred();
        log_timing!(Level::DEBUG, request.command.as_str(), started.elapsed());

        if command == Some(Command::Disconnect) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    async fn handle(&mut self, command: Command, request: &Request) -> Result<Value, SessionError> {
        match command {
            Command::Initialize => self.initialize(parse_args(command, request)?),
            Command::Launch => self.launch(parse_args(command, request)?).await,
            Command::Attach => self.attach(parse_args(command, request)?).await,
            Command::Disconnect => self.disconnect(parse_args(command, request)?).await,
            Command::SetBreakpoints => self.set_breakpoints(parse_args(command, request)?).await,
            Command::SetExceptionBreakpoints | Command::ConfigurationDone => {
                self.end_configuration(command).await
            }
            Command::Continue | Command::Next | Command::StepIn | Command::StepOut => {
                self.start_execution(command)?;
                Ok(Value::Null)
            }
            Command::Pause => self.pause().await,
            Command::StackTrace => self.stack_trace(parse_args(command, request)?).await,
            Command::Scopes => self.scopes(parse_args(command, request)?),
            Command::Variables => self.variables(parse_args(command, request)?).await,
            Command::Source => self.source(parse_args(command, request)?).await,
            Command::Threads => self.threads().await,
            Command::Evaluate => self.evaluate(parse_args(command, request)?).await,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    fn initialize(&mut self, args: InitializeArguments) -> Result<Value, SessionError> {
        self.lines_start_at1 = args.lines_start_at1.unwrap_or(true);
        self.columns_start_at1 = args.columns_start_at1.unwrap_or(true);
        info!(
            "DebugSession: initialized for {} (lines from {}, columns from {})",
            args.adapter_id.as_deref().unwrap_or("unknown client"),
            u8::from(self.lines_start_at1),
            u8::from(self.columns_start_at1)
        );
        self.set_state(SessionState::Initialized);

        to_body(Capabilities {
            supports_configuration_done_request: true,
            supports_evaluate_for_hovers: true,
        })
    }

    async fn launch(&mut self, args: LaunchArguments) -> Result<Value, SessionError> {
        let mode = match args.mode {
            LaunchMode::Debug => DelveMode::Debug,
            LaunchMode::Test => DelveMode::Test,
            LaunchMode::Exec => DelveMode::Exec,
        };
        let mut builder = DelveConfigBuilder::new(mode)
            .dlv_path(self.dlv_path(args.dlv_tool_path.as_deref()))
            .program(args.program.as_str())
            .program_args(args.args.iter().cloned())
            .env(args.env.clone())
            .show_log(args.show_log);
        if let Some(cwd) = &args.cwd {
            builder = builder.cwd(cwd.clone());
        }
        if let Some(host) = &args.host {
            builder = builder.host(host.clone());
        }
        if let Some(port) = args.port {
            builder = builder.port(port);
        }
        if let Some(flags) = &args.build_flags {
            builder = builder.build_flags(flags.clone());
        }
        if let Some(init) = &args.init {
            builder = builder.init(init.clone());
        }
        let config = builder
            .build()
            .map_err(|e| SessionError::launch(Command::Launch, e))?;

        let paths = args.remote_path.as_deref().map(|remote| {
            let local = args.cwd.as_deref().unwrap_or(&config.working_directory);
            PathMapper::new(&local.to_string_lossy(), remote)
        });

        self.start_backend(Command::Launch, config, args.stop_on_entry, paths)
            .await
    }

    async fn attach(&mut self, args: AttachArguments) -> Result<Value, SessionError> {
        let mut builder = DelveConfigBuilder::new(DelveMode::Attach)
            .dlv_path(self.dlv_path(args.dlv_tool_path.as_deref()))
            .show_log(args.show_log);
        if let Some(pid) = args.process_id {
            builder = builder.process_id(pid);
        }
        if let Some(cwd) = &args.cwd {
            builder = builder.cwd(cwd.clone());
        }
        if let Some(host) = &args.host {
            builder = builder.host(host.clone());
        }
        if let Some(port) = args.port {
            builder = builder.port(port);
        }
        let config = builder
            .build()
            .map_err(|e| SessionError::launch(Command::Attach, e))?;

        let paths = match (args.remote_path.as_deref(), args.cwd.as_deref()) {
            (Some(remote), Some(cwd)) => Some(PathMapper::new(&cwd.to_string_lossy(), remote)),
            (Some(_), None) => {
                warn!("DebugSession: remotePath ignored for attach without cwd");
                None
            }
            (None, _) => None,
        };

        self.start_backend(Command::Attach, config, args.stop_on_entry, paths)
            .await
    }

    fn dlv_path(&self, requested: Option<&str>) -> String {
        requested
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.config.dlv_path)
            .to_string()
    }

    async fn start_backend(
        &mut self,
        command: Command,
        config: DelveConfig,
        stop_on_entry: bool,
        paths: Option<PathMapper>,
    ) -> Result<Value, SessionError> {
        self.reset_run().await;

        let (events_tx, events) = mpsc::unbounded_channel();
        self.backend_events = Some(events);

        let backend = self
            .launcher
            .launch(config, events_tx)
            .await
            .map_err(|e| SessionError::launch(command, e))?;
        let client = DelveClient::new(backend, self.config.request_timeout);

        let ready = tokio::time::timeout(self.config.connect_timeout, client.wait_ready()).await;
        let failure = match ready {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "debugger did not accept connections within {}ms",
                self.config.connect_timeout.as_millis()
            )),
        };
        if let Some(reason) = failure {
            client.close().await;
            return Err(SessionError::launch(command, reason));
        }

        info!("DebugSession: debugger ready for {}", command.name());
        self.backend = Some(client);
        self.paths = paths;
        self.stop_on_entry = stop_on_entry;
        self.set_state(SessionState::Running);
        self.defer_event("initialized", Value::Null);
        Ok(Value::Null)
    }

    /// Forget everything tied to the previous debug run
    async fn reset_run(&mut self) {
        if let Some(previous) = self.backend.take() {
            info!("DebugSession: closing previous debugger");
            previous.close().await;
        }
        self.generation += 1;
        self.backend_events = None;
        self.debugger_state = None;
        self.breakpoints.clear();
        self.variables.reset();
        self.frames.reset();
        self.paths = None;
        self.configuration_done = false;
        self.executing = None;
        self.pause_requested = false;
        self.terminated_sent = false;
    }

    /// First `setExceptionBreakpoints` or `configurationDone` starts the debuggee
    async fn end_configuration(&mut self, command: Command) -> Result<Value, SessionError> {
        if self.configuration_done {
            return Ok(Value::Null);
        }
        self.configuration_done = true;

        if !self.stop_on_entry {
            debug!("DebugSession: configuration done, continuing");
            self.start_execution(Command::Continue)?;
            return Ok(Value::Null);
        }

        let client = self.client(command)?;
        let state = client.state().await.map_err(backend_failure(command))?;
        let thread_id = state.stopped_goroutine_id();
        self.debugger_state = Some(state);
        self.set_state(SessionState::Stopped);
        self.defer_event(
            "stopped",
            StoppedEventBody {
                reason: "entry".to_string(),
                thread_id,
            },
        );
        Ok(Value::Null)
    }

    async fn disconnect(&mut self, args: DisconnectArguments) -> Result<Value, SessionError> {
        if let Some(client) = self.backend.take() {
            let kill = args.terminate_debuggee.unwrap_or(true);
            match client.detach(kill).await {
                Ok(()) => debug!("DebugSession: detached (kill: {})", kill),
                Err(e) => warn!("DebugSession: detach failed: {}", e),
            }
            client.close().await;
        }
        self.executing = None;
        self.set_state(SessionState::Terminated);
        if !self.terminated_sent {
            self.terminated_sent = true;
            self.defer_event("terminated", Value::Null);
        }
        Ok(Value::Null)
    }

    async fn terminate(&mut self) {
        if let Some(client) = self.backend.take() {
            client.close().await;
        }
        self.executing = None;
        self.set_state(SessionState::Terminated);
        if !self.terminated_sent {
            self.terminated_sent = true;
            self.send_event("terminated", Value::Null);
        }
    }

    async fn shutdown(&mut self) {
        self.endpoint.cancel_pending();
        if let Some(client) = self.backend.take() {
            client.close().await;
        }
        self.set_state(SessionState::Terminated);
        info!("DebugSession: shut down");
    }

    // ------------------------------------------------------------------------
    // Execution control
    // ------------------------------------------------------------------------

    /// Issue an execution command without waiting for the debuggee to stop
    fn start_execution(&mut self, command: Command) -> Result<(), SessionError> {
        let Some((name, _)) = command.execution() else {
            return Err(SessionError::internal(format!(
                "{} is not an execution command",
                command.name()
            )));
        };
        if let Some(running) = self.executing {
            return Err(SessionError::new(
                command.error_code(),
                "{_command} rejected while {_running} is in progress",
                ErrorDestination::User,
            )
            .with_variable("_command", command.name())
            .with_variable("_running", running.name()));
        }

        let client = self.client(command)?;
        let outcomes = self.executions_tx.clone();
        let generation = self.generation;
        client
            .command_with(name, move |result| {
                let _ = outcomes.send(ExecutionOutcome {
                    generation,
                    command,
                    result,
                });
            })
            .map_err(backend_failure(command))?;

        debug!("DebugSession: {} issued", name);
        self.executing = Some(command);
        self.pause_requested = false;
        self.set_state(SessionState::Running);
        Ok(())
    }

    async fn finish_execution(&mut self, outcome: ExecutionOutcome) {
        if outcome.generation != self.generation {
            debug!(
                "DebugSession: dropping {} outcome from an earlier run",
                outcome.command.name()
            );
            return;
        }
        self.executing = None;
        let paused = std::mem::take(&mut self.pause_requested);

        match outcome.result {
            Ok(state) if state.exited => {
                info!("DebugSession: debuggee exited with status {}", state.exit_status);
                self.send_event("exited", json!({ "exitCode": state.exit_status }));
                self.debugger_state = Some(state);
                self.terminate().await;
            }
            Ok(state) => {
                // A breakpoint hit that raced the halt is still a breakpoint stop
                let reason = if paused && !state.at_breakpoint() {
                    "pause"
                } else {
                    outcome.command.execution().map_or("breakpoint", |(_, reason)| reason)
                };
                let thread_id = state.stopped_goroutine_id();
                self.debugger_state = Some(state);
                self.set_state(SessionState::Stopped);
                self.send_event(
                    "stopped",
                    StoppedEventBody {
                        reason: reason.to_string(),
                        thread_id,
                    },
                );
            }
            Err(e @ (BackendError::Rpc(RpcError::ConnectionClosed) | BackendError::NotConnected)) => {
                warn!("DebugSession: lost the debugger during {}: {}", outcome.command.name(), e);
                self.terminate().await;
            }
            Err(e) => {
                let failure = SessionError::backend(outcome.command, &e);
                warn!("DebugSession: {}", failure);
                self.send_event(
                    "output",
                    OutputEventBody {
                        category: "stderr".to_string(),
                        output: format!("{failure}\n"),
                    },
                );
            }
        }
    }

    async fn pause(&mut self) -> Result<Value, SessionError> {
        let client = self.client(Command::Pause)?;
        let in_flight = self.executing.is_some();
        self.pause_requested = in_flight;

        let state = match client.command_bounded(delve_command::HALT).await {
            Ok(state) => state,
            Err(e) => {
                self.pause_requested = false;
                return Err(SessionError::backend(Command::Pause, &e));
            }
        };

        // With a command in flight its outcome reports the stop
        if !in_flight && !state.exited {
            let thread_id = state.stopped_goroutine_id();
            self.debugger_state = Some(state);
            self.set_state(SessionState::Stopped);
            self.defer_event(
                "stopped",
                StoppedEventBody {
                    reason: "pause".to_string(),
                    thread_id,
                },
            );
        }
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------------
    // Breakpoints and inspection
    // ------------------------------------------------------------------------

    async fn set_breakpoints(&mut self, args: SetBreakpointsArguments) -> Result<Value, SessionError> {
        let client = self.client(Command::SetBreakpoints)?;
        let path = args.source.path.as_deref().ok_or_else(|| {
            SessionError::invalid_arguments(Command::SetBreakpoints, "source.path is required")
        })?;
        let file = self.remote_path(path);
        let lines: Vec<i64> = args
            .requested_lines()
            .into_iter()
            .map(|line| self.debugger_line(line))
            .collect();

        let outcomes = self.breakpoints.reconcile(&client, &file, &lines).await;
        let breakpoints: Vec<Breakpoint> = outcomes
            .into_iter()
            .map(|outcome| Breakpoint {
                verified: outcome.verified,
                line: self.client_line(outcome.line),
                id: outcome.id,
                message: outcome.message,
            })
            .collect();
        Ok(json!({ "breakpoints": breakpoints }))
    }

    async fn threads(&mut self) -> Result<Value, SessionError> {
        let client = self.client(Command::Threads)?;
        let goroutines = client
            .list_goroutines()
            .await
            .map_err(backend_failure(Command::Threads))?;

        let threads: Vec<Thread> = goroutines
            .iter()
            .map(|goroutine| {
                let function = goroutine.user_current_loc.function_name();
                let name = if function.is_empty() {
                    format!("Goroutine {}", goroutine.id)
                } else {
                    function.to_string()
                };
                Thread {
                    id: goroutine.id,
                    name,
                }
            })
            .collect();
        Ok(json!({ "threads": threads }))
    }

    async fn stack_trace(&mut self, args: StackTraceArguments) -> Result<Value, SessionError> {
        let client = self.client(Command::StackTrace)?;
        let start = args.start_frame.unwrap_or(0);
        let levels = args.levels.filter(|l| *l > 0).unwrap_or(DEFAULT_STACK_DEPTH);

        let depth = start.saturating_add(levels).min(MAX_STACK_DEPTH);
        let locations = client
            .stacktrace(args.thread_id, depth)
            .await
            .map_err(backend_failure(Command::StackTrace))?;

        let mut frames = Vec::with_capacity(levels.min(locations.len()));
        for (index, location) in locations.iter().enumerate().skip(start).take(levels) {
            let path = self.local_path(&location.file);
            let name = Path::new(&path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            let id = self.frames.create(EvalScope {
                goroutine_id: args.thread_id,
                frame: index,
            });
            let function = match location.function_name() {
                "" => "?",
                name => name,
            };
            frames.push(StackFrame {
                id,
                name: function.to_string(),
                source: Source {
                    name,
                    path: Some(path),
                    source_reference: None,
                },
                line: self.client_line(location.line),
                column: self.client_column(1),
            });
        }

        Ok(json!({ "stackFrames": frames, "totalFrames": locations.len() }))
    }

    fn scopes(&mut self, args: ScopesArguments) -> Result<Value, SessionError> {
        let fallback = self.current_scope();
        let scope = *self.frames.get_or(args.frame_id, &fallback);
        let reference = self.variables.create(VariableRef::locals(scope));

        let scopes = [Scope {
            name: "Local".to_string(),
            variables_reference: reference,
            expensive: false,
        }];
        Ok(json!({ "scopes": scopes }))
    }

    async fn variables(&mut self, args: VariablesArguments) -> Result<Value, SessionError> {
        let command = Command::Variables;
        let client = self.client(command)?;
        let reference = self
            .variables
            .get(args.variables_reference)
            .cloned()
            .ok_or_else(|| {
                SessionError::invalid_arguments(
                    command,
                    format!("unknown variables reference {}", args.variables_reference),
                )
            })?;

        let roots = match &reference.source {
            VariableSource::Locals => {
                let (mut arguments, locals) = try_join(
                    client.list_function_args(reference.scope),
                    client.list_local_vars(reference.scope),
                )
                .await
                .map_err(backend_failure(command))?;
                arguments.extend(locals);
                arguments
            }
            VariableSource::Expression(expression) => {
                client
                    .eval_symbol(expression, reference.scope)
                    .await
                    .map_err(backend_failure(command))?
                    .children
            }
        };

        let children = children_at(&roots, &reference.child_path).ok_or_else(|| {
            SessionError::invalid_arguments(command, "variable is no longer available")
        })?;

        let mut variables = Vec::with_capacity(children.len());
        for (index, variable) in children.iter().enumerate() {
            let variables_reference = if variable.has_children() {
                self.variables.create(reference.child(index))
            } else {
                0
            };
            variables.push(Variable {
                name: display_name(variable, index),
                value: display_value(variable),
                type_name: Some(variable.type_name.clone()).filter(|t| !t.is_empty()),
                variables_reference,
            });
        }
        Ok(json!({ "variables": variables }))
    }

    async fn evaluate(&mut self, args: EvaluateArguments) -> Result<Value, SessionError> {
        let client = self.client(Command::Evaluate)?;
        let fallback = self.current_scope();
        let scope = args
            .frame_id
            .map_or(fallback, |id| *self.frames.get_or(id, &fallback));

        let variable = client
            .eval_symbol(&args.expression, scope)
            .await
            .map_err(backend_failure(Command::Evaluate))?;

        let variables_reference = if variable.has_children() {
            self.variables
                .create(VariableRef::expression(args.expression.as_str(), scope))
        } else {
            0
        };
        Ok(json!({
            "result": display_value(&variable),
            "type": variable.type_name,
            "variablesReference": variables_reference,
        }))
    }

    async fn source(&mut self, args: SourceArguments) -> Result<Value, SessionError> {
        let path = args.source.and_then(|source| source.path).ok_or_else(|| {
            SessionError::invalid_arguments(Command::Source, "source.path is required")
        })?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SessionError::source_unreadable(&path, e))?;

        Ok(json!({ "content": content, "mimeType": "text/x-go" }))
    }

    // ------------------------------------------------------------------------
    // Backend notifications
    // ------------------------------------------------------------------------

    async fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Output { category, text } => {
                self.send_event("output", OutputEventBody { category, output: text });
            }
            BackendEvent::Exited { code } => {
                if self.backend.is_some() {
                    info!("DebugSession: debugger exited ({:?})", code);
                    self.terminate().await;
                } else {
                    debug!("DebugSession: debugger exit ({:?}) after close", code);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn client(&self, command: Command) -> Result<DelveClient, SessionError> {
        self.backend
            .clone()
            .ok_or_else(|| SessionError::not_launched(command))
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!("DebugSession: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Scope of the top frame of the goroutine that last stopped
    fn current_scope(&self) -> EvalScope {
        EvalScope {
            goroutine_id: self
                .debugger_state
                .as_ref()
                .map_or(CURRENT_GOROUTINE, DebuggerState::stopped_goroutine_id),
            frame: 0,
        }
    }

    fn debugger_line(&self, line: i64) -> i64 {
        if self.lines_start_at1 { line } else { line + 1 }
    }

    fn client_line(&self, line: i64) -> i64 {
        if self.lines_start_at1 { line } else { line - 1 }
    }

    fn client_column(&self, column: i64) -> i64 {
        if self.columns_start_at1 { column } else { column - 1 }
    }

    fn remote_path(&self, path: &str) -> String {
        self.paths
            .as_ref()
            .map_or_else(|| path.to_string(), |paths| paths.to_remote(path))
    }

    fn local_path(&self, path: &str) -> String {
        self.paths
            .as_ref()
            .map_or_else(|| path.to_string(), |paths| paths.to_local(path))
    }

    fn send_event<T: Serialize>(&self, event: &str, body: T) {
        let result = serde_json::to_value(body)
            .map_err(|e| e.to_string())
            .and_then(|body| self.endpoint.send_event(event, body).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!("DebugSession: dropping {} event: {}", event, e);
        }
    }

    fn defer_event<T: Serialize>(&mut self, event: &'static str, body: T) {
        match serde_json::to_value(body) {
            Ok(body) => self.deferred.push((event, body)),
            Err(e) => warn!("DebugSession: dropping {} event: {}", event, e),
        }
    }

    fn flush_deferred(&mut self) {
        for (event, body) in std::mem::take(&mut self.deferred) {
            self.send_event(event, body);
        }
    }
}
