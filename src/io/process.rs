//! Child process supervision
//!
//! [`ChildProcessManager`] runs one external program (in practice the
//! debugger), forwards every line it prints on either pipe to a callback, and
//! reports its exit once. It has no notion of the RPC connection made to the
//! program afterwards.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Signal strength used to end the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// SIGTERM
    Graceful,
    /// SIGKILL
    Force,
}

impl StopMode {
    #[cfg(unix)]
    fn signal(self) -> libc::c_int {
        match self {
            StopMode::Graceful => libc::SIGTERM,
            StopMode::Force => libc::SIGKILL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running { pid: u32 },
    /// Signalled by us or exited by itself
    Stopped,
}

impl ProcessState {
    pub fn pid(&self) -> Option<u32> {
        if let ProcessState::Running { pid } = self {
            Some(*pid)
        } else {
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some()
    }
}

/// Pipe a line of child output was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// Name used as the output category on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Reported once per spawned child
#[derive(Debug, Clone)]
pub struct ProcessExitEvent {
    /// `None` when the child was killed by a signal or could not be reaped
    pub code: Option<i32>,
}

impl From<&ExitStatus> for ProcessExitEvent {
    fn from(status: &ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

#[async_trait]
pub trait ProcessExitHandler: Send + Sync {
    async fn on_process_exit(&self, event: ProcessExitEvent);
}

type LineHandler = Arc<dyn Fn(OutputStream, String) + Send + Sync>;

/// Line-by-line observation of a child's stdout and stderr
pub trait OutputMonitor: Send + Sync {
    /// Replace the line callback. Lines arrive without their terminator.
    ///
    /// Takes effect for children started afterwards. Pipes are read to EOF
    /// even with no callback installed.
    fn on_output_line<F>(&mut self, handler: F)
    where
        F: Fn(OutputStream, String) + Send + Sync + 'static;
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Child {0} pipe was not captured")]
    PipeMissing(&'static str),
}

/// Start and stop of a supervised child
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Signal the child; the exit itself is reported through the exit handler
    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    fn is_running(&self) -> bool;

    /// SIGKILL without awaiting anything, for use from `Drop`
    fn kill_sync(&mut self);
}

/// Supervises a single spawned program
pub struct ChildProcessManager {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    state: Arc<Mutex<ProcessState>>,
    line_handler: Option<LineHandler>,
    exit_handler: Option<Arc<dyn ProcessExitHandler>>,
    readers: Vec<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl ChildProcessManager {
    pub fn new(program: String, args: Vec<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            program,
            args,
            cwd,
            env: HashMap::new(),
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            line_handler: None,
            exit_handler: None,
            readers: Vec::new(),
            reaper: None,
        }
    }

    /// Variables added on top of the adapter's own environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn on_process_exit(&mut self, handler: Arc<dyn ProcessExitHandler>) {
        self.exit_handler = Some(handler);
    }

    /// Resolves after the child has been reaped and the exit handler has run
    pub async fn wait_for_exit(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.await;
        }
    }

    pub fn get_state(&self) -> ProcessState {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        self.state.lock().unwrap().clone()
    }

    fn mark(state: &Mutex<ProcessState>, next: ProcessState) {
        if let Ok(mut current) = state.lock() {
            *current = next;
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }

    fn read_lines<R>(&mut self, pipe: R, stream: OutputStream)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handler = self.line_handler.clone();
        let pid = self.get_state().pid();

        self.readers.push(tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(handler) = &handler {
                            handler(stream, line);
                        } else {
                            trace!("[{:?}] unobserved {}: {}", pid, stream.as_str(), line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("[{:?}] {} read failed: {}", pid, stream.as_str(), e);
                        break;
                    }
                }
            }
            trace!("[{:?}] {} closed", pid, stream.as_str());
        }));
    }

    fn reap(&mut self, mut child: Child, pid: u32) {
        let state = Arc::clone(&self.state);
        let exit_handler = self.exit_handler.clone();

        self.reaper = Some(tokio::spawn(async move {
            let event = match child.wait().await {
                Ok(status) => {
                    info!("Child {} finished: {}", pid, status);
                    ProcessExitEvent::from(&status)
                }
                Err(e) => {
                    error!("Could not reap child {}: {}", pid, e);
                    ProcessExitEvent { code: None }
                }
            };

            Self::mark(&state, ProcessState::Stopped);
            if let Some(handler) = exit_handler {
                handler.on_process_exit(event).await;
            }
        }));
    }

    #[cfg(unix)]
    fn send_signal(pid: u32, mode: StopMode) {
        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(pid as libc::pid_t, mode.signal()) };
        if rc == 0 {
            debug!("Signalled child {} ({:?})", pid, mode);
        } else {
            warn!("Could not signal child {}: {}", pid, io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    fn send_signal(pid: u32, mode: StopMode) {
        warn!("Cannot send {:?} to child {} on this platform", mode, pid);
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Spawning {} {:?}", self.program, self.args);
        let mut child = self.command().spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned child has no pid"))?;
        Self::mark(&self.state, ProcessState::Running { pid });

        let stdout = child.stdout.take().ok_or(ProcessError::PipeMissing("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::PipeMissing("stderr"))?;
        self.read_lines(stdout, OutputStream::Stdout);
        self.read_lines(stderr, OutputStream::Stderr);
        self.reap(child, pid);

        debug!("Child {} is running", pid);
        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = self.get_state().pid().ok_or(ProcessError::NotStarted)?;
        info!("Stopping child {} ({:?})", pid, mode);
        Self::send_signal(pid, mode);
        Self::mark(&self.state, ProcessState::Stopped);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    fn kill_sync(&mut self) {
        if let Some(pid) = self.get_state().pid() {
            Self::send_signal(pid, StopMode::Force);
            Self::mark(&self.state, ProcessState::Stopped);
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl OutputMonitor for ChildProcessManager {
    fn on_output_line<F>(&mut self, handler: F)
    where
        F: Fn(OutputStream, String) + Send + Sync + 'static,
    {
        self.line_handler = Some(Arc::new(handler));
    }
}
