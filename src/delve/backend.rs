//! Debugger backend process and its RPC connection
//!
//! [`DelveProcess`] spawns a headless `dlv`, connects to its API server when
//! the process prints its first line of output, and queues calls until that
//! connection exists. The session only sees the [`DebuggerBackend`] trait so
//! tests can substitute a scripted backend.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::delve::config::DelveConfig;
use crate::delve::error::BackendError;
use crate::delve::rpc::JsonRpcClient;
use crate::io::{
    ChildProcessManager, OutputMonitor, OutputStream, ProcessError, ProcessExitEvent,
    ProcessExitHandler, ProcessManager, StopMode,
};

/// Notifications from the backend that are not replies to calls
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A line the debugger (or debuggee) printed, newline included
    Output { category: String, text: String },
    /// The debugger process exited
    Exited { code: Option<i32> },
}

pub type BackendEventSender = mpsc::UnboundedSender<BackendEvent>;

/// Call-by-name access to a debugger
#[async_trait]
pub trait DebuggerBackend: Send + Sync {
    /// Resolve once calls can be delivered, or with the reason they never will be
    async fn wait_ready(&self) -> Result<(), BackendError>;

    /// Invoke `method` with positional `params`; calls made before the
    /// connection is up are held until it is
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, BackendError>;

    /// Terminate the debugger process
    async fn close(&self);
}

/// Creates backends for launch and attach requests
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    async fn launch(
        &self,
        config: DelveConfig,
        events: BackendEventSender,
    ) -> Result<Arc<dyn DebuggerBackend>, BackendError>;
}

/// Run a call on its own task and hand the result to `callback`
pub fn call_with<F>(
    backend: Arc<dyn DebuggerBackend>,
    method: &str,
    params: Vec<Value>,
    timeout: Option<Duration>,
    callback: F,
) -> JoinHandle<()>
where
    F: FnOnce(Result<Value, BackendError>) + Send + 'static,
{
    let method = method.to_string();
    tokio::spawn(async move {
        let result = backend.call(&method, params, timeout).await;
        callback(result);
    })
}

// ============================================================================
// Delve Process
// ============================================================================

#[derive(Clone)]
enum ConnectionState {
    Pending,
    Connected(Arc<JsonRpcClient>),
    Failed(String),
}

type ConnectionSender = Arc<watch::Sender<ConnectionState>>;

/// Mark a still-pending connection as failed so queued calls are released
fn fail_pending(connection: &ConnectionSender, reason: &str) {
    connection.send_if_modified(|state| {
        if matches!(state, ConnectionState::Pending) {
            *state = ConnectionState::Failed(reason.to_string());
            true
        } else {
            false
        }
    });
}

struct ExitForwarder {
    events: BackendEventSender,
    connection: ConnectionSender,
}

#[async_trait]
impl ProcessExitHandler for ExitForwarder {
    async fn on_process_exit(&self, event: ProcessExitEvent) {
        info!("DelveProcess: debugger exited with code {:?}", event.code);
        fail_pending(&self.connection, "debugger exited before accepting connections");
        let _ = self.events.send(BackendEvent::Exited { code: event.code });
    }
}

/// A spawned `dlv` process plus its API connection
pub struct DelveProcess {
    process: Mutex<ChildProcessManager>,
    connection: watch::Receiver<ConnectionState>,
    connection_tx: ConnectionSender,
}

impl DelveProcess {
    /// Start `dlv` for `config`; output lines and exit are reported on `events`
    pub async fn spawn(config: DelveConfig, events: BackendEventSender) -> Result<Self, BackendError> {
        let args = config.dlv_args();
        info!(
            "DelveProcess: starting {} {:?} in {}",
            config.dlv_path,
            args,
            config.working_directory.display()
        );

        let process = ChildProcessManager::new(
            config.dlv_path.clone(),
            args,
            Some(config.working_directory.clone()),
        )
        .with_env(config.env.clone());

        Self::start(process, config.listen_address(), events).await
    }

    /// Start `process` and connect to `address` once it prints its first line
    pub async fn start(
        mut process: ChildProcessManager,
        address: String,
        events: BackendEventSender,
    ) -> Result<Self, BackendError> {
        let (connection_tx, connection) = watch::channel(ConnectionState::Pending);
        let connection_tx = Arc::new(connection_tx);

        let server_running = Arc::new(AtomicBool::new(false));
        let output_events = events.clone();
        let output_connection = Arc::clone(&connection_tx);
        process.on_output_line(move |stream, line| {
            let _ = output_events.send(BackendEvent::Output {
                category: stream.as_str().to_string(),
                text: format!("{line}\n"),
            });

            // The first line means the API server is up; connect exactly once
            if !server_running.swap(true, Ordering::SeqCst) {
                Self::spawn_connect(address.clone(), stream, Arc::clone(&output_connection));
            }
        });

        process.on_process_exit(Arc::new(ExitForwarder {
            events,
            connection: Arc::clone(&connection_tx),
        }));

        process.start().await?;

        Ok(Self {
            process: Mutex::new(process),
            connection,
            connection_tx,
        })
    }

    fn spawn_connect(address: String, trigger: OutputStream, connection: ConnectionSender) {
        debug!(
            "DelveProcess: first {} line seen, connecting to {}",
            trigger.as_str(),
            address
        );
        tokio::spawn(async move {
            let state = match JsonRpcClient::connect(&address).await {
                Ok(client) => {
                    info!("DelveProcess: connected to {}", address);
                    ConnectionState::Connected(Arc::new(client))
                }
                Err(e) => {
                    warn!("DelveProcess: failed to connect to {}: {}", address, e);
                    ConnectionState::Failed(e.to_string())
                }
            };
            connection.send_if_modified(|current| {
                if matches!(current, ConnectionState::Pending) {
                    *current = state;
                    true
                } else {
                    false
                }
            });
        });
    }

    async fn client(&self) -> Result<Arc<JsonRpcClient>, BackendError> {
        let mut connection = self.connection.clone();
        let state = connection
            .wait_for(|state| !matches!(state, ConnectionState::Pending))
            .await
            .map_err(|_| BackendError::NotConnected)?
            .clone();

        match state {
            ConnectionState::Connected(client) => Ok(client),
            ConnectionState::Failed(reason) => Err(BackendError::ConnectFailed(reason)),
            ConnectionState::Pending => Err(BackendError::NotConnected),
        }
    }
}

#[async_trait]
impl DebuggerBackend for DelveProcess {
    async fn wait_ready(&self) -> Result<(), BackendError> {
        self.client().await.map(|_| ())
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, BackendError> {
        let client = self.client().await?;
        Ok(client.call(method, params, timeout).await?)
    }

    async fn close(&self) {
        fail_pending(&self.connection_tx, "debugger closed");

        let mut process = self.process.lock().await;
        match process.stop(StopMode::Force).await {
            Ok(()) | Err(ProcessError::NotStarted) => {}
            Err(e) => warn!("DelveProcess: failed to stop debugger: {}", e),
        }
    }
}

impl Drop for DelveProcess {
    fn drop(&mut self) {
        self.process.get_mut().kill_sync();
    }
}

/// Launcher for real `dlv` processes
#[derive(Debug, Default)]
pub struct DelveLauncher;

#[async_trait]
impl BackendLauncher for DelveLauncher {
    async fn launch(
        &self,
        config: DelveConfig,
        events: BackendEventSender,
    ) -> Result<Arc<dyn DebuggerBackend>, BackendError> {
        let process = DelveProcess::spawn(config, events).await?;
        Ok(Arc::new(process))
    }
}
