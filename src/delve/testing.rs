//! Scripted backend and launcher for session tests

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::delve::backend::{BackendEvent, BackendEventSender, BackendLauncher, DebuggerBackend};
use crate::delve::config::DelveConfig;
use crate::delve::error::BackendError;
use crate::delve::rpc::RpcError;
use crate::io::ProcessError;

type Handler = Arc<dyn Fn(&str, &[Value]) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Vec<Value>,
    pub timeout: Option<Duration>,
}

/// Backend answering calls from a script; `Err` strings become server errors
pub struct MockBackend {
    handler: Handler,
    calls: Mutex<Vec<RecordedCall>>,
    ready_error: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MockBackend {
    pub fn with_handler<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::with_async_handler(move |method, params| {
            let reply = handler(method, params);
            Box::pin(async move { reply })
        })
    }

    /// Script whose replies may wait, e.g. an execution command blocked until a halt
    pub fn with_async_handler<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &[Value]) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Arc::new(handler),
            calls: Mutex::new(Vec::new()),
            ready_error: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Make `wait_ready` fail as if the debugger never accepted a connection
    pub fn fail_ready(&self, reason: &str) {
        *self.ready_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DebuggerBackend for MockBackend {
    async fn wait_ready(&self) -> Result<(), BackendError> {
        match self.ready_error.lock().unwrap().clone() {
            Some(reason) => Err(BackendError::ConnectFailed(reason)),
            None => Ok(()),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, BackendError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed.into());
        }
        let reply = (self.handler)(method, &params);
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            params,
            timeout,
        });

        let reply = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply)
                .await
                .map_err(|_| RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })?,
            None => reply.await,
        };
        reply.map_err(|message| RpcError::Server(message).into())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Launcher handing out a shared [`MockBackend`], replaceable between launches
pub struct MockLauncher {
    backend: Mutex<Arc<MockBackend>>,
    launches: Mutex<Vec<DelveConfig>>,
    events: Mutex<Option<BackendEventSender>>,
    failure: Mutex<Option<String>>,
}

impl MockLauncher {
    pub fn new(backend: Arc<MockBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend: Mutex::new(backend),
            launches: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            failure: Mutex::new(None),
        })
    }

    /// Hand `backend` to every later launch
    pub fn replace_backend(&self, backend: Arc<MockBackend>) {
        *self.backend.lock().unwrap() = backend;
    }

    /// Fail the next launches as if the executable could not be started
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }

    pub fn launches(&self) -> Vec<DelveConfig> {
        self.launches.lock().unwrap().clone()
    }

    /// Inject an event as if the backend process produced it
    pub fn emit(&self, event: BackendEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl BackendLauncher for MockLauncher {
    async fn launch(
        &self,
        config: DelveConfig,
        events: BackendEventSender,
    ) -> Result<Arc<dyn DebuggerBackend>, BackendError> {
        self.launches.lock().unwrap().push(config);
        *self.events.lock().unwrap() = Some(events);

        if let Some(reason) = self.failure.lock().unwrap().clone() {
            return Err(ProcessError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                reason,
            ))
            .into());
        }
        let backend: Arc<dyn DebuggerBackend> = self.backend.lock().unwrap().clone();
        Ok(backend)
    }
}
