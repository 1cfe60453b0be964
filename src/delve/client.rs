//! Typed Delve API calls over a [`DebuggerBackend`]

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::delve::backend::{DebuggerBackend, call_with};
use crate::delve::error::BackendError;
use crate::delve::rpc::RpcError;
use crate::delve::types::{
    Breakpoint, CommandArgs, CreateBreakpointArgs, DebuggerState, EvalScope, EvalSymbolArgs,
    Goroutine, Location, StacktraceArgs, Variable, method,
};

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(|e| RpcError::Deserialization(e).into())
}

fn encode<T: Serialize>(args: T) -> Result<Vec<Value>, BackendError> {
    let value = serde_json::to_value(args).map_err(RpcError::Serialization)?;
    Ok(vec![value])
}

/// Delve API surface used by the session
///
/// Inspection calls are bounded by `request_timeout`; execution commands are
/// not, since they return only when the debuggee stops.
#[derive(Clone)]
pub struct DelveClient {
    backend: Arc<dyn DebuggerBackend>,
    request_timeout: Duration,
}

impl DelveClient {
    pub fn new(backend: Arc<dyn DebuggerBackend>, request_timeout: Duration) -> Self {
        Self {
            backend,
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn wait_ready(&self) -> Result<(), BackendError> {
        self.backend.wait_ready().await
    }

    pub async fn close(&self) {
        self.backend.close().await
    }

    async fn inspect<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, BackendError> {
        let value = self
            .backend
            .call(method, params, Some(self.request_timeout))
            .await?;
        decode(value)
    }

    /// Run an execution command and wait for the debuggee to stop
    pub async fn command(&self, name: &str) -> Result<DebuggerState, BackendError> {
        let value = self
            .backend
            .call(method::COMMAND, encode(CommandArgs { name })?, None)
            .await?;
        decode(value)
    }

    /// Run an execution command on its own task, handing the state to `callback`
    pub fn command_with<F>(&self, name: &str, callback: F) -> Result<JoinHandle<()>, BackendError>
    where
        F: FnOnce(Result<DebuggerState, BackendError>) + Send + 'static,
    {
        let params = encode(CommandArgs { name })?;
        Ok(call_with(
            Arc::clone(&self.backend),
            method::COMMAND,
            params,
            None,
            move |result| callback(result.and_then(decode)),
        ))
    }

    /// Run an execution command that must answer within the request timeout
    pub async fn command_bounded(&self, name: &str) -> Result<DebuggerState, BackendError> {
        self.inspect(method::COMMAND, encode(CommandArgs { name })?)
            .await
    }

    pub async fn state(&self) -> Result<DebuggerState, BackendError> {
        self.inspect(method::STATE, vec![Value::Null]).await
    }

    pub async fn list_goroutines(&self) -> Result<Vec<Goroutine>, BackendError> {
        self.inspect(method::LIST_GOROUTINES, vec![Value::Null]).await
    }

    pub async fn stacktrace(&self, goroutine_id: i64, depth: usize) -> Result<Vec<Location>, BackendError> {
        let args = StacktraceArgs {
            id: goroutine_id,
            depth,
        };
        self.inspect(method::STACKTRACE_GOROUTINE, encode(args)?)
            .await
    }

    pub async fn list_local_vars(&self, scope: EvalScope) -> Result<Vec<Variable>, BackendError> {
        self.inspect(method::LIST_LOCAL_VARS, encode(scope)?).await
    }

    pub async fn list_function_args(&self, scope: EvalScope) -> Result<Vec<Variable>, BackendError> {
        self.inspect(method::LIST_FUNCTION_ARGS, encode(scope)?)
            .await
    }

    pub async fn eval_symbol(&self, symbol: &str, scope: EvalScope) -> Result<Variable, BackendError> {
        self.inspect(method::EVAL_SYMBOL, encode(EvalSymbolArgs { symbol, scope })?)
            .await
    }

    pub async fn create_breakpoint(&self, file: &str, line: i64) -> Result<Breakpoint, BackendError> {
        self.inspect(
            method::CREATE_BREAKPOINT,
            encode(CreateBreakpointArgs { file, line })?,
        )
        .await
    }

    pub async fn clear_breakpoint(&self, id: i64) -> Result<Breakpoint, BackendError> {
        self.inspect(method::CLEAR_BREAKPOINT, encode(id)?).await
    }

    /// Detach from the debuggee, killing it when `kill` is set
    pub async fn detach(&self, kill: bool) -> Result<(), BackendError> {
        self.inspect::<Value>(method::DETACH, encode(kill)?)
            .await
            .map(|_| ())
    }
}
