//! Delve debugger backend: launch configuration, JSON-RPC transport, process
//! lifecycle and the typed API calls the session makes

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod rpc;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use backend::{
    BackendEvent, BackendEventSender, BackendLauncher, DebuggerBackend, DelveLauncher,
    DelveProcess, call_with,
};
pub use client::DelveClient;
pub use config::{DelveConfig, DelveConfigBuilder, DelveMode};
pub use error::{BackendError, DelveConfigError};
pub use rpc::{JsonRpcClient, RpcError};
