//! I/O layer - Generic abstractions for process management and transport
//!
//! - **Transport**: background tasks pumping codec-framed messages between
//!   async byte streams and channels
//! - **Process**: backend process lifecycle with stdout/stderr line monitoring
//!
//! Neither knows anything about the debug adapter protocol or the backend RPC.

pub mod process;
pub mod transport;

pub use process::{
    ChildProcessManager, OutputMonitor, OutputStream, ProcessError, ProcessExitEvent,
    ProcessExitHandler, ProcessManager, StopMode,
};
pub use transport::{Inbound, spawn_reader, spawn_writer};
