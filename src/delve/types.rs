//! Delve JSON-RPC (API v1) payload shapes
//!
//! Only the fields the adapter reads are modelled; everything else in the
//! debugger's replies is ignored during deserialization.

use serde::{Deserialize, Serialize};

/// Execution-control command names accepted by `RPCServer.Command`
pub mod command {
    pub const CONTINUE: &str = "continue";
    pub const NEXT: &str = "next";
    pub const STEP: &str = "step";
    pub const STEP_OUT: &str = "stepOut";
    pub const HALT: &str = "halt";
}

/// Fully qualified RPC method names
pub mod method {
    pub const COMMAND: &str = "RPCServer.Command";
    pub const STATE: &str = "RPCServer.State";
    pub const LIST_GOROUTINES: &str = "RPCServer.ListGoroutines";
    pub const STACKTRACE_GOROUTINE: &str = "RPCServer.StacktraceGoroutine";
    pub const LIST_LOCAL_VARS: &str = "RPCServer.ListLocalVars";
    pub const LIST_FUNCTION_ARGS: &str = "RPCServer.ListFunctionArgs";
    pub const EVAL_SYMBOL: &str = "RPCServer.EvalSymbol";
    pub const CREATE_BREAKPOINT: &str = "RPCServer.CreateBreakpoint";
    pub const CLEAR_BREAKPOINT: &str = "RPCServer.ClearBreakpoint";
    pub const DETACH: &str = "RPCServer.Detach";
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebuggerState {
    pub current_thread: Option<Thread>,
    pub current_goroutine: Option<Goroutine>,
    pub exited: bool,
    pub exit_status: i64,
}

impl DebuggerState {
    /// Goroutine id the front end should see as the stopped thread
    pub fn stopped_goroutine_id(&self) -> i64 {
        self.current_goroutine
            .as_ref()
            .map(|g| g.id)
            .or_else(|| self.current_thread.as_ref().map(|t| t.goroutine_id))
            .unwrap_or(0)
    }

    /// The stopping thread is sitting on a user breakpoint
    pub fn at_breakpoint(&self) -> bool {
        self.current_thread
            .as_ref()
            .is_some_and(|t| t.breakpoint.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thread {
    pub id: i64,
    pub file: String,
    pub line: i64,
    #[serde(rename = "goroutineID")]
    pub goroutine_id: i64,
    pub breakpoint: Option<Breakpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Goroutine {
    pub id: i64,
    pub current_loc: Location,
    pub user_current_loc: Location,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Function {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Location {
    pub pc: u64,
    pub file: String,
    pub line: i64,
    pub function: Option<Function>,
}

impl Location {
    pub fn function_name(&self) -> &str {
        self.function.as_ref().map_or("", |f| f.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: u32,
    pub value: String,
    pub len: i64,
    pub cap: i64,
    pub children: Vec<Variable>,
    pub unreadable: String,
}

impl Variable {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Breakpoint {
    pub id: i64,
    pub file: String,
    pub line: i64,
    pub function_name: String,
}

// ============================================================================
// Call arguments
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CommandArgs<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StacktraceArgs {
    pub id: i64,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvalScope {
    #[serde(rename = "goroutineID")]
    pub goroutine_id: i64,
    pub frame: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalSymbolArgs<'a> {
    pub symbol: &'a str,
    pub scope: EvalScope,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateBreakpointArgs<'a> {
    pub file: &'a str,
    pub line: i64,
}
