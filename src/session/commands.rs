//! Name-keyed dispatch table for front-end requests

use std::collections::HashMap;

/// Every request the session knows how to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Initialize,
    Launch,
    Attach,
    Disconnect,
    SetBreakpoints,
    SetExceptionBreakpoints,
    ConfigurationDone,
    Continue,
    Next,
    StepIn,
    StepOut,
    Pause,
    StackTrace,
    Scopes,
    Variables,
    Source,
    Threads,
    Evaluate,
}

impl Command {
    pub const ALL: [Command; 18] = [
        Command::Initialize,
        Command::Launch,
        Command::Attach,
        Command::Disconnect,
        Command::SetBreakpoints,
        Command::SetExceptionBreakpoints,
        Command::ConfigurationDone,
        Command::Continue,
        Command::Next,
        Command::StepIn,
        Command::StepOut,
        Command::Pause,
        Command::StackTrace,
        Command::Scopes,
        Command::Variables,
        Command::Source,
        Command::Threads,
        Command::Evaluate,
    ];

    /// Wire name of the request
    pub fn name(self) -> &'static str {
        match self {
            Command::Initialize => "initialize",
            Command::Launch => "launch",
            Command::Attach => "attach",
            Command::Disconnect => "disconnect",
            Command::SetBreakpoints => "setBreakpoints",
            Command::SetExceptionBreakpoints => "setExceptionBreakpoints",
            Command::ConfigurationDone => "configurationDone",
            Command::Continue => "continue",
            Command::Next => "next",
            Command::StepIn => "stepIn",
            Command::StepOut => "stepOut",
            Command::Pause => "pause",
            Command::StackTrace => "stackTrace",
            Command::Scopes => "scopes",
            Command::Variables => "variables",
            Command::Source => "source",
            Command::Threads => "threads",
            Command::Evaluate => "evaluate",
        }
    }

    /// Error code reported when the command fails
    pub fn error_code(self) -> i64 {
        match self {
            Command::Initialize | Command::Launch | Command::Attach => 3000,
            Command::Disconnect => 2000,
            Command::SetBreakpoints => 2001,
            Command::SetExceptionBreakpoints | Command::ConfigurationDone => 2002,
            Command::Continue => 2003,
            Command::Next => 2004,
            Command::StepIn => 2005,
            Command::StepOut => 2006,
            Command::Pause => 2007,
            Command::StackTrace => 2008,
            Command::Scopes => 2009,
            Command::Variables => 2010,
            Command::Source => 2011,
            Command::Threads => 2012,
            Command::Evaluate => 2013,
        }
    }

    /// Leading phrase of the failure message
    pub fn failure_summary(self) -> &'static str {
        match self {
            Command::Initialize => "Unable to initialize",
            Command::Launch => "Failed to launch",
            Command::Attach => "Failed to attach",
            Command::Disconnect => "Failed to disconnect",
            Command::SetBreakpoints => "Unable to set breakpoints",
            Command::SetExceptionBreakpoints | Command::ConfigurationDone => {
                "Unable to start the program"
            }
            Command::Continue => "Unable to continue",
            Command::Next => "Unable to step over",
            Command::StepIn => "Unable to step in",
            Command::StepOut => "Unable to step out",
            Command::Pause => "Unable to pause",
            Command::StackTrace => "Unable to produce stack trace",
            Command::Scopes => "Unable to list scopes",
            Command::Variables => "Unable to list variables",
            Command::Source => "Unable to read source",
            Command::Threads => "Unable to list threads",
            Command::Evaluate => "Unable to evaluate expression",
        }
    }

    /// Backend command and stop reason for execution-control requests
    pub fn execution(self) -> Option<(&'static str, &'static str)> {
        use crate::delve::types::command;
        match self {
            Command::Continue => Some((command::CONTINUE, "breakpoint")),
            Command::Next => Some((command::NEXT, "step")),
            Command::StepIn => Some((command::STEP, "step")),
            Command::StepOut => Some((command::STEP_OUT, "step")),
            _ => None,
        }
    }

    /// Whether the command needs a launched debugger
    pub fn requires_backend(self) -> bool {
        !matches!(
            self,
            Command::Initialize | Command::Launch | Command::Attach | Command::Disconnect
                | Command::Source
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Command {0} registered twice")]
pub struct DuplicateCommand(pub &'static str);

/// Lookup from wire name to command, built once at startup
#[derive(Debug)]
pub struct CommandTable {
    by_name: HashMap<&'static str, Command>,
}

impl CommandTable {
    pub fn new() -> Result<Self, DuplicateCommand> {
        Self::from_commands(&Command::ALL)
    }

    pub fn from_commands(commands: &[Command]) -> Result<Self, DuplicateCommand> {
        let mut by_name = HashMap::with_capacity(commands.len());
        for command in commands {
            if by_name.insert(command.name(), *command).is_some() {
                return Err(DuplicateCommand(command.name()));
            }
        }
        Ok(Self { by_name })
    }

    pub fn lookup(&self, name: &str) -> Option<Command> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_resolves_every_command_by_name() {
        let table = CommandTable::new().unwrap();

        assert_eq!(table.len(), Command::ALL.len());
        for command in Command::ALL {
            assert_eq!(table.lookup(command.name()), Some(command));
        }
        assert_eq!(table.lookup("frobnicate"), None);
        assert_eq!(table.lookup("Continue"), None);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let result = CommandTable::from_commands(&[Command::Next, Command::Pause, Command::Next]);
        assert!(matches!(result, Err(DuplicateCommand("next"))));
    }

    #[test]
    fn test_error_codes_are_distinct_per_backend_command() {
        let codes: HashSet<i64> = Command::ALL
            .iter()
            .filter(|c| c.error_code() != 3000)
            .filter(|c| **c != Command::ConfigurationDone)
            .map(|c| c.error_code())
            .collect();
        assert_eq!(codes.len(), Command::ALL.len() - 4);
    }

    #[test]
    fn test_execution_commands_map_to_backend_names() {
        assert_eq!(Command::Continue.execution(), Some(("continue", "breakpoint")));
        assert_eq!(Command::StepIn.execution(), Some(("step", "step")));
        assert_eq!(Command::StepOut.execution(), Some(("stepOut", "step")));
        assert_eq!(Command::Pause.execution(), None);
    }
}
