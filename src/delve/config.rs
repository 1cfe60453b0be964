//! Launch configuration for the Delve debugger
//!
//! [`DelveConfigBuilder`] validates what the front end asked for and
//! [`DelveConfig::dlv_args`] turns it into the headless `dlv` command line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::delve::error::DelveConfigError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Executable used when neither the request nor the environment names one
pub const DEFAULT_DLV_PATH: &str = "dlv";

/// Loopback address the headless server listens on
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const DEFAULT_PORT: u16 = 2345;

/// Delve JSON-RPC API version spoken by the adapter
pub const API_VERSION: u8 = 1;

/// How the debugger obtains its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelveMode {
    /// Build the package in the working directory and debug it
    Debug,
    /// Build the package's tests and debug them
    Test,
    /// Debug a prebuilt executable
    Exec,
    /// Attach to a running process
    Attach,
}

impl DelveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelveMode::Debug => "debug",
            DelveMode::Test => "test",
            DelveMode::Exec => "exec",
            DelveMode::Attach => "attach",
        }
    }
}

/// Validated debugger launch configuration
#[derive(Debug, Clone)]
pub struct DelveConfig {
    pub dlv_path: String,
    pub mode: DelveMode,
    pub program: Option<PathBuf>,
    pub process_id: Option<u32>,
    /// Directory the `dlv` process runs in
    pub working_directory: PathBuf,
    /// Working directory for the debuggee when it differs from the above
    pub target_directory: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub program_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub build_flags: Option<String>,
    pub init: Option<String>,
    pub show_log: bool,
}

impl DelveConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full `dlv` command line, excluding the executable itself
    pub fn dlv_args(&self) -> Vec<String> {
        let mut args = vec![self.mode.as_str().to_string()];

        match self.mode {
            DelveMode::Exec => {
                if let Some(program) = &self.program {
                    args.push(program.to_string_lossy().to_string());
                }
            }
            DelveMode::Attach => {
                if let Some(pid) = self.process_id {
                    args.push(pid.to_string());
                }
            }
            DelveMode::Debug | DelveMode::Test => {}
        }

        args.push("--headless=true".to_string());
        args.push(format!("--listen={}", self.listen_address()));
        args.push(format!("--api-version={API_VERSION}"));

        if let Some(dir) = &self.target_directory {
            args.push(format!("--wd={}", dir.to_string_lossy()));
        }
        if self.show_log {
            args.push("--log=true".to_string());
        }
        if let Some(flags) = &self.build_flags {
            args.push(format!("--build-flags={flags}"));
        }
        if let Some(init) = &self.init {
            args.push(format!("--init={init}"));
        }

        if !self.program_args.is_empty() {
            args.push("--".to_string());
            args.extend(self.program_args.iter().cloned());
        }

        args
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for DelveConfig with validation and defaults
#[derive(Debug)]
pub struct DelveConfigBuilder {
    dlv_path: Option<String>,
    mode: DelveMode,
    program: Option<PathBuf>,
    process_id: Option<u32>,
    cwd: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    program_args: Vec<String>,
    env: HashMap<String, String>,
    build_flags: Option<String>,
    init: Option<String>,
    show_log: bool,
}

impl DelveConfigBuilder {
    pub fn new(mode: DelveMode) -> Self {
        Self {
            dlv_path: None,
            mode,
            program: None,
            process_id: None,
            cwd: None,
            host: None,
            port: None,
            program_args: Vec::new(),
            env: HashMap::new(),
            build_flags: None,
            init: None,
            show_log: false,
        }
    }

    pub fn dlv_path(mut self, path: impl Into<String>) -> Self {
        self.dlv_path = Some(path.into());
        self
    }

    pub fn program(mut self, path: impl Into<PathBuf>) -> Self {
        self.program = Some(path.into());
        self
    }

    pub fn process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }

    /// Working directory requested by the front end
    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn program_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.program_args
            .extend(args.into_iter().map(|arg| arg.into()));
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn build_flags(mut self, flags: impl Into<String>) -> Self {
        self.build_flags = Some(flags.into());
        self
    }

    pub fn init(mut self, script: impl Into<String>) -> Self {
        self.init = Some(script.into());
        self
    }

    pub fn show_log(mut self, enabled: bool) -> Self {
        self.show_log = enabled;
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<DelveConfig, DelveConfigError> {
        let dlv_path = self
            .dlv_path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_DLV_PATH.to_string());
        let host = self.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.is_empty() {
            return Err(DelveConfigError::missing_field("host"));
        }
        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(DelveConfigError::InvalidPort {
                port,
                reason: "the debugger needs a fixed port to connect to".to_string(),
            });
        }

        Self::validate_flag("buildFlags", self.build_flags.as_deref())?;
        Self::validate_flag("init", self.init.as_deref())?;

        let (program, process_id, working_directory, target_directory) = match self.mode {
            DelveMode::Attach => {
                let pid = self
                    .process_id
                    .ok_or_else(|| DelveConfigError::missing_field("processId"))?;
                let working_directory = self.cwd.unwrap_or_else(|| PathBuf::from("."));
                (None, Some(pid), working_directory, None)
            }
            DelveMode::Debug | DelveMode::Test | DelveMode::Exec => {
                let program = Self::validate_program(self.program)?;
                let program_dir = Self::program_directory(&program);

                if self.mode == DelveMode::Exec {
                    let working_directory = self.cwd.unwrap_or(program_dir);
                    (Some(program), None, working_directory, None)
                } else {
                    // dlv builds the package found in its own working directory
                    let target_directory = self.cwd.filter(|cwd| *cwd != program_dir);
                    (Some(program), None, program_dir, target_directory)
                }
            }
        };

        Ok(DelveConfig {
            dlv_path,
            mode: self.mode,
            program,
            process_id,
            working_directory,
            target_directory,
            host,
            port,
            program_args: self.program_args,
            env: self.env,
            build_flags: self.build_flags,
            init: self.init,
            show_log: self.show_log,
        })
    }

    fn validate_program(program: Option<PathBuf>) -> Result<PathBuf, DelveConfigError> {
        let program = program
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| DelveConfigError::missing_field("program"))?;

        if program.to_string_lossy().contains('\0') {
            return Err(DelveConfigError::invalid_program(
                program,
                "path contains null character",
            ));
        }
        if !program.exists() {
            return Err(DelveConfigError::invalid_program(program, "does not exist"));
        }
        Ok(program)
    }

    fn validate_flag(name: &str, value: Option<&str>) -> Result<(), DelveConfigError> {
        match value {
            Some(v) if v.contains('\0') => Err(DelveConfigError::invalid_flag(
                name,
                "cannot contain null characters",
            )),
            _ => Ok(()),
        }
    }

    /// The program itself when it is a package directory, else its parent
    fn program_directory(program: &Path) -> PathBuf {
        if program.is_dir() {
            return program.to_path_buf();
        }
        program
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn go_package() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("main.go");
        std::fs::write(&main, "package main\n\nfunc main() {}\n").unwrap();
        (dir, main)
    }

    #[test]
    fn test_debug_mode_runs_in_program_directory() {
        let (dir, main) = go_package();

        let config = DelveConfigBuilder::new(DelveMode::Debug)
            .program(&main)
            .program_args(["-v", "input.txt"])
            .build()
            .unwrap();

        assert_eq!(config.working_directory, dir.path());
        assert_eq!(
            config.dlv_args(),
            vec![
                "debug",
                "--headless=true",
                "--listen=127.0.0.1:2345",
                "--api-version=1",
                "--",
                "-v",
                "input.txt"
            ]
        );
    }

    #[test]
    fn test_directory_program_is_its_own_working_directory() {
        let (dir, _) = go_package();

        let config = DelveConfigBuilder::new(DelveMode::Test)
            .program(dir.path())
            .build()
            .unwrap();

        assert_eq!(config.working_directory, dir.path());
        assert_eq!(config.dlv_args()[0], "test");
    }

    #[test]
    fn test_exec_mode_passes_program_positionally() {
        let (_dir, main) = go_package();

        let config = DelveConfigBuilder::new(DelveMode::Exec)
            .program(&main)
            .host("0.0.0.0")
            .port(4000)
            .show_log(true)
            .build_flags("-tags=integration")
            .init("/tmp/init.dlv")
            .build()
            .unwrap();

        let args = config.dlv_args();
        assert_eq!(args[0], "exec");
        assert_eq!(args[1], main.to_string_lossy());
        assert!(args.contains(&"--listen=0.0.0.0:4000".to_string()));
        assert!(args.contains(&"--log=true".to_string()));
        assert!(args.contains(&"--build-flags=-tags=integration".to_string()));
        assert!(args.contains(&"--init=/tmp/init.dlv".to_string()));
        assert!(!args.contains(&"--".to_string()));
    }

    #[test]
    fn test_attach_mode_requires_process_id() {
        let missing = DelveConfigBuilder::new(DelveMode::Attach).build();
        assert!(matches!(
            missing,
            Err(DelveConfigError::MissingField { ref field }) if field == "processId"
        ));

        let config = DelveConfigBuilder::new(DelveMode::Attach)
            .process_id(4242)
            .build()
            .unwrap();
        assert_eq!(&config.dlv_args()[..2], ["attach", "4242"]);
    }

    #[test]
    fn test_explicit_cwd_becomes_target_directory() {
        let (_dir, main) = go_package();
        let other = TempDir::new().unwrap();

        let config = DelveConfigBuilder::new(DelveMode::Debug)
            .program(&main)
            .cwd(other.path())
            .build()
            .unwrap();

        let expected = format!("--wd={}", other.path().to_string_lossy());
        assert!(config.dlv_args().contains(&expected));
    }

    #[test]
    fn test_validation_errors() {
        let no_program = DelveConfigBuilder::new(DelveMode::Debug).build();
        assert!(matches!(no_program, Err(DelveConfigError::MissingField { .. })));

        let missing = DelveConfigBuilder::new(DelveMode::Debug)
            .program("/definitely/not/here/main.go")
            .build();
        assert!(matches!(missing, Err(DelveConfigError::InvalidProgram { .. })));

        let (_dir, main) = go_package();
        let zero_port = DelveConfigBuilder::new(DelveMode::Debug)
            .program(&main)
            .port(0)
            .build();
        assert!(matches!(zero_port, Err(DelveConfigError::InvalidPort { port: 0, .. })));

        let bad_flag = DelveConfigBuilder::new(DelveMode::Debug)
            .program(&main)
            .build_flags("-race\0")
            .build();
        assert!(matches!(bad_flag, Err(DelveConfigError::InvalidFlag { .. })));
    }

    #[test]
    fn test_empty_dlv_path_falls_back_to_default() {
        let config = DelveConfigBuilder::new(DelveMode::Attach)
            .process_id(1)
            .dlv_path("")
            .build()
            .unwrap();
        assert_eq!(config.dlv_path, DEFAULT_DLV_PATH);
    }
}
