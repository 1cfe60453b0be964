//! Adapter logging setup
//!
//! stdout carries the protocol, so every destination here is stderr or a file.

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where and how the adapter writes its own logs
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `go_debug_adapter::session=trace`
    pub level: String,
    /// Append to this file instead of stderr
    pub file_path: Option<PathBuf>,
    /// One JSON object per event
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Read `RUST_LOG`, `DAP_LOG_FILE`, `DAP_LOG_UNIQUE` and `DAP_LOG_JSON`
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let unique = env::var("DAP_LOG_UNIQUE").unwrap_or_default() == "true";
        let file_path = env::var("DAP_LOG_FILE")
            .ok()
            .map(|path| log_file_path(PathBuf::from(path), unique, std::process::id()));
        let json_format = env::var("DAP_LOG_JSON").unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Command-line values win over the environment
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// Insert the process id before the extension when `unique` is set
///
/// Several adapters launched by one editor can then share a log directory.
fn log_file_path(mut path: PathBuf, unique: bool, pid: u32) -> PathBuf {
    if !unique {
        return path;
    }
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return path;
    };
    let unique_name = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{stem}.{pid}.{ext}"),
        _ => format!("{stem}.{pid}"),
    };
    path.set_file_name(unique_name);
    path
}

/// Install the global subscriber described by `config`
///
/// A file destination is opened for append so restarts keep earlier sessions.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    let writer = match &config.file_path {
        Some(path) => BoxMakeWriter::new(OpenOptions::new().create(true).append(true).open(path)?),
        None => BoxMakeWriter::new(io::stderr),
    };
    let layer = fmt::layer().with_writer(writer).with_ansi(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.json_format {
        registry.with(layer.json()).try_init()?;
    } else {
        registry
            .with(layer.with_target(true).with_thread_ids(true).with_line_number(true))
            .try_init()?;
    }
    Ok(())
}

/// Log a front-end protocol message in one structured line
#[macro_export]
macro_rules! log_dap_message {
    ($level:expr, $direction:expr, $name:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            name = $name,
            data = ?$data,
            pid = std::process::id(),
            "DAP message"
        );
    };
}

/// Log a debugger backend RPC exchange in one structured line
#[macro_export]
macro_rules! log_rpc_message {
    ($level:expr, $direction:expr, $method:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            method = $method,
            data = ?$data,
            pid = std::process::id(),
            "RPC message"
        );
    };
}

/// Log how long a request took to answer
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "Request timing"
        );
    };
}
