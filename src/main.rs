mod dap;
mod delve;
mod io;
mod logging;
mod session;

#[cfg(test)]
mod test_utils;

use clap::Parser;
use dap::{Endpoint, FrameCodec, ProtocolMessage};
use delve::DelveLauncher;
use delve::config::DEFAULT_DLV_PATH;
use logging::{LogConfig, init_logging};
use session::{AdapterConfig, DebugSession};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{stdin, stdout};
use tracing::{info, warn};

/// Time allowed for queued responses to reach stdout after the session ends
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// CLI arguments for the Go debug adapter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the dlv executable (overrides DLV_PATH env var)
    #[arg(long, value_name = "PATH", env = "DLV_PATH", default_value = DEFAULT_DLV_PATH)]
    dlv_path: String,

    /// Timeout for debugger inspection calls, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    request_timeout_ms: u64,

    /// Maximum wait for the debugger to accept its connection, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 30_000)]
    connect_timeout_ms: u64,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides DAP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

impl Args {
    fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            dlv_path: self.dlv_path.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

async fn serve(config: AdapterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (inbound, _reader) = io::spawn_reader(stdin(), FrameCodec::<ProtocolMessage>::new());
    let (outbound, writer) = io::spawn_writer(stdout(), FrameCodec::<ProtocolMessage>::new());

    let session = DebugSession::new(config, Endpoint::new(outbound), Arc::new(DelveLauncher))?;
    info!("Go debug adapter ready on stdio");
    session.run(inbound).await;

    // The session owned the last sender, so the writer drains and stops
    if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        warn!("Timed out flushing responses to the front end");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = args.adapter_config();
    info!(
        "Starting Go debug adapter (dlv: {}, request timeout: {:?}, connect timeout: {:?})",
        config.dlv_path, config.request_timeout, config.connect_timeout
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(config));

    // A blocked stdin read would otherwise hold the runtime open
    runtime.shutdown_timeout(FLUSH_TIMEOUT);
    info!("Go debug adapter stopped");
    result
}
