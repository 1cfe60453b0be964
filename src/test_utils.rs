//! Shared test support
//!
//! Opt-in log capture for unit tests, plus Go program fixtures for the tests
//! that run a real `dlv`.

/// Log capture for `cargo test --features test-logging`
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Install the test subscriber; later calls are no-ops
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate and info for
    /// the runtime. Output goes through the test writer so it is captured per
    /// test.
    ///
    /// # Usage
    ///
    /// ```rust
    /// #[cfg(test)]
    /// mod tests {
    ///     #[cfg(feature = "test-logging")]
    ///     #[ctor::ctor]
    ///     fn init_test_logging() {
    ///         crate::test_utils::logging::init();
    ///     }
    /// }
    /// ```
    ///
    /// ```bash
    /// RUST_LOG=go_debug_adapter::session=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // another test binary path may have won the race
        });
    }
}

/// Expands to a constructor that installs test logging before any test runs
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// Get the dlv path for integration tests
///
/// Checks the DLV_PATH environment variable and falls back to "dlv" if not set,
/// so tests work both in CI and with dlv on the PATH.
#[cfg(all(test, feature = "delve-integration-tests"))]
pub fn get_test_dlv_path() -> String {
    std::env::var("DLV_PATH").unwrap_or_else(|_| "dlv".to_string())
}

/// Go programs for tests that run the real debugger
#[cfg(all(test, feature = "delve-integration-tests"))]
pub mod integration {
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const HELLO: &str = "package main

import \"fmt\"

func main() {
\tgreeting := \"hello\"
\tfmt.Println(greeting)
}
";

    const GO_MOD: &str = "module example.com/hello\n\ngo 1.21\n";

    /// Single-package Go module with automatic cleanup
    pub struct GoProgram {
        _workspace: TempDir, // deleted on drop
        pub root: PathBuf,
    }

    impl GoProgram {
        /// A module whose `main` prints a greeting; line 7 is the `Println` call
        pub fn hello() -> Result<Self, std::io::Error> {
            Self::with_main(HELLO)
        }

        pub fn with_main(source: &str) -> Result<Self, std::io::Error> {
            let workspace = TempDir::new()?;
            let root = workspace.path().to_path_buf();
            fs::write(root.join("go.mod"), GO_MOD)?;
            fs::write(root.join("main.go"), source)?;

            Ok(GoProgram {
                _workspace: workspace,
                root,
            })
        }

        pub fn path(&self) -> &Path {
            &self.root
        }

        pub fn main_file(&self) -> PathBuf {
            self.root.join("main.go")
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_hello_program_is_a_module() {
            let program = GoProgram::hello().unwrap();

            assert!(program.path().join("go.mod").exists());
            let source = fs::read_to_string(program.main_file()).unwrap();
            assert_eq!(source.lines().nth(6), Some("\tfmt.Println(greeting)"));
        }
    }
}
