//! Client-side mirror of the breakpoints set in the debugger
//!
//! The front end always sends the complete breakpoint set for a file, so each
//! update clears what was recorded for that file and recreates every requested
//! line. Lines are in debugger numbering here; the session converts.

use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::delve::DelveClient;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBreakpoint {
    pub file: String,
    pub line: i64,
    pub id: i64,
    pub verified: bool,
}

/// Result for one requested line
#[derive(Debug, Clone, PartialEq)]
pub struct LineOutcome {
    pub line: i64,
    pub verified: bool,
    pub id: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Default)]
pub struct BreakpointStore {
    by_file: HashMap<String, Vec<RecordedBreakpoint>>,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self, file: &str) -> &[RecordedBreakpoint] {
        self.by_file.get(file).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.by_file.clear();
    }

    /// Replace the breakpoints of `file` with `lines`
    ///
    /// Returns one outcome per requested line, in request order. A line the
    /// debugger rejects is reported unverified without affecting the others.
    /// A breakpoint that fails to clear stays recorded; if its line is
    /// requested again it is reported as set instead of being recreated.
    pub async fn reconcile(
        &mut self,
        client: &DelveClient,
        file: &str,
        lines: &[i64],
    ) -> Vec<LineOutcome> {
        let previous = self.by_file.remove(file).unwrap_or_default();
        let clears = join_all(previous.iter().map(|bp| client.clear_breakpoint(bp.id))).await;

        // Breakpoints the debugger still holds stay recorded so a later update can retry
        let mut still_set = Vec::new();
        for (bp, result) in previous.into_iter().zip(clears) {
            if let Err(e) = result {
                warn!(
                    "Breakpoints: failed to clear {}:{} (id {}): {}",
                    bp.file, bp.line, bp.id, e
                );
                still_set.push(bp);
            }
        }

        let mut to_create: Vec<i64> = Vec::with_capacity(lines.len());
        for &line in lines {
            if !to_create.contains(&line) && !still_set.iter().any(|bp| bp.line == line) {
                to_create.push(line);
            }
        }
        let creates = join_all(
            to_create
                .iter()
                .map(|&line| client.create_breakpoint(file, line)),
        )
        .await;

        let mut by_line: HashMap<i64, LineOutcome> = HashMap::new();
        for bp in &still_set {
            by_line.insert(
                bp.line,
                LineOutcome {
                    line: bp.line,
                    verified: true,
                    id: Some(bp.id),
                    message: None,
                },
            );
        }

        let mut recorded = Vec::with_capacity(to_create.len() + still_set.len());
        for (requested, result) in to_create.into_iter().zip(creates) {
            let outcome = match result {
                Ok(bp) => {
                    let line = if bp.line > 0 { bp.line } else { requested };
                    recorded.push(RecordedBreakpoint {
                        file: file.to_string(),
                        line,
                        id: bp.id,
                        verified: true,
                    });
                    LineOutcome {
                        line,
                        verified: true,
                        id: Some(bp.id),
                        message: None,
                    }
                }
                Err(e) => {
                    debug!("Breakpoints: {}:{} not set: {}", file, requested, e);
                    LineOutcome {
                        line: requested,
                        verified: false,
                        id: None,
                        message: Some(e.to_string()),
                    }
                }
            };
            by_line.insert(requested, outcome);
        }
        recorded.extend(still_set);

        let outcomes = lines
            .iter()
            .filter_map(|line| by_line.get(line).cloned())
            .collect();
        self.by_file.insert(file.to_string(), recorded);
        outcomes
    }
}
