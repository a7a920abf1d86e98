//! Shared state of one job run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// State the coding agent builds up over a run.
///
/// `files` only grows or overwrites existing paths; it never shrinks.
/// `summary` stays empty until the run converges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Task summary extracted from the completion marker.
    pub summary: String,
    /// Every file written so far, keyed by path.
    pub files: BTreeMap<String, String>,
}

impl AgentState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge written files in order; the last write per path wins.
    pub fn merge_files(&mut self, files: impl IntoIterator<Item = (String, String)>) {
        self.files.extend(files);
    }

    /// Whether a summary has been recorded.
    pub fn has_summary(&self) -> bool {
        !self.summary.is_empty()
    }
}
