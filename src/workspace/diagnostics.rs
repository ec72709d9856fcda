//! Diagnostics Index.
//!
//! Keyed by path only. Nothing here reacts to buffers opening, closing,
//! saving or being renamed; the set for a path changes solely when a push
//! names that path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(range: Range, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            range,
            severity,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiagnosticsIndex {
    by_path: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sets for every path named in `push`; other paths are
    /// untouched. An empty set clears the path.
    pub fn apply_push(&mut self, push: Vec<(String, Vec<Diagnostic>)>) {
        for (path, set) in push {
            tracing::debug!("Diagnostics for '{}': {} entries", path, set.len());
            if set.is_empty() {
                self.by_path.remove(&path);
            } else {
                self.by_path.insert(path, set);
            }
        }
    }

    pub fn get(&self, path: &str) -> &[Diagnostic] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count_by_severity(&self, path: &str, severity: Severity) -> usize {
        self.get(path).iter().filter(|d| d.severity == severity).count()
    }
}
