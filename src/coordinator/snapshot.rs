use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::FileNode;
use crate::connection::ConnectionState;
use crate::terminal::{TerminalId, TerminalSummary};
use crate::workspace::{Diagnostic, TabId, TabSummary};

/// Everything the view renders, copied out in one consistent read.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub connection: ConnectionState,
    /// A tree refresh is in flight.
    pub loading: bool,
    pub tree: Vec<FileNode>,
    pub expanded: Vec<String>,
    pub tabs: Vec<TabSummary>,
    pub active_tab: Option<TabId>,
    pub active_content: Option<String>,
    /// Diagnostics for the active tab's path.
    pub diagnostics: Vec<Diagnostic>,
    pub terminals: Vec<TerminalSummary>,
    pub selected_terminal: Option<TerminalId>,
}

impl Snapshot {
    pub fn active_summary(&self) -> Option<&TabSummary> {
        let active = self.active_tab.as_ref()?;
        self.tabs.iter().find(|t| &t.id == active)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    RefreshFailed,
    ConnectionRejected,
    TerminalFatal,
    OpenFailed,
}

/// A failure nobody was waiting on, kept until the view collects it.
#[derive(Clone, Debug, Serialize)]
pub struct Notice {
    pub at: DateTime<Utc>,
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}
