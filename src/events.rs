use bytes::Bytes;

use crate::connection::ConnectionState;
use crate::workspace::Diagnostic;

/// A confirmed change to the workspace tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeMutation {
    Created { path: String, is_directory: bool },
    Deleted { path: String },
    Renamed { old_path: String, new_path: String },
}

/// Unsolicited traffic from the backend, processed in arrival order.
#[derive(Debug)]
pub enum BackendEvent {
    Connection(ConnectionState),
    /// Each entry fully replaces the diagnostics for its path.
    Diagnostics(Vec<(String, Vec<Diagnostic>)>),
    Tree(TreeMutation),
    /// The backend asks the client to reload the tree.
    TreeInvalidated,
    TerminalOutput { session: String, data: Bytes },
    TerminalExited { session: String },
    TerminalFatal { session: String, message: String },
}
