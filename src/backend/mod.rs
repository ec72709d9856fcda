//! The backend collaborator: workspace file system, terminal processes and
//! analysis all live on the far side of this trait.
//!
//! Push traffic (terminal output, diagnostics, connection changes) does not go
//! through the trait; it arrives as [`crate::events::BackendEvent`]s on the
//! coordinator's intake channel.

pub mod local;
#[cfg(test)]
pub mod mock;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use local::LocalBackend;

/// One entry of a tree listing as the backend reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn file(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: crate::utils::file_name(&path).to_string(),
            path,
            is_directory: false,
            children: None,
        }
    }

    pub fn directory(path: impl Into<String>, children: Vec<FileNode>) -> Self {
        let path = path.into();
        Self {
            name: crate::utils::file_name(&path).to_string(),
            path,
            is_directory: true,
            children: Some(children),
        }
    }
}

/// Remote operations the session core depends on.
///
/// Timeouts are the implementation's business: every call must eventually
/// resolve to success or an error.
pub trait Backend {
    async fn list_tree(&self) -> Result<Vec<FileNode>>;

    /// Fails with `NotFound` or `Unreadable`.
    async fn read_file(&self, path: &str) -> Result<String>;

    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Returns the path the backend actually created.
    async fn create_entry(&self, path: &str, is_directory: bool) -> Result<String>;

    async fn delete_entry(&self, path: &str) -> Result<()>;

    /// Returns the confirmed new path, or `Conflict` when it is taken.
    async fn rename_entry(&self, old_path: &str, new_path: &str) -> Result<String>;

    /// Returns the backend's handle for the new session.
    async fn open_terminal(&self) -> Result<String>;

    async fn close_terminal(&self, session: &str) -> Result<()>;

    async fn resize_terminal(&self, session: &str, cols: u16, rows: u16) -> Result<()>;

    async fn send_input(&self, session: &str, data: &[u8]) -> Result<()>;
}
