pub mod backend;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod terminal;
pub mod utils;
pub mod workspace;

// Re-export commonly used types
pub use backend::{Backend, FileNode, LocalBackend};
pub use config::{Settings, SettingsManager};
pub use connection::{ConnectionMonitor, ConnectionState};
pub use coordinator::{Coordinator, Notice, NoticeKind, Snapshot};
pub use error::{AppError, Result};
pub use events::{BackendEvent, TreeMutation};
pub use terminal::{GridSize, SurfaceGeometry, SurfaceId, TerminalId};
pub use utils::init_tracing;
pub use workspace::{CloseOutcome, Diagnostic, SaveOutcome, Severity, TabId, TabSummary};
