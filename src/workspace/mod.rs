//! Editor-side workspace state: tree cache, open buffers and diagnostics.

pub mod buffers;
pub mod diagnostics;
pub mod language;
pub mod tree;

pub use buffers::{Buffer, BufferRegistry, CloseOutcome, SaveOutcome, SaveTicket, TabId, TabSummary};
pub use diagnostics::{Diagnostic, DiagnosticsIndex, Position, Range, Severity};
pub use tree::FileTreeCache;
