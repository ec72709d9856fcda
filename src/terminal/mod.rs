mod geometry;
mod multiplexer;

pub use geometry::{GridPolicy, GridSize, SurfaceGeometry};
pub use multiplexer::{
    PendingResize, SessionState, SurfaceId, TerminalId, TerminalMultiplexer, TerminalSession,
    TerminalSummary,
};
