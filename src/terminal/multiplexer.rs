//! Terminal Session Multiplexer.
//!
//! Sessions move `Creating -> Active -> Closing` and disappear once the
//! backend confirms the close or reports the process gone. Render surfaces
//! belong to the view; only an id-to-id association is kept here.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::terminal::geometry::GridSize;

/// Exit reports remembered for handles whose creation has not completed.
const EARLY_EXIT_MEMORY: usize = 32;

/// Client-side session identity, ordered by creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TerminalId(u64);

impl TerminalId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TerminalId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term-{}", self.0)
    }
}

/// Identity of a view-owned render surface.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl From<&str> for SurfaceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SurfaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Creating,
    Active,
    Closing,
}

#[derive(Debug)]
pub struct TerminalSession {
    pub id: TerminalId,
    pub state: SessionState,
    /// Latest size sent to the backend, confirmed or not.
    pub last_known_size: Option<GridSize>,
    pub surface: Option<SurfaceId>,
    handle: Option<String>,
    confirmed_size: Option<GridSize>,
    resizes_issued: u64,
    resizes_confirmed: u64,
    pending_output: BytesMut,
    dropped_bytes: u64,
}

impl TerminalSession {
    /// The backend's handle, once creation is confirmed.
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Last size the backend acknowledged.
    pub fn confirmed_size(&self) -> Option<GridSize> {
        self.confirmed_size
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TerminalSummary {
    pub id: TerminalId,
    pub state: SessionState,
    pub size: Option<GridSize>,
    pub surface: Option<SurfaceId>,
    pub dropped_bytes: u64,
}

/// A resize that was recorded and still has to reach the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingResize {
    pub handle: String,
    pub size: GridSize,
    sequence: u64,
}

#[derive(Debug)]
pub struct TerminalMultiplexer {
    sessions: BTreeMap<TerminalId, TerminalSession>,
    by_handle: HashMap<String, TerminalId>,
    surfaces: HashMap<SurfaceId, TerminalId>,
    selected: Option<TerminalId>,
    early_exits: VecDeque<String>,
    next_id: u64,
    output_limit: usize,
}

impl TerminalMultiplexer {
    pub fn new(output_limit: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            by_handle: HashMap::new(),
            surfaces: HashMap::new(),
            selected: None,
            early_exits: VecDeque::new(),
            next_id: 1,
            output_limit: output_limit.max(1),
        }
    }

    pub fn get(&self, id: TerminalId) -> Option<&TerminalSession> {
        self.sessions.get(&id)
    }

    pub fn selected(&self) -> Option<TerminalId> {
        self.selected
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn summaries(&self) -> Vec<TerminalSummary> {
        self.sessions
            .values()
            .map(|s| TerminalSummary {
                id: s.id,
                state: s.state,
                size: s.last_known_size,
                surface: s.surface.clone(),
                dropped_bytes: s.dropped_bytes,
            })
            .collect()
    }

    pub fn id_for_handle(&self, handle: &str) -> Option<TerminalId> {
        self.by_handle.get(handle).copied()
    }

    /// Reserve an id for a session the backend has been asked to open.
    pub fn begin_create(&mut self) -> TerminalId {
        let id = TerminalId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(
            id,
            TerminalSession {
                id,
                state: SessionState::Creating,
                last_known_size: None,
                surface: None,
                handle: None,
                confirmed_size: None,
                resizes_issued: 0,
                resizes_confirmed: 0,
                pending_output: BytesMut::new(),
                dropped_bytes: 0,
            },
        );
        id
    }

    /// The backend opened the session; it becomes active and selected.
    ///
    /// A session whose exit was reported before this call is dropped and
    /// reported as `Fatal`.
    pub fn complete_create(&mut self, id: TerminalId, handle: String) -> Result<()> {
        if let Some(pos) = self.early_exits.iter().position(|h| *h == handle) {
            self.early_exits.remove(pos);
            self.sessions.remove(&id);
            warn!("Terminal {} ('{}') exited before it was ready", id, handle);
            return Err(AppError::Fatal(format!("{id} exited during startup")));
        }
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(AppError::UnknownTerminal(id))?;
        session.state = SessionState::Active;
        session.handle = Some(handle.clone());
        self.by_handle.insert(handle, id);
        self.selected = Some(id);
        info!("Terminal {} active", id);
        Ok(())
    }

    pub fn fail_create(&mut self, id: TerminalId) {
        if self.sessions.remove(&id).is_some() {
            debug!("Terminal {} creation failed", id);
        }
    }

    /// Mark an active session as closing and hand back its backend handle.
    ///
    /// `Ok(None)` means a close is already under way.
    pub fn begin_close(&mut self, id: TerminalId) -> Result<Option<String>> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(AppError::UnknownTerminal(id))?;
        match session.state {
            SessionState::Closing => Ok(None),
            SessionState::Creating => Err(AppError::ValidationError(format!(
                "{id} is still being created"
            ))),
            SessionState::Active => {
                session.state = SessionState::Closing;
                Ok(session.handle.clone())
            }
        }
    }

    /// The backend refused to close; the session stays usable.
    pub fn abort_close(&mut self, id: TerminalId) {
        if let Some(session) = self.sessions.get_mut(&id)
            && session.state == SessionState::Closing
        {
            session.state = SessionState::Active;
        }
    }

    /// Drop a session. Used for confirmed closes, process exit and fatal
    /// errors alike. Returns `false` if it was already gone.
    pub fn remove(&mut self, id: TerminalId) -> bool {
        let Some(session) = self.sessions.remove(&id) else {
            return false;
        };
        if let Some(handle) = &session.handle {
            self.by_handle.remove(handle);
        }
        if let Some(surface) = &session.surface {
            self.surfaces.remove(surface);
        }
        if self.selected == Some(id) {
            self.selected = self.fallback_selection(id);
        }
        info!("Terminal {} removed", id);
        true
    }

    /// The backend reports the process behind `handle` gone. Returns the
    /// removed session, or remembers the handle if creation is still
    /// pending so [`complete_create`](Self::complete_create) can refuse it.
    pub fn handle_exit(&mut self, handle: &str) -> Option<TerminalId> {
        if let Some(id) = self.id_for_handle(handle) {
            self.remove(id);
            return Some(id);
        }
        let creating = self
            .sessions
            .values()
            .any(|s| s.state == SessionState::Creating);
        if creating && !self.early_exits.iter().any(|h| h == handle) {
            if self.early_exits.len() == EARLY_EXIT_MEMORY {
                self.early_exits.pop_front();
            }
            self.early_exits.push_back(handle.to_string());
        }
        None
    }

    /// Nearest active session below `closed`, else the lowest active one.
    fn fallback_selection(&self, closed: TerminalId) -> Option<TerminalId> {
        let is_active = |s: &&TerminalSession| s.state == SessionState::Active;
        self.sessions
            .range(..closed)
            .rev()
            .map(|(_, s)| s)
            .find(is_active)
            .or_else(|| self.sessions.values().find(is_active))
            .map(|s| s.id)
    }

    pub fn select(&mut self, id: TerminalId) -> Result<()> {
        match self.sessions.get(&id) {
            Some(s) if s.state != SessionState::Creating => {
                self.selected = Some(id);
                Ok(())
            }
            _ => Err(AppError::UnknownTerminal(id)),
        }
    }

    /// Bind a session to a render surface. Returns `false` when that exact
    /// binding already exists.
    pub fn attach(&mut self, surface: SurfaceId, id: TerminalId) -> Result<bool> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(AppError::UnknownTerminal(id))?;
        if session.state == SessionState::Creating {
            return Err(AppError::ValidationError(format!("{id} is not active yet")));
        }
        match &session.surface {
            Some(bound) if *bound == surface => return Ok(false),
            Some(bound) => {
                return Err(AppError::Conflict(format!("{id} is bound to {bound}")));
            }
            None => {}
        }
        if let Some(previous) = self.surfaces.insert(surface.clone(), id)
            && let Some(prev) = self.sessions.get_mut(&previous)
        {
            debug!("Surface {} moved from {} to {}", surface, previous, id);
            prev.surface = None;
        }
        if let Some(session) = self.sessions.get_mut(&id) {
            session.surface = Some(surface);
        }
        Ok(true)
    }

    /// The view unmounted a surface.
    pub fn detach(&mut self, surface: &SurfaceId) -> Option<TerminalId> {
        let id = self.surfaces.remove(surface)?;
        if let Some(session) = self.sessions.get_mut(&id) {
            session.surface = None;
        }
        Some(id)
    }

    /// Buffer output for a session, dropping the oldest bytes beyond the limit.
    pub fn push_output(&mut self, handle: &str, data: &[u8]) -> bool {
        let Some(id) = self.by_handle.get(handle) else {
            warn!("Output for unknown terminal session '{}' dropped", handle);
            return false;
        };
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        session.pending_output.extend_from_slice(data);
        let len = session.pending_output.len();
        if len > self.output_limit {
            let excess = len - self.output_limit;
            session.pending_output.advance(excess);
            session.dropped_bytes += excess as u64;
        }
        true
    }

    /// Take everything buffered for the session bound to `surface`.
    pub fn drain_output(&mut self, surface: &SurfaceId) -> Option<Bytes> {
        let id = self.surfaces.get(surface)?;
        let session = self.sessions.get_mut(id)?;
        if session.pending_output.is_empty() {
            return None;
        }
        Some(session.pending_output.split().freeze())
    }

    /// Handle of a session that may receive input.
    pub fn input_target(&self, id: TerminalId) -> Result<String> {
        match self.sessions.get(&id) {
            Some(s) if s.state == SessionState::Active => s
                .handle
                .clone()
                .ok_or(AppError::UnknownTerminal(id)),
            Some(s) => Err(AppError::ValidationError(format!(
                "{id} is {:?}, not active",
                s.state
            ))),
            None => Err(AppError::UnknownTerminal(id)),
        }
    }

    /// Record a new grid size. `Ok(None)` when it matches the latest
    /// request and the backend need not hear about it.
    pub fn plan_resize(&mut self, id: TerminalId, size: GridSize) -> Result<Option<PendingResize>> {
        let handle = self.input_target(id)?;
        let Some(session) = self.sessions.get_mut(&id) else {
            return Err(AppError::UnknownTerminal(id));
        };
        if session.last_known_size == Some(size) {
            return Ok(None);
        }
        session.last_known_size = Some(size);
        session.resizes_issued += 1;
        Ok(Some(PendingResize {
            handle,
            size,
            sequence: session.resizes_issued,
        }))
    }

    /// The backend applied a resize. Older acknowledgements arriving late
    /// do not overwrite a newer confirmed size.
    pub fn confirm_resize(&mut self, id: TerminalId, pending: &PendingResize) {
        if let Some(session) = self.sessions.get_mut(&id)
            && pending.sequence > session.resizes_confirmed
        {
            session.resizes_confirmed = pending.sequence;
            session.confirmed_size = Some(pending.size);
        }
    }

    /// The backend rejected a resize. If it was the latest request, fall
    /// back to the last size the backend confirmed so the same geometry is
    /// sent again next time.
    pub fn revert_resize(&mut self, id: TerminalId, pending: &PendingResize) {
        if let Some(session) = self.sessions.get_mut(&id)
            && pending.sequence == session.resizes_issued
        {
            session.last_known_size = session.confirmed_size;
        }
    }

    /// Ids of every session that can still be closed.
    pub fn active_ids(&self) -> Vec<TerminalId> {
        self.sessions
            .values()
            .filter(|s| s.state == SessionState::Active)
            .map(|s| s.id)
            .collect()
    }
}
