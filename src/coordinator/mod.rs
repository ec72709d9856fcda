//! Session Coordinator.
//!
//! All state sits behind one lock that is only taken inside synchronous
//! sections and never held across an `.await`. Concurrent callers and the
//! event intake therefore interleave only at backend round-trips, and every
//! transition is applied in full or not at all.
//!
//! Requests that complete after their tab or terminal is gone are dropped
//! at completion time, never applied to resurrected state.

mod snapshot;

use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::Settings;
use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::error::{AppError, Result};
use crate::events::{BackendEvent, TreeMutation};
use crate::terminal::{GridPolicy, SurfaceGeometry, SurfaceId, TerminalId, TerminalMultiplexer};
use crate::utils::is_same_or_descendant;
use crate::workspace::{
    BufferRegistry, CloseOutcome, Diagnostic, DiagnosticsIndex, FileTreeCache, SaveOutcome, TabId,
    TabSummary,
};

pub use snapshot::{Notice, NoticeKind, Snapshot};

struct CoreState {
    connection: ConnectionMonitor,
    tree: FileTreeCache,
    refreshes_issued: u64,
    refreshes_applied: u64,
    refreshes_in_flight: usize,
    buffers: BufferRegistry,
    diagnostics: DiagnosticsIndex,
    terminals: TerminalMultiplexer,
    notices: Vec<Notice>,
}

/// Keeps the `loading` flag honest when a refresh is dropped mid-flight.
struct RefreshInFlight<'a> {
    core: &'a Mutex<CoreState>,
}

impl Drop for RefreshInFlight<'_> {
    fn drop(&mut self) {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        core.refreshes_in_flight -= 1;
    }
}

pub struct Coordinator<B: Backend> {
    backend: B,
    settings: Settings,
    grid: GridPolicy,
    core: Mutex<CoreState>,
}

impl<B: Backend> Coordinator<B> {
    pub fn new(backend: B, settings: Settings) -> Self {
        let grid = GridPolicy::from_settings(&settings.terminal);
        let core = CoreState {
            connection: ConnectionMonitor::new(),
            tree: FileTreeCache::new(),
            refreshes_issued: 0,
            refreshes_applied: 0,
            refreshes_in_flight: 0,
            buffers: BufferRegistry::new(),
            diagnostics: DiagnosticsIndex::new(),
            terminals: TerminalMultiplexer::new(settings.terminal.output_buffer_bytes),
            notices: Vec::new(),
        };
        Self {
            backend,
            settings,
            grid,
            core: Mutex::new(core),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn core(&self) -> MutexGuard<'_, CoreState> {
        // a panic mid-transition cannot leave partial state behind, so the
        // data is still consistent after poisoning
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core().connection.state()
    }

    pub fn snapshot(&self) -> Snapshot {
        let core = self.core();
        let active = core.buffers.active();
        Snapshot {
            connection: core.connection.state(),
            loading: core.refreshes_in_flight > 0,
            tree: core.tree.to_nodes(),
            expanded: core.tree.expanded(),
            tabs: core.buffers.tabs().iter().map(|b| b.summary()).collect(),
            active_tab: active.map(|b| b.id.clone()),
            active_content: active.map(|b| b.content.clone()),
            diagnostics: active
                .map(|b| core.diagnostics.get(&b.path).to_vec())
                .unwrap_or_default(),
            terminals: core.terminals.summaries(),
            selected_terminal: core.terminals.selected(),
        }
    }

    pub fn diagnostics_for(&self, path: &str) -> Vec<Diagnostic> {
        self.core().diagnostics.get(path).to_vec()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.core().notices)
    }

    fn notice(&self, kind: NoticeKind, message: String) {
        warn!("{:?}: {}", kind, message);
        self.core().notices.push(Notice::new(kind, message));
    }

    // ---- intake -------------------------------------------------------

    /// Drain backend events one at a time until the channel closes or
    /// `cancel` fires.
    pub async fn run(&self, rx: &mut mpsc::Receiver<BackendEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("Backend event channel closed");
                        break;
                    }
                },
            };
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::Connection(next) => {
                let result = self.core().connection.transition(next);
                match result {
                    Ok(true) if next == ConnectionState::Connected => {
                        if let Err(e) = self.refresh().await {
                            self.notice(NoticeKind::RefreshFailed, e.to_string());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => self.notice(NoticeKind::ConnectionRejected, e.to_string()),
                }
            }
            BackendEvent::Diagnostics(push) => self.core().diagnostics.apply_push(push),
            BackendEvent::Tree(mutation) => self.apply_mutation(mutation),
            BackendEvent::TreeInvalidated => {
                let connected = self.core().connection.is_connected();
                if connected && let Err(e) = self.refresh().await {
                    self.notice(NoticeKind::RefreshFailed, e.to_string());
                }
            }
            BackendEvent::TerminalOutput { session, data } => {
                self.core().terminals.push_output(&session, &data);
            }
            BackendEvent::TerminalExited { session } => {
                if let Some(id) = self.core().terminals.handle_exit(&session) {
                    info!("Terminal {} exited", id);
                }
            }
            BackendEvent::TerminalFatal { session, message } => {
                let removed = self.core().terminals.handle_exit(&session);
                if let Some(id) = removed {
                    self.notice(NoticeKind::TerminalFatal, format!("{id}: {message}"));
                }
            }
        }
    }

    // ---- file tree ----------------------------------------------------

    /// Fetch a full listing and swap it in. On failure the previous cache
    /// stays and the error is returned.
    ///
    /// A listing requested before a newer listing or a confirmed tree
    /// mutation was applied is dropped on arrival.
    pub async fn refresh(&self) -> Result<()> {
        let ticket = {
            let mut core = self.core();
            core.connection.require_connected()?;
            core.refreshes_issued += 1;
            core.refreshes_in_flight += 1;
            core.refreshes_issued
        };
        let in_flight = RefreshInFlight { core: &self.core };
        let listing = self.backend.list_tree().await;
        drop(in_flight);

        let mut core = self.core();
        let listing = listing?;
        if ticket <= core.refreshes_applied {
            debug!("Tree listing {} superseded; dropped", ticket);
            return Ok(());
        }
        let prune = self.settings.workspace.prune_missing_expanded;
        core.tree.replace(listing, prune)?;
        core.refreshes_applied = ticket;
        Ok(())
    }

    /// Expand or collapse a folder; purely local.
    pub fn toggle_folder(&self, path: &str) -> bool {
        self.core().tree.toggle_folder(path)
    }

    /// Apply a backend-confirmed tree change to the cache and open buffers.
    /// Applying the same confirmation twice is a no-op. A confirmation is
    /// authoritative: cached state in its way is evicted, never reported as
    /// a conflict.
    pub fn apply_mutation(&self, mutation: TreeMutation) {
        let mut core = self.core();
        // listings requested before this point no longer describe the tree
        core.refreshes_applied = core.refreshes_issued;
        match mutation {
            TreeMutation::Created { path, is_directory } => {
                core.tree.insert(&path, is_directory);
            }
            TreeMutation::Deleted { path } => {
                core.tree.remove(&path);
                for buffer in core.buffers.remove_under(&path) {
                    info!("Closed tab {} for deleted '{}'", buffer.id, buffer.path);
                }
            }
            TreeMutation::Renamed { old_path, new_path } => {
                if is_same_or_descendant(&old_path, &new_path) {
                    warn!("Ignoring rename of '{}' onto '{}'", old_path, new_path);
                    return;
                }
                if core.tree.contains(&old_path) && core.tree.contains(&new_path) {
                    warn!("Evicting stale cache entry '{}' for rename", new_path);
                    core.tree.remove(&new_path);
                }
                if let Err(e) = core.tree.rename(&old_path, &new_path) {
                    warn!("Dropping '{}' from the tree cache: {}", old_path, e);
                    core.tree.remove(&old_path);
                }
                let moving = core
                    .buffers
                    .tabs()
                    .iter()
                    .any(|b| is_same_or_descendant(&b.path, &old_path));
                if moving {
                    for stale in core.buffers.remove_under(&new_path) {
                        warn!(
                            "Closed tab {} for '{}', replaced by rename",
                            stale.id, stale.path
                        );
                    }
                }
                let moved = core.buffers.rekey(&old_path, &new_path);
                if !moved.is_empty() {
                    info!(
                        "Moved {} tab(s) from '{}' to '{}'",
                        moved.len(),
                        old_path,
                        new_path
                    );
                }
            }
        }
    }

    pub async fn create_entry(&self, path: &str, is_directory: bool) -> Result<String> {
        self.core().connection.require_connected()?;
        let confirmed = self.backend.create_entry(path, is_directory).await?;
        self.apply_mutation(TreeMutation::Created {
            path: confirmed.clone(),
            is_directory,
        });
        if !is_directory
            && self.settings.workspace.open_created_files
            && let Err(e) = self.open_file(&confirmed).await
        {
            self.notice(NoticeKind::OpenFailed, format!("{confirmed}: {e}"));
        }
        Ok(confirmed)
    }

    /// Ask the backend to rename; tabs follow only once it confirms.
    pub async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<String> {
        self.core().connection.require_connected()?;
        let confirmed = self.backend.rename_entry(old_path, new_path).await?;
        self.apply_mutation(TreeMutation::Renamed {
            old_path: old_path.to_string(),
            new_path: confirmed.clone(),
        });
        Ok(confirmed)
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.core().connection.require_connected()?;
        self.backend.delete_entry(path).await?;
        self.apply_mutation(TreeMutation::Deleted {
            path: path.to_string(),
        });
        Ok(())
    }

    // ---- tabs ---------------------------------------------------------

    /// Activate the tab for `path`, fetching the file first if it is not open.
    pub async fn open_file(&self, path: &str) -> Result<TabId> {
        {
            let mut core = self.core();
            if let Some(id) = core.buffers.find_by_path(path).map(|b| b.id.clone()) {
                core.buffers.activate(&id)?;
                return Ok(id);
            }
            core.connection.require_connected()?;
        }
        let content = self.backend.read_file(path).await?;
        Ok(self.core().buffers.insert_loaded(path, content))
    }

    pub fn select_tab(&self, id: &TabId) -> Result<()> {
        self.core().buffers.activate(id)
    }

    /// Local edit; returns the new dirty flag.
    pub fn update_content(&self, id: &TabId, content: String) -> Result<bool> {
        self.core().buffers.update_content(id, content)
    }

    /// Write the tab's current content. Dirty state is settled against the
    /// content captured here, so edits made while the write is in flight
    /// keep the tab dirty. A failed write leaves the tab untouched.
    pub async fn save_tab(&self, id: &TabId) -> Result<SaveOutcome> {
        let ticket = {
            let mut core = self.core();
            core.connection.require_connected()?;
            core.buffers.begin_save(id)?
        };
        if let Err(e) = self.backend.write_file(&ticket.path, &ticket.content).await {
            warn!("Saving '{}' failed: {}", ticket.path, e);
            return Err(e);
        }
        let outcome = self.core().buffers.complete_save(ticket);
        debug!("Save of tab {} finished: {:?}", id, outcome);
        Ok(outcome)
    }

    /// Close a tab. `confirm` is consulted only when the tab has unsaved
    /// changes; returning `false` keeps it open.
    pub fn close_tab<F>(&self, id: &TabId, confirm: F) -> Result<CloseOutcome>
    where
        F: FnOnce(&TabSummary) -> bool,
    {
        let summary = self
            .core()
            .buffers
            .get(id)
            .map(|b| b.summary())
            .ok_or_else(|| AppError::UnknownTab(id.clone()))?;
        if summary.is_dirty && !confirm(&summary) {
            return Ok(CloseOutcome::Kept);
        }
        match self.core().buffers.remove(id) {
            Ok(_) | Err(AppError::UnknownTab(_)) => Ok(CloseOutcome::Closed),
            Err(e) => Err(e),
        }
    }

    // ---- terminals ----------------------------------------------------

    pub async fn create_terminal(&self) -> Result<TerminalId> {
        let id = {
            let mut core = self.core();
            core.connection.require_connected()?;
            core.terminals.begin_create()
        };
        match self.backend.open_terminal().await {
            Ok(handle) => {
                self.core().terminals.complete_create(id, handle)?;
                Ok(id)
            }
            Err(e) => {
                self.core().terminals.fail_create(id);
                Err(e)
            }
        }
    }

    /// Ask the backend to end a session; it leaves the registry once the
    /// backend confirms.
    pub async fn close_terminal(&self, id: TerminalId) -> Result<()> {
        let handle = {
            let mut core = self.core();
            core.connection.require_connected()?;
            core.terminals.begin_close(id)?
        };
        let Some(handle) = handle else {
            debug!("Terminal {} is already closing", id);
            return Ok(());
        };
        match self.backend.close_terminal(&handle).await {
            Ok(()) => {
                self.core().terminals.remove(id);
                Ok(())
            }
            Err(e) => {
                self.core().terminals.abort_close(id);
                Err(e)
            }
        }
    }

    pub fn select_terminal(&self, id: TerminalId) -> Result<()> {
        self.core().terminals.select(id)
    }

    pub fn attach_surface(&self, surface: SurfaceId, id: TerminalId) -> Result<bool> {
        self.core().terminals.attach(surface, id)
    }

    pub fn detach_surface(&self, surface: &SurfaceId) -> Option<TerminalId> {
        self.core().terminals.detach(surface)
    }

    pub fn drain_output(&self, surface: &SurfaceId) -> Option<Bytes> {
        self.core().terminals.drain_output(surface)
    }

    /// Recompute the grid for a surface and forward it only if it changed.
    /// Returns whether the backend was asked to resize.
    pub async fn resize_terminal(&self, id: TerminalId, geometry: SurfaceGeometry) -> Result<bool> {
        let size = self.grid.grid_for(geometry);
        let pending = {
            let mut core = self.core();
            core.connection.require_connected()?;
            core.terminals.plan_resize(id, size)?
        };
        let Some(pending) = pending else {
            return Ok(false);
        };
        if let Err(e) = self
            .backend
            .resize_terminal(&pending.handle, size.cols, size.rows)
            .await
        {
            self.core().terminals.revert_resize(id, &pending);
            return Err(e);
        }
        self.core().terminals.confirm_resize(id, &pending);
        Ok(true)
    }

    pub async fn send_input(&self, id: TerminalId, data: &[u8]) -> Result<()> {
        let handle = {
            let core = self.core();
            core.connection.require_connected()?;
            core.terminals.input_target(id)?
        };
        self.backend.send_input(&handle, data).await
    }

    /// Close every active terminal concurrently.
    pub async fn shutdown(&self) -> Vec<(TerminalId, Result<()>)> {
        let ids = self.core().terminals.active_ids();
        let results =
            futures::future::join_all(ids.iter().map(|id| self.close_terminal(*id))).await;
        ids.into_iter().zip(results).collect()
    }
}
