//! Buffer/Tab Registry.
//!
//! One buffer per open path, kept in tab order. A buffer is dirty exactly when
//! its content differs from the last content the backend confirmed (loaded or
//! saved) for it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::utils::{file_name, is_same_or_descendant, rebase_path};
use crate::workspace::language::language_for_path;

/// Tab identity; stable across renames.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Buffer {
    pub id: TabId,
    pub path: String,
    pub content: String,
    pub language: &'static str,
    pub last_saved_at: Option<DateTime<Utc>>,
    saved_content: String,
    issued_saves: u64,
    confirmed_save: u64,
}

impl Buffer {
    fn new(path: String, content: String) -> Self {
        Self {
            id: TabId::new(),
            language: language_for_path(&path),
            path,
            saved_content: content.clone(),
            content,
            last_saved_at: None,
            issued_saves: 0,
            confirmed_save: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.content != self.saved_content
    }

    pub fn summary(&self) -> TabSummary {
        TabSummary {
            id: self.id.clone(),
            path: self.path.clone(),
            name: file_name(&self.path).to_string(),
            language: self.language.to_string(),
            is_dirty: self.is_dirty(),
            last_saved_at: self.last_saved_at,
        }
    }
}

/// What the view needs to draw a tab.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TabSummary {
    pub id: TabId,
    pub path: String,
    pub name: String,
    pub language: String,
    pub is_dirty: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
}

/// Captured at the moment a save is dispatched.
#[derive(Clone, Debug)]
pub struct SaveTicket {
    pub tab_id: TabId,
    pub path: String,
    pub content: String,
    sequence: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The buffer now matches what the backend holds.
    Saved,
    /// The write landed but another save is still owed.
    StillDirty,
    /// The tab was closed before the write completed.
    Discarded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The confirmation hook declined to drop unsaved changes.
    Kept,
}

#[derive(Debug, Default)]
pub struct BufferRegistry {
    tabs: Vec<Buffer>,
    active: Option<TabId>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tabs(&self) -> &[Buffer] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn active_id(&self) -> Option<&TabId> {
        self.active.as_ref()
    }

    pub fn active(&self) -> Option<&Buffer> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &TabId) -> Option<&Buffer> {
        self.tabs.iter().find(|b| &b.id == id)
    }

    pub fn find_by_path(&self, path: &str) -> Option<&Buffer> {
        self.tabs.iter().find(|b| b.path == path)
    }

    fn get_mut(&mut self, id: &TabId) -> Result<&mut Buffer> {
        self.tabs
            .iter_mut()
            .find(|b| &b.id == id)
            .ok_or_else(|| AppError::UnknownTab(id.clone()))
    }

    pub fn activate(&mut self, id: &TabId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(AppError::UnknownTab(id.clone()));
        }
        self.active = Some(id.clone());
        Ok(())
    }

    /// Register freshly loaded content for `path` and activate it.
    ///
    /// If a buffer for `path` appeared while the content was being fetched,
    /// that buffer wins and the fetched content is dropped.
    pub fn insert_loaded(&mut self, path: &str, content: String) -> TabId {
        if let Some(existing) = self.find_by_path(path) {
            let id = existing.id.clone();
            debug!("'{}' already open as tab {}; dropping fetched content", path, id);
            self.active = Some(id.clone());
            return id;
        }
        let buffer = Buffer::new(path.to_string(), content);
        let id = buffer.id.clone();
        debug!("Opened '{}' as tab {}", path, id);
        self.tabs.push(buffer);
        self.active = Some(id.clone());
        id
    }

    /// Replace the content of a tab; returns the new dirty flag.
    pub fn update_content(&mut self, id: &TabId, content: String) -> Result<bool> {
        let buffer = self.get_mut(id)?;
        buffer.content = content;
        Ok(buffer.is_dirty())
    }

    pub fn begin_save(&mut self, id: &TabId) -> Result<SaveTicket> {
        let buffer = self.get_mut(id)?;
        buffer.issued_saves += 1;
        Ok(SaveTicket {
            tab_id: buffer.id.clone(),
            path: buffer.path.clone(),
            content: buffer.content.clone(),
            sequence: buffer.issued_saves,
        })
    }

    /// Apply a successful write. The tab is looked up again here, so a tab
    /// closed or renamed while the write was in flight is handled by its
    /// current state rather than by what was captured in the ticket.
    pub fn complete_save(&mut self, ticket: SaveTicket) -> SaveOutcome {
        let Ok(buffer) = self.get_mut(&ticket.tab_id) else {
            debug!("Save for closed tab {} dropped", ticket.tab_id);
            return SaveOutcome::Discarded;
        };
        if buffer.path != ticket.path {
            warn!(
                "Tab {} moved from '{}' to '{}' during save",
                buffer.id, ticket.path, buffer.path
            );
            return SaveOutcome::StillDirty;
        }
        if ticket.sequence > buffer.confirmed_save {
            buffer.confirmed_save = ticket.sequence;
            buffer.saved_content = ticket.content;
            buffer.last_saved_at = Some(Utc::now());
        } else {
            debug!("Out-of-order save ack for tab {} ignored", buffer.id);
        }
        if buffer.is_dirty() {
            SaveOutcome::StillDirty
        } else {
            SaveOutcome::Saved
        }
    }

    /// Remove a tab; an active tab hands selection to its left neighbour,
    /// else to the new first tab.
    pub fn remove(&mut self, id: &TabId) -> Result<Buffer> {
        let index = self
            .tabs
            .iter()
            .position(|b| &b.id == id)
            .ok_or_else(|| AppError::UnknownTab(id.clone()))?;
        let removed = self.tabs.remove(index);
        if self.active.as_ref() == Some(id) {
            let fallback = index
                .checked_sub(1)
                .and_then(|i| self.tabs.get(i))
                .or_else(|| self.tabs.first());
            self.active = fallback.map(|b| b.id.clone());
        }
        debug!("Closed tab {} ('{}')", removed.id, removed.path);
        Ok(removed)
    }

    /// Move every buffer at or below `old_path` to `new_path`, keeping
    /// content, dirty state and identity.
    pub fn rekey(&mut self, old_path: &str, new_path: &str) -> Vec<TabId> {
        let mut moved = Vec::new();
        for buffer in self
            .tabs
            .iter_mut()
            .filter(|b| is_same_or_descendant(&b.path, old_path))
        {
            buffer.path = rebase_path(&buffer.path, old_path, new_path);
            buffer.language = language_for_path(&buffer.path);
            moved.push(buffer.id.clone());
        }
        moved
    }

    /// Close every buffer at or below `path`.
    pub fn remove_under(&mut self, path: &str) -> Vec<Buffer> {
        let doomed: Vec<TabId> = self
            .tabs
            .iter()
            .filter(|b| is_same_or_descendant(&b.path, path))
            .map(|b| b.id.clone())
            .collect();
        doomed.iter().filter_map(|id| self.remove(id).ok()).collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    fn registry_with(paths: &[&str]) -> (BufferRegistry, Vec<TabId>) {
        let mut registry = BufferRegistry::new();
        let ids = paths
            .iter()
            .map(|p| registry.insert_loaded(p, format!("content of {p}")))
            .collect();
        (registry, ids)
    }

    #[test]
    fn opening_same_path_reuses_tab() {
        let (mut registry, ids) = registry_with(&["/a.ts", "/b.ts"]);
        let again = registry.insert_loaded("/a.ts", "stale fetch".into());
        assert_eq!(again, ids[0]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_id(), Some(&ids[0]));
        assert_eq!(registry.get(&ids[0]).unwrap().content, "content of /a.ts");
    }

    #[test]
    fn dirty_tracks_difference_from_baseline() {
        let (mut registry, ids) = registry_with(&["/a.ts"]);
        assert!(registry.update_content(&ids[0], "edited".into()).unwrap());
        assert!(!registry
            .update_content(&ids[0], "content of /a.ts".into())
            .unwrap());
    }

    #[test]
    fn save_with_intervening_edit_stays_dirty() {
        let (mut registry, ids) = registry_with(&["/a.ts"]);
        assert!(registry.get(&ids[0]).unwrap().summary().last_saved_at.is_none());
        registry.update_content(&ids[0], "one".into()).unwrap();
        let ticket = registry.begin_save(&ids[0]).unwrap();
        registry.update_content(&ids[0], "two".into()).unwrap();
        assert_eq!(registry.complete_save(ticket), SaveOutcome::StillDirty);
        assert!(registry.get(&ids[0]).unwrap().is_dirty());

        let ticket = registry.begin_save(&ids[0]).unwrap();
        assert_eq!(registry.complete_save(ticket), SaveOutcome::Saved);
        let summary = registry.get(&ids[0]).unwrap().summary();
        assert!(!summary.is_dirty);
        assert!(summary.last_saved_at.is_some());
    }

    #[test]
    fn out_of_order_acks_do_not_regress_baseline() {
        let (mut registry, ids) = registry_with(&["/a.ts"]);
        registry.update_content(&ids[0], "one".into()).unwrap();
        let first = registry.begin_save(&ids[0]).unwrap();
        registry.update_content(&ids[0], "two".into()).unwrap();
        let second = registry.begin_save(&ids[0]).unwrap();

        assert_eq!(registry.complete_save(second), SaveOutcome::Saved);
        assert_eq!(registry.complete_save(first), SaveOutcome::Saved);
        assert!(!registry.get(&ids[0]).unwrap().is_dirty());
    }

    #[test]
    fn save_after_close_or_rename_is_not_applied() {
        let (mut registry, ids) = registry_with(&["/a.ts", "/b.ts"]);
        let ticket = registry.begin_save(&ids[0]).unwrap();
        registry.remove(&ids[0]).unwrap();
        assert_eq!(registry.complete_save(ticket), SaveOutcome::Discarded);

        registry.update_content(&ids[1], "edit".into()).unwrap();
        let ticket = registry.begin_save(&ids[1]).unwrap();
        registry.rekey("/b.ts", "/c.ts");
        assert_eq!(registry.complete_save(ticket), SaveOutcome::StillDirty);
        assert!(registry.get(&ids[1]).unwrap().is_dirty());
    }

    #[test]
    fn closing_active_tab_prefers_left_neighbour() {
        let (mut registry, ids) = registry_with(&["/a", "/b", "/c"]);
        registry.activate(&ids[1]).unwrap();
        registry.remove(&ids[1]).unwrap();
        assert_eq!(registry.active_id(), Some(&ids[0]));

        registry.remove(&ids[0]).unwrap();
        assert_eq!(registry.active_id(), Some(&ids[2]));

        registry.remove(&ids[2]).unwrap();
        assert_eq!(registry.active_id(), None);
    }

    #[test]
    fn closing_inactive_tab_keeps_selection() {
        let (mut registry, ids) = registry_with(&["/a", "/b", "/c"]);
        registry.remove(&ids[0]).unwrap();
        assert_eq!(registry.active_id(), Some(&ids[2]));
        assert!(matches!(
            registry.remove(&ids[0]),
            Err(AppError::UnknownTab(_))
        ));
    }

    #[test]
    fn rekey_preserves_identity_and_dirty_state() {
        let (mut registry, ids) = registry_with(&["/src/a.ts", "/src/lib/b.rs", "/other.md"]);
        registry.update_content(&ids[0], "unsaved".into()).unwrap();
        let moved = registry.rekey("/src", "/pkg");
        assert_eq!(moved, vec![ids[0].clone(), ids[1].clone()]);

        let a = registry.get(&ids[0]).unwrap();
        assert_eq!(a.path, "/pkg/a.ts");
        assert_eq!(a.content, "unsaved");
        assert!(a.is_dirty());
        assert_eq!(registry.get(&ids[1]).unwrap().path, "/pkg/lib/b.rs");
        assert_eq!(registry.get(&ids[2]).unwrap().path, "/other.md");
    }

    #[test]
    fn rename_reclassifies_language() {
        let (mut registry, ids) = registry_with(&["/notes.txt"]);
        registry.rekey("/notes.txt", "/notes.rs");
        assert_eq!(registry.get(&ids[0]).unwrap().language, "rust");
    }

    #[test]
    fn remove_under_closes_subtree() {
        let (mut registry, ids) = registry_with(&["/src/a.ts", "/srcx.ts", "/src/b.ts"]);
        let closed = registry.remove_under("/src");
        assert_eq!(closed.len(), 2);
        assert_eq!(registry.active_id(), Some(&ids[1]));
    }

    #[test]
    fn randomized_edits_and_saves_keep_dirty_invariant() {
        let mut rng = rand::thread_rng();
        let (mut registry, ids) = registry_with(&["/a.ts"]);
        let id = &ids[0];
        let mut confirmed = "content of /a.ts".to_string();
        let mut pending: Vec<SaveTicket> = Vec::new();

        for _ in 0..500 {
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let text = format!("v{}", rng.gen_range(0..5));
                    registry.update_content(id, text).unwrap();
                }
                2 => pending.push(registry.begin_save(id).unwrap()),
                _ => {
                    if !pending.is_empty() {
                        // acknowledge in order
                        let ticket = pending.remove(0);
                        confirmed = ticket.content.clone();
                        registry.complete_save(ticket);
                    }
                }
            }
            let buffer = registry.get(id).unwrap();
            assert_eq!(buffer.is_dirty(), buffer.content != confirmed);
        }
    }
}
