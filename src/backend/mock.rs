//! Scripted backend for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::backend::{Backend, FileNode};
use crate::error::{AppError, Result};

#[derive(Default)]
struct MockState {
    tree: Vec<FileNode>,
    files: HashMap<String, String>,
    calls: Vec<String>,
    failures: HashMap<&'static str, VecDeque<AppError>>,
    gates: HashMap<&'static str, Arc<Notify>>,
    next_session: u64,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.state()
            .files
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn set_tree(&self, tree: Vec<FileNode>) {
        self.state().tree = tree;
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: AppError) {
        self.state().failures.entry(op).or_default().push_back(err);
    }

    /// Hold every call of `op` until the returned gate is notified once per call.
    pub fn gate(&self, op: &'static str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.state().gates.insert(op, Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    async fn enter(&self, op: &'static str, detail: String) -> Result<()> {
        let gate = {
            let mut state = self.state();
            state.calls.push(format!("{op} {detail}").trim_end().to_string());
            state.gates.get(op).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = self
            .state()
            .failures
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Backend for MockBackend {
    async fn list_tree(&self) -> Result<Vec<FileNode>> {
        self.enter("list_tree", String::new()).await?;
        Ok(self.state().tree.clone())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.enter("read_file", path.to_string()).await?;
        self.file(path)
            .ok_or_else(|| AppError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.enter("write_file", path.to_string()).await?;
        self.state()
            .files
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn create_entry(&self, path: &str, is_directory: bool) -> Result<String> {
        self.enter("create_entry", path.to_string()).await?;
        let mut state = self.state();
        if state.files.contains_key(path) {
            return Err(AppError::Conflict(path.to_string()));
        }
        if !is_directory {
            state.files.insert(path.to_string(), String::new());
        }
        Ok(path.to_string())
    }

    async fn delete_entry(&self, path: &str) -> Result<()> {
        self.enter("delete_entry", path.to_string()).await?;
        self.state()
            .files
            .retain(|p, _| !crate::utils::is_same_or_descendant(p, path));
        Ok(())
    }

    async fn rename_entry(&self, old_path: &str, new_path: &str) -> Result<String> {
        self.enter("rename_entry", format!("{old_path} {new_path}"))
            .await?;
        let mut state = self.state();
        if state.files.contains_key(new_path) {
            return Err(AppError::Conflict(new_path.to_string()));
        }
        if let Some(content) = state.files.remove(old_path) {
            state.files.insert(new_path.to_string(), content);
        }
        Ok(new_path.to_string())
    }

    async fn open_terminal(&self) -> Result<String> {
        self.enter("open_terminal", String::new()).await?;
        let mut state = self.state();
        state.next_session += 1;
        Ok(format!("mock-{}", state.next_session))
    }

    async fn close_terminal(&self, session: &str) -> Result<()> {
        self.enter("close_terminal", session.to_string()).await
    }

    async fn resize_terminal(&self, session: &str, cols: u16, rows: u16) -> Result<()> {
        self.enter("resize_terminal", format!("{session} {cols}x{rows}"))
            .await
    }

    async fn send_input(&self, session: &str, data: &[u8]) -> Result<()> {
        self.enter(
            "send_input",
            format!("{session} {}", String::from_utf8_lossy(data)),
        )
        .await
    }
}
