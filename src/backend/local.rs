//! Backend over a local directory.
//!
//! Workspace paths are slash-separated and rooted at `/`, mapped onto a root
//! directory on disk. Terminals are plain shell processes with piped stdio;
//! their output and exit are pushed onto the event channel.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{Backend, FileNode};
use crate::connection::ConnectionState;
use crate::error::{AppError, Result};
use crate::events::BackendEvent;

const BINARY_DETECTION_BYTES: usize = 2048;
const READ_CHUNK: usize = 8192;
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target"];

struct LocalTerminal {
    stdin: ChildStdin,
    cancel: CancellationToken,
    size: Option<(u16, u16)>,
}

pub struct LocalBackend {
    root: PathBuf,
    shell: String,
    events: mpsc::Sender<BackendEvent>,
    terminals: Arc<Mutex<HashMap<String, LocalTerminal>>>,
    next_session: AtomicU64,
}

impl LocalBackend {
    pub fn new(root: impl AsRef<Path>, events: mpsc::Sender<BackendEvent>) -> Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(AppError::ValidationError(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
        Ok(Self {
            root,
            shell,
            events,
            terminals: Arc::new(Mutex::new(HashMap::new())),
            next_session: AtomicU64::new(1),
        })
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A local directory is usable as soon as it exists.
    pub async fn announce_connected(&self) -> Result<()> {
        self.events
            .send(BackendEvent::Connection(ConnectionState::Connected))
            .await
            .map_err(|_| AppError::Fatal("event channel closed".to_string()))
    }

    /// Map a workspace path onto disk, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::ValidationError(format!("invalid workspace path '{path}'")));
        }
        Ok(self.root.join(relative))
    }
}

fn io_to_app(err: std::io::Error, path: &str) -> AppError {
    match err.kind() {
        ErrorKind::NotFound => AppError::NotFound(path.to_string()),
        ErrorKind::PermissionDenied => AppError::Unreadable(path.to_string()),
        ErrorKind::AlreadyExists => AppError::Conflict(path.to_string()),
        _ => AppError::Transient(format!("{path}: {err}")),
    }
}

fn join_workspace(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

fn is_binary(content: &[u8]) -> bool {
    let head = &content[..content.len().min(BINARY_DETECTION_BYTES)];
    content_inspector::inspect(head).is_binary()
}

fn spawn_reader<R>(
    mut reader: R,
    session: String,
    events: mpsc::Sender<BackendEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Terminal '{}' read failed: {}", session, e);
                        break;
                    }
                },
            };
            let event = BackendEvent::TerminalOutput {
                session: session.clone(),
                data: Bytes::copy_from_slice(&buf[..n]),
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
    })
}

impl Backend for LocalBackend {
    async fn list_tree(&self) -> Result<Vec<FileNode>> {
        // BFS over the disk, then assemble the nested listing bottom-up
        let mut listing: HashMap<String, Vec<(String, bool)>> = HashMap::new();
        let mut queue: VecDeque<String> = VecDeque::from([String::new()]);

        while let Some(dir) = queue.pop_front() {
            let disk_dir = self.resolve(&dir)?;
            let mut read_dir = tokio::fs::read_dir(&disk_dir)
                .await
                .map_err(|e| io_to_app(e, &dir))?;
            let mut entries = Vec::new();
            while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_to_app(e, &dir))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = join_workspace(&dir, &name);
                let file_type = entry.file_type().await.map_err(|e| io_to_app(e, &path))?;
                if file_type.is_dir() {
                    if IGNORED_DIRS.contains(&name.as_str()) {
                        continue;
                    }
                    queue.push_back(path.clone());
                    entries.push((path, true));
                } else if file_type.is_file() {
                    entries.push((path, false));
                } else if file_type.is_symlink() {
                    // linked directories are not followed
                    if let Ok(meta) = tokio::fs::metadata(entry.path()).await
                        && meta.is_file()
                    {
                        entries.push((path, false));
                    }
                }
            }
            listing.insert(dir, entries);
        }

        fn assemble(dir: &str, listing: &mut HashMap<String, Vec<(String, bool)>>) -> Vec<FileNode> {
            let mut entries = listing.remove(dir).unwrap_or_default();
            entries.sort_by(|(a, a_dir), (b, b_dir)| b_dir.cmp(a_dir).then_with(|| a.cmp(b)));
            entries
                .into_iter()
                .map(|(path, is_dir)| {
                    if is_dir {
                        let children = assemble(&path, listing);
                        FileNode::directory(path, children)
                    } else {
                        FileNode::file(path)
                    }
                })
                .collect()
        }

        let tree = assemble("", &mut listing);
        debug!("Listed workspace under {}", self.root.display());
        Ok(tree)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let disk = self.resolve(path)?;
        let meta = tokio::fs::metadata(&disk)
            .await
            .map_err(|e| io_to_app(e, path))?;
        if meta.is_dir() {
            return Err(AppError::Unreadable(path.to_string()));
        }
        let bytes = tokio::fs::read(&disk).await.map_err(|e| io_to_app(e, path))?;
        if is_binary(&bytes) {
            return Err(AppError::Unreadable(path.to_string()));
        }
        String::from_utf8(bytes).map_err(|_| AppError::Unreadable(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let disk = self.resolve(path)?;
        tokio::fs::write(&disk, content).await.map_err(|e| {
            error!("Write to '{}' failed: {}", path, e);
            AppError::Transient(format!("{path}: {e}"))
        })
    }

    async fn create_entry(&self, path: &str, is_directory: bool) -> Result<String> {
        let disk = self.resolve(path)?;
        if is_directory {
            tokio::fs::create_dir(&disk)
                .await
                .map_err(|e| io_to_app(e, path))?;
        } else {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&disk)
                .await
                .map_err(|e| io_to_app(e, path))?;
        }
        Ok(path.to_string())
    }

    async fn delete_entry(&self, path: &str) -> Result<()> {
        let disk = self.resolve(path)?;
        let meta = tokio::fs::symlink_metadata(&disk)
            .await
            .map_err(|e| io_to_app(e, path))?;
        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(&disk).await
        } else {
            tokio::fs::remove_file(&disk).await
        };
        removed.map_err(|e| io_to_app(e, path))
    }

    async fn rename_entry(&self, old_path: &str, new_path: &str) -> Result<String> {
        let from = self.resolve(old_path)?;
        let to = self.resolve(new_path)?;
        if tokio::fs::symlink_metadata(&to).await.is_ok() {
            return Err(AppError::Conflict(new_path.to_string()));
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| io_to_app(e, old_path))?;
        Ok(new_path.to_string())
    }

    async fn open_terminal(&self) -> Result<String> {
        let session = format!("local-{}", self.next_session.fetch_add(1, Ordering::Relaxed));
        let mut child = Command::new(&self.shell)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Fatal(format!("failed to spawn '{}': {e}", self.shell)))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(AppError::Fatal("shell stdio was not piped".to_string()));
        };

        let cancel = CancellationToken::new();
        let out = spawn_reader(stdout, session.clone(), self.events.clone(), cancel.clone());
        let err = spawn_reader(stderr, session.clone(), self.events.clone(), cancel.clone());

        self.terminals.lock().await.insert(
            session.clone(),
            LocalTerminal {
                stdin,
                cancel: cancel.clone(),
                size: None,
            },
        );

        let events = self.events.clone();
        let terminals = Arc::clone(&self.terminals);
        let waiter_session = session.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel.cancelled() => None,
            };
            let Some(status) = status else {
                if let Err(e) = child.kill().await {
                    debug!("Killing terminal '{}' failed: {}", waiter_session, e);
                }
                return;
            };
            let _ = out.await;
            let _ = err.await;
            info!("Terminal '{}' exited: {:?}", waiter_session, status);
            terminals.lock().await.remove(&waiter_session);
            let event = match status {
                Ok(_) => BackendEvent::TerminalExited {
                    session: waiter_session,
                },
                Err(e) => BackendEvent::TerminalFatal {
                    session: waiter_session,
                    message: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        });

        info!("Terminal '{}' started with {}", session, self.shell);
        Ok(session)
    }

    async fn close_terminal(&self, session: &str) -> Result<()> {
        match self.terminals.lock().await.remove(session) {
            Some(terminal) => {
                terminal.cancel.cancel();
                Ok(())
            }
            // already exited on its own
            None => Ok(()),
        }
    }

    async fn resize_terminal(&self, session: &str, cols: u16, rows: u16) -> Result<()> {
        let mut terminals = self.terminals.lock().await;
        let terminal = terminals
            .get_mut(session)
            .ok_or_else(|| AppError::NotFound(session.to_string()))?;
        // piped shells have no window size; remember it for inspection
        terminal.size = Some((cols, rows));
        debug!("Terminal '{}' resized to {}x{}", session, cols, rows);
        Ok(())
    }

    async fn send_input(&self, session: &str, data: &[u8]) -> Result<()> {
        let mut terminals = self.terminals.lock().await;
        let terminal = terminals
            .get_mut(session)
            .ok_or_else(|| AppError::NotFound(session.to_string()))?;
        terminal
            .stdin
            .write_all(data)
            .await
            .map_err(|e| AppError::Transient(format!("write to '{session}' failed: {e}")))?;
        terminal
            .stdin
            .flush()
            .await
            .map_err(|e| AppError::Transient(format!("flush to '{session}' failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn workspace() -> (tempfile::TempDir, LocalBackend, mpsc::Receiver<BackendEvent>) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "let a = 1;").unwrap();
        fs::write(dir.path().join("src/lib/b.ts"), "export {}").unwrap();
        fs::write(dir.path().join("README.md"), "# readme").unwrap();
        let (tx, rx) = mpsc::channel(64);
        let backend = LocalBackend::new(dir.path(), tx).unwrap().with_shell("sh");
        (dir, backend, rx)
    }

    #[tokio::test]
    async fn lists_nested_tree_directories_first() {
        let (_dir, backend, _rx) = workspace();
        let tree = backend.list_tree().await.unwrap();
        assert_eq!(
            tree,
            vec![
                FileNode::directory(
                    "/src",
                    vec![
                        FileNode::directory("/src/lib", vec![FileNode::file("/src/lib/b.ts")]),
                        FileNode::file("/src/a.ts"),
                    ]
                ),
                FileNode::file("/README.md"),
            ]
        );
    }

    #[tokio::test]
    async fn read_maps_missing_and_binary_files() {
        let (dir, backend, _rx) = workspace();
        assert_eq!(backend.read_file("/src/a.ts").await.unwrap(), "let a = 1;");
        assert!(matches!(
            backend.read_file("/nope.ts").await,
            Err(AppError::NotFound(_))
        ));
        fs::write(dir.path().join("blob.bin"), [0u8, 159, 146, 150, 0, 1]).unwrap();
        assert!(matches!(
            backend.read_file("/blob.bin").await,
            Err(AppError::Unreadable(_))
        ));
        assert!(matches!(
            backend.read_file("/src").await,
            Err(AppError::Unreadable(_))
        ));
    }

    #[tokio::test]
    async fn refuses_paths_outside_root() {
        let (_dir, backend, _rx) = workspace();
        assert!(matches!(
            backend.read_file("/../etc/passwd").await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn create_rename_delete_with_conflicts() {
        let (dir, backend, _rx) = workspace();
        assert_eq!(
            backend.create_entry("/src/c.ts", false).await.unwrap(),
            "/src/c.ts"
        );
        assert!(matches!(
            backend.create_entry("/src/c.ts", false).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            backend.rename_entry("/src/c.ts", "/src/a.ts").await,
            Err(AppError::Conflict(_))
        ));
        backend.rename_entry("/src/c.ts", "/src/d.ts").await.unwrap();
        backend.write_file("/src/d.ts", "saved").await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("src/d.ts")).unwrap(),
            "saved"
        );
        backend.delete_entry("/src").await.unwrap();
        assert!(!dir.path().join("src").exists());
        assert!(matches!(
            backend.delete_entry("/src").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminal_echoes_and_exits() {
        let (_dir, backend, mut rx) = workspace();
        let session = backend.open_terminal().await.unwrap();
        backend.resize_terminal(&session, 80, 24).await.unwrap();
        backend.send_input(&session, b"echo hello\nexit\n").await.unwrap();

        let mut output = Vec::new();
        let exited = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                match event {
                    BackendEvent::TerminalOutput { data, .. } => output.extend_from_slice(&data),
                    BackendEvent::TerminalExited { session: s } => return s,
                    _ => {}
                }
            }
            String::new()
        })
        .await
        .unwrap();

        assert_eq!(exited, session);
        assert!(String::from_utf8_lossy(&output).contains("hello"));
        assert!(matches!(
            backend.send_input(&session, b"x").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn closing_terminal_is_idempotent() {
        let (_dir, backend, _rx) = workspace();
        let session = backend.open_terminal().await.unwrap();
        backend.close_terminal(&session).await.unwrap();
        backend.close_terminal(&session).await.unwrap();
    }
}
