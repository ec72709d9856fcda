use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ide_session::{
    CloseOutcome, Coordinator, FileNode, LocalBackend, SettingsManager, SurfaceGeometry,
    SurfaceId, init_tracing,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SURFACE: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "ide-session", version, about = "Drive an editor session over a local workspace")]
struct Args {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Config file, defaults to the user config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Where ide-session.log is written
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

type Session = Coordinator<LocalBackend>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_dir = args.log_dir.clone().unwrap_or_else(std::env::temp_dir);
    init_tracing(&args.log_level, &log_dir)?;

    let manager = match &args.config {
        Some(path) => SettingsManager::with_path(path)?,
        None => SettingsManager::new()?,
    };
    info!("Settings loaded from {}", manager.path().display());

    let (tx, mut rx) = mpsc::channel(256);
    let backend = LocalBackend::new(&args.root, tx)
        .with_context(|| format!("open workspace {}", args.root.display()))?;
    println!("workspace: {}", backend.root().display());
    backend.announce_connected().await?;

    let session = Coordinator::new(backend, manager.settings().clone());
    let cancel = CancellationToken::new();

    let intake = session.run(&mut rx, cancel.clone());
    let repl = async {
        let result = repl(&session).await;
        cancel.cancel();
        result
    };
    let ((), result) = tokio::join!(intake, repl);

    for (id, outcome) in session.shutdown().await {
        if let Err(e) = outcome {
            warn!("Closing {} on exit failed: {}", id, e);
        }
    }
    result
}

async fn repl(session: &Session) -> Result<()> {
    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        flush_output(session);
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match execute(session, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e}"),
        }
    }
    Ok(())
}

/// Print pending terminal output and notices.
fn flush_output(session: &Session) {
    if let Some(bytes) = session.drain_output(&SurfaceId::from(SURFACE)) {
        print!("{}", String::from_utf8_lossy(&bytes));
    }
    for notice in session.take_notices() {
        println!("[{}] {:?}: {}", notice.at.format("%H:%M:%S"), notice.kind, notice.message);
    }
}

fn workspace_path(arg: &str) -> String {
    format!("/{}", arg.trim_start_matches('/'))
}

fn arg<'a>(args: &[&'a str], index: usize, usage: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(*value),
        None => bail!("usage: {usage}"),
    }
}

/// Run one command. Returns `false` to quit.
async fn execute(session: &Session, line: &str) -> Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let args: Vec<&str> = rest.split_whitespace().collect();

    match command {
        "help" => print_help(),
        "quit" | "exit" => return Ok(false),
        "tree" => {
            let snapshot = session.snapshot();
            if snapshot.loading {
                println!("(loading)");
            }
            print_tree(&snapshot.tree, &snapshot.expanded, 0);
        }
        "toggle" => {
            let path = workspace_path(arg(&args, 0, "toggle <dir>")?);
            let expanded = session.toggle_folder(&path);
            println!("{} {}", if expanded { "expanded" } else { "collapsed" }, path);
        }
        "refresh" => session.refresh().await?,
        "open" => {
            let path = workspace_path(arg(&args, 0, "open <file>")?);
            let id = session.open_file(&path).await?;
            println!("opened {path} as {id}");
        }
        "tabs" => {
            let snapshot = session.snapshot();
            for (index, tab) in snapshot.tabs.iter().enumerate() {
                let active = snapshot.active_tab.as_ref() == Some(&tab.id);
                let saved = tab
                    .last_saved_at
                    .map(|at| format!(" saved {}", at.format("%H:%M:%S")))
                    .unwrap_or_default();
                println!(
                    "{}{} {} [{}]{}{}",
                    if active { '>' } else { ' ' },
                    index,
                    tab.path,
                    tab.language,
                    if tab.is_dirty { " *" } else { "" },
                    saved
                );
            }
        }
        "select" => {
            let index: usize = arg(&args, 0, "select <index>")?.parse()?;
            let snapshot = session.snapshot();
            let Some(tab) = snapshot.tabs.get(index) else {
                bail!("no tab {index}");
            };
            session.select_tab(&tab.id)?;
        }
        "cat" => match session.snapshot().active_content {
            Some(content) => println!("{content}"),
            None => println!("no active tab"),
        },
        "edit" => {
            let Some(id) = session.snapshot().active_tab else {
                bail!("no active tab");
            };
            let dirty = session.update_content(&id, rest.replace("\\n", "\n"))?;
            println!("{}", if dirty { "modified" } else { "unchanged" });
        }
        "save" => {
            let Some(id) = session.snapshot().active_tab else {
                bail!("no active tab");
            };
            let outcome = session.save_tab(&id).await?;
            println!("{outcome:?}");
        }
        "close" => {
            let Some(id) = session.snapshot().active_tab else {
                bail!("no active tab");
            };
            let force = args.first() == Some(&"force");
            match session.close_tab(&id, |_| force)? {
                CloseOutcome::Closed => println!("closed"),
                CloseOutcome::Kept => println!("unsaved changes; use `close force`"),
            }
        }
        "mkdir" | "touch" => {
            let path = workspace_path(arg(&args, 0, "mkdir|touch <path>")?);
            let created = session.create_entry(&path, command == "mkdir").await?;
            println!("created {created}");
        }
        "mv" => {
            let old = workspace_path(arg(&args, 0, "mv <old> <new>")?);
            let new = workspace_path(arg(&args, 1, "mv <old> <new>")?);
            let renamed = session.rename_file(&old, &new).await?;
            println!("renamed to {renamed}");
        }
        "rm" => {
            let path = workspace_path(arg(&args, 0, "rm <path>")?);
            session.delete_file(&path).await?;
            println!("deleted {path}");
        }
        "diag" => {
            for d in session.snapshot().diagnostics {
                println!(
                    "{}:{} {:?} {}",
                    d.range.start.line + 1,
                    d.range.start.character + 1,
                    d.severity,
                    d.message
                );
            }
        }
        "term" => {
            let id = session.create_terminal().await?;
            let surface = SurfaceId::from(SURFACE);
            session.detach_surface(&surface);
            session.attach_surface(surface, id)?;
            session
                .resize_terminal(id, SurfaceGeometry::new(120 * 9, 30 * 20))
                .await?;
            println!("{id} attached");
        }
        "terms" => {
            let snapshot = session.snapshot();
            for t in snapshot.terminals {
                let selected = snapshot.selected_terminal == Some(t.id);
                println!(
                    "{}{} {:?} {}",
                    if selected { '>' } else { ' ' },
                    t.id,
                    t.state,
                    t.size.map(|s| format!("{}x{}", s.cols, s.rows)).unwrap_or_default()
                );
            }
        }
        "attach" => {
            let raw: u64 = arg(&args, 0, "attach <n>")?.parse()?;
            let id = raw.into();
            let surface = SurfaceId::from(SURFACE);
            session.detach_surface(&surface);
            session.attach_surface(surface, id)?;
            session.select_terminal(id)?;
        }
        "input" => {
            let Some(id) = session.snapshot().selected_terminal else {
                bail!("no terminal");
            };
            session.send_input(id, format!("{rest}\n").as_bytes()).await?;
            // give the shell a moment before the next prompt flushes output
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        "resize" => {
            let Some(id) = session.snapshot().selected_terminal else {
                bail!("no terminal");
            };
            let width: u32 = arg(&args, 0, "resize <width_px> <height_px>")?.parse()?;
            let height: u32 = arg(&args, 1, "resize <width_px> <height_px>")?.parse()?;
            let sent = session
                .resize_terminal(id, SurfaceGeometry::new(width, height))
                .await?;
            println!("{}", if sent { "resized" } else { "grid unchanged" });
        }
        "kill" => {
            let Some(id) = session.snapshot().selected_terminal else {
                bail!("no terminal");
            };
            session.close_terminal(id).await?;
        }
        other => println!("unknown command '{other}', try `help`"),
    }
    Ok(true)
}

fn print_tree(nodes: &[FileNode], expanded: &[String], depth: usize) {
    for node in nodes {
        let open = node.is_directory && expanded.contains(&node.path);
        let marker = match (node.is_directory, open) {
            (true, true) => "v ",
            (true, false) => "> ",
            _ => "  ",
        };
        println!("{}{}{}", "  ".repeat(depth), marker, node.name);
        if open && let Some(children) = &node.children {
            print_tree(children, expanded, depth + 1);
        }
    }
}

fn print_help() {
    println!(
        "commands:
  tree | toggle <dir> | refresh
  open <file> | tabs | select <n> | cat | edit <text> | save | close [force]
  mkdir <dir> | touch <file> | mv <old> <new> | rm <path> | diag
  term | terms | attach <n> | input <line> | resize <w_px> <h_px> | kill
  help | quit"
    );
}
