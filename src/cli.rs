//! CLI front end (SPEC_FULL.md §4.11): one `clap::Parser` dispatching the
//! modes of spec.md §6 into the transport/permissions/persistence/render
//! modules, then handing the TUI a polling loop for `-H`/`-C`.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use crate::document::Document;
use crate::export;
use crate::history::HistoryFrame;
use crate::permissions::PermissionTable;
use crate::persistence;
use crate::render::ReplayView;
use crate::transport::{client::ClientSession, host::HostSession, DEFAULT_PORT};
use crate::tui;

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "A collaborative, terminal-based text editor")]
pub struct Cli {
    #[command(subcommand)]
    pub mode: Mode,

    /// Verbose debug logging (spec.md §6 `-D`).
    #[arg(short = 'D', long = "debug", global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    #[command(name = "-H", about = "host an editing session on FILE as USER")]
    Host { file: PathBuf, user: String },

    #[command(name = "-C", about = "connect to a host at IP as USER")]
    Connect { ip: String, user: String },

    #[command(name = "-P", about = "grant or revoke permissions: USER +rw|+r|-rw|-r")]
    Permission { user: String, rights: String },

    #[command(name = "-Pl", about = "list the permission table")]
    ListPermissions,

    #[command(name = "-CHH", about = "list saved history indices for FILE")]
    ListHistory { file: PathBuf },

    #[command(name = "-CH", about = "open a read-only view replaying history index IDX")]
    ReplayHistory { file: PathBuf, idx: String },

    #[command(name = "-B", about = "open a read-only blame view for history index IDX")]
    Blame { file: PathBuf, idx: String },
}

/// Resolves `$PARLEY_HOME`, falling back to the platform data directory,
/// the way `core-config::load_from` resolves its search path.
pub fn resolve_basedir() -> PathBuf {
    if let Ok(home) = std::env::var("PARLEY_HOME") {
        return PathBuf::from(home);
    }
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("parley")
}

/// Initializes the global `tracing` subscriber once, writing to
/// `<basedir>/parley.log` through a non-blocking appender. The returned
/// guard must be held for the process lifetime or buffered events are lost
/// on exit, mirroring `oxidized::ox_bin::AppStartup::configure_logging`.
pub fn init_logging(basedir: &Path, debug: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(basedir)?;
    let file_appender = tracing_appender::rolling::never(basedir, "parley.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).try_init();
    Ok(guard)
}

fn session_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H-%M-%S").to_string()
}

pub async fn run(cli: Cli) -> Result<()> {
    let basedir = resolve_basedir();
    let _log_guard = init_logging(&basedir, cli.debug)?;

    match cli.mode {
        Mode::Host { file, user } => run_host(file, user, basedir).await,
        Mode::Connect { ip, user } => run_connect(ip, user).await,
        Mode::Permission { user, rights } => run_permission(&basedir, &user, &rights),
        Mode::ListPermissions => run_list_permissions(&basedir),
        Mode::ListHistory { file } => run_list_history(&basedir, &file),
        Mode::ReplayHistory { file, idx } => run_replay_history(&basedir, &file, &idx),
        Mode::Blame { file, idx } => run_blame(&basedir, &file, &idx),
    }
}

async fn run_host(file: PathBuf, user: String, basedir: PathBuf) -> Result<()> {
    let stamp = session_stamp();
    let session = HostSession::start(file.clone(), user.clone(), DEFAULT_PORT, basedir, stamp)
        .await
        .with_context(|| format!("failed to host {}", file.display()))?;

    let guard = tui::TerminalGuard::enter()?;
    let run_result = tui::run_loop(&session.engine, &user, false, |action| {
        let session = &session;
        async move {
            match action {
                tui::Action::Motion(dir, shift) => {
                    session.apply_local_motion(dir, shift).await;
                    true
                }
                tui::Action::Edit(kind) => {
                    session.apply_local_edit(kind).await;
                    true
                }
                tui::Action::Undo => {
                    session.apply_local_undo().await;
                    true
                }
                tui::Action::Redo => {
                    session.apply_local_redo().await;
                    true
                }
                tui::Action::Quit => false,
            }
        }
    })
    .await;
    drop(guard);

    session.finish().await?;
    run_result
}

async fn run_connect(ip: String, user: String) -> Result<()> {
    let addr: SocketAddr = if ip.contains(':') {
        ip.parse().with_context(|| format!("invalid address {ip}"))?
    } else {
        let ip: IpAddr = ip.parse().with_context(|| format!("invalid address {ip}"))?;
        SocketAddr::new(ip, DEFAULT_PORT)
    };

    let session = ClientSession::connect(addr, user.clone()).await?;
    let read_only = session.read_only;

    let guard = tui::TerminalGuard::enter()?;
    let run_result = tui::run_loop(&session.engine, &user, read_only, |action| {
        let session = &session;
        async move {
            match action {
                tui::Action::Motion(dir, shift) => {
                    if shift {
                        session.send_shifted_motion(dir).await;
                    } else {
                        session.send_motion(dir).await;
                    }
                    true
                }
                tui::Action::Edit(kind) => {
                    session.send_edit(kind).await;
                    true
                }
                tui::Action::Undo => {
                    session.send_undo().await;
                    true
                }
                tui::Action::Redo => {
                    session.send_redo().await;
                    true
                }
                tui::Action::Quit => false,
            }
        }
    })
    .await;
    drop(guard);

    session.disconnect();
    run_result
}

fn run_permission(basedir: &Path, user: &str, rights: &str) -> Result<()> {
    let perm_path = basedir.join("permissions");
    let mut table = PermissionTable::load(&perm_path)?;
    table.manage(user, rights)?;
    table.save(&perm_path)?;
    println!("{user} {rights}");
    Ok(())
}

fn run_list_permissions(basedir: &Path) -> Result<()> {
    let perm_path = basedir.join("permissions");
    let table = PermissionTable::load(&perm_path)?;
    for (user, rights) in table.list() {
        println!("{user}:{}", if rights.can_write() { "rw" } else { "r" });
    }
    Ok(())
}

fn run_list_history(basedir: &Path, file: &Path) -> Result<()> {
    for stamp in persistence::list_sessions(basedir, file)? {
        println!("{stamp}");
    }
    Ok(())
}

/// Replays history index `idx`: re-inserts every cut frame's text back
/// into the final saved document, walking frames newest-to-oldest, so the
/// view shows previously-deleted text inline rather than the bare final
/// snapshot (mirrors `HistoryHandler.show_changes` in the source editor).
fn run_replay_history(basedir: &Path, file: &Path, idx: &str) -> Result<()> {
    let final_text = persistence::read_document(basedir, file, idx)
        .with_context(|| format!("no saved session '{idx}' for {}", file.display()))?;
    let frames = persistence::read_log(basedir, file, idx).unwrap_or_default();
    let blame = persistence::read_blame(basedir, file, idx, &final_text, "unknown");

    let view = build_replay_view(&final_text, frames, blame);
    for line in &view.lines {
        println!("{line}");
    }
    Ok(())
}

/// Folds every cut frame's text back into `final_text`, newest frame
/// first, reconstructing the merged view `-CH` shows. Kept separate from
/// [`run_replay_history`] so the fold itself is unit-testable without
/// capturing stdout.
fn build_replay_view(final_text: &str, frames: Vec<HistoryFrame>, blame: Vec<String>) -> ReplayView {
    let mut doc = Document::from_text(final_text);
    for frame in frames.iter().rev() {
        if let HistoryFrame::Cut { top, text, .. } = frame {
            doc.insert(text, *top);
        }
    }
    ReplayView { lines: doc.lines().to_vec(), frames, blame }
}

fn run_blame(basedir: &Path, file: &Path, idx: &str) -> Result<()> {
    let document = persistence::read_document(basedir, file, idx)
        .with_context(|| format!("no saved session '{idx}' for {}", file.display()))?;
    // `owner` only backstops a missing `.blame.cache`; a normally-completed
    // session always writes one, so this fallback rarely triggers.
    let blame = persistence::read_blame(basedir, file, idx, &document, "unknown");
    for (line, author) in document.split('\n').zip(blame.iter()) {
        println!("{author:>12} | {line}");
    }
    Ok(())
}

/// Exports a saved session's text to `path`, choosing the filter by
/// extension (SPEC_FULL.md §4.10). Exposed for use by a future export
/// subcommand; not wired into [`Mode`] since spec.md §6 does not name one.
#[allow(dead_code)]
fn export_document(lines: &[String], path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => std::fs::write(path, export::to_html(lines))?,
        Some("rtf") => std::fs::write(path, export::to_rtf(lines))?,
        Some("pdf") => std::fs::write(path, export::to_pdf(lines))?,
        _ => anyhow::bail!("unsupported export extension for {}", path.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    #[test]
    fn replay_reinserts_a_cut_frames_text_at_its_recorded_position() {
        let frames = vec![HistoryFrame::Cut {
            top: Position::new(0, 0),
            bot: Position::new(3, 0),
            text: "cat".to_string(),
            author: "alice".to_string(),
        }];
        let view = build_replay_view("dog", frames, vec!["alice".to_string()]);
        assert_eq!(view.lines, vec!["catdog".to_string()]);
    }

    #[test]
    fn replay_folds_newer_cuts_before_older_ones() {
        // "ABCDEFG" -> A cuts 'F' at col 5 -> "ABCDEG" -> B cuts 'A' at col 0
        // -> "BCDEG" (the saved snapshot). Folding must undo B before A: B's
        // recorded column assumes A's cut already happened, so folding A
        // first would insert 'F' at a column that no longer means the same
        // thing once B's removed 'A' is back in the line.
        let frames = vec![
            HistoryFrame::Cut {
                top: Position::new(5, 0),
                bot: Position::new(6, 0),
                text: "F".to_string(),
                author: "alice".to_string(),
            },
            HistoryFrame::Cut {
                top: Position::new(0, 0),
                bot: Position::new(1, 0),
                text: "A".to_string(),
                author: "bob".to_string(),
            },
        ];
        let view = build_replay_view("BCDEG", frames, vec!["alice".to_string()]);
        assert_eq!(view.lines, vec!["ABCDEFG".to_string()]);
    }

    #[test]
    fn replay_with_no_cut_frames_is_just_the_saved_snapshot() {
        let frames = vec![HistoryFrame::Insert {
            top: Position::new(0, 0),
            bot: Position::new(3, 0),
            author: "alice".to_string(),
        }];
        let view = build_replay_view("dog", frames, vec!["alice".to_string()]);
        assert_eq!(view.lines, vec!["dog".to_string()]);
    }
}
