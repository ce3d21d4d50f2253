//! Host side of a session: accepts peers, authenticates them against the
//! permission table, and fans out every applied edit through one
//! broadcast task (spec.md §4.7).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::engine::Engine;
use crate::participant::EditKind;
use crate::permissions::{PermissionTable, Rights};
use crate::persistence;
use crate::protocol::{self, Message};

use super::{read_frames, write_frames};

type PeerTx = mpsc::UnboundedSender<Vec<u8>>;
type BroadcastTx = mpsc::UnboundedSender<(Message, Option<String>)>;

#[derive(Default)]
struct Peers {
    by_user: HashMap<String, PeerTx>,
}

/// A running hosting session. Dropping this without calling [`Self::finish`]
/// leaves the accept loop running; callers should always call `finish` on
/// shutdown to persist history.
pub struct HostSession {
    pub engine: Arc<Engine>,
    pub owner: String,
    pub bound_addr: SocketAddr,
    file_path: PathBuf,
    basedir: PathBuf,
    session_stamp: String,
    accept_task: tokio::task::JoinHandle<()>,
    broadcast_task: tokio::task::JoinHandle<()>,
    broadcast_tx: BroadcastTx,
}

impl HostSession {
    pub async fn start(
        file_path: PathBuf,
        username: String,
        port: u16,
        basedir: PathBuf,
        session_stamp: String,
    ) -> anyhow::Result<Self> {
        let initial_text = std::fs::read_to_string(&file_path).unwrap_or_default();
        let engine = Arc::new(Engine::new(username.clone(), &initial_text));

        let perm_path = basedir.join("permissions");
        let permissions = Arc::new(Mutex::new(PermissionTable::load(&perm_path)?));

        let peers = Arc::new(Mutex::new(Peers::default()));
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let broadcast_task = tokio::spawn(broadcast_loop(peers.clone(), broadcast_rx));

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let bound_addr = listener.local_addr()?;
        tracing::info!(port = bound_addr.port(), file = %file_path.display(), "hosting session");

        let accept_engine = engine.clone();
        let accept_task = tokio::spawn(accept_loop(listener, accept_engine, permissions, peers, username.clone(), broadcast_tx.clone()));

        Ok(HostSession { engine, owner: username, bound_addr, file_path, basedir, session_stamp, accept_task, broadcast_task, broadcast_tx })
    }

    /// Applies a motion made by the host's own local user and fans it out
    /// to every connected peer. The host never loops its own edits back to
    /// itself, so there is no `should_apply` filtering to do here.
    pub async fn apply_local_motion(&self, dir: crate::participant::Direction, shift: bool) {
        self.engine.apply_motion(&self.owner, dir, shift).await;
        let msg = if shift {
            Message::ShiftedMotion { user: self.owner.clone(), dir }
        } else {
            Message::Motion { user: self.owner.clone(), dir }
        };
        let _ = self.broadcast_tx.send((msg, None));
    }

    pub async fn apply_local_edit(&self, kind: EditKind) {
        self.engine.apply_edit(&self.owner, kind.clone()).await;
        let msg = match kind {
            EditKind::WriteChar(c) => Message::WriteChar { user: self.owner.clone(), c },
            EditKind::Newline => Message::Newline { user: self.owner.clone() },
            EditKind::Backspace => Message::Backspace { user: self.owner.clone() },
            EditKind::Paste(text) => Message::Paste { user: self.owner.clone(), text },
            EditKind::Cut => Message::Cut { user: self.owner.clone() },
        };
        let _ = self.broadcast_tx.send((msg, None));
    }

    pub async fn apply_local_undo(&self) {
        self.engine.undo(&self.owner).await;
        let _ = self.broadcast_tx.send((Message::Undo { user: self.owner.clone() }, None));
    }

    pub async fn apply_local_redo(&self) {
        self.engine.redo(&self.owner).await;
        let _ = self.broadcast_tx.send((Message::Redo { user: self.owner.clone() }, None));
    }

    /// Stops accepting new peers and persists the reconciled history.
    pub async fn finish(self) -> anyhow::Result<()> {
        self.accept_task.abort();
        self.broadcast_task.abort();
        let (final_text, frames, blame) = self.engine.finish_session().await;
        persistence::write_session(&self.basedir, &self.file_path, &self.session_stamp, &final_text, &frames, &blame)?;
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Arc<Engine>,
    permissions: Arc<Mutex<PermissionTable>>,
    peers: Arc<Mutex<Peers>>,
    owner: String,
    broadcast_tx: BroadcastTx,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let engine = engine.clone();
        let permissions = permissions.clone();
        let peers = peers.clone();
        let owner = owner.clone();
        let broadcast_tx = broadcast_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_peer(stream, addr, engine, permissions, peers, owner, broadcast_tx).await {
                tracing::debug!(%addr, error = %e, "peer session ended");
            }
        });
    }
}

async fn broadcast_loop(peers: Arc<Mutex<Peers>>, mut rx: mpsc::UnboundedReceiver<(Message, Option<String>)>) {
    while let Some((msg, except)) = rx.recv().await {
        let bytes = protocol::encode(&msg);
        let mut dead = Vec::new();
        {
            let guard = peers.lock().await;
            for (user, tx) in &guard.by_user {
                if Some(user.as_str()) == except.as_deref() {
                    continue;
                }
                if tx.send(bytes.clone()).is_err() {
                    dead.push(user.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut guard = peers.lock().await;
            for user in dead {
                guard.by_user.remove(&user);
            }
        }
    }
}

async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<Engine>,
    permissions: Arc<Mutex<PermissionTable>>,
    peers: Arc<Mutex<Peers>>,
    owner: String,
    broadcast_tx: BroadcastTx,
) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(read_frames(read_half, line_tx));

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(write_frames(write_half, out_rx));

    let hello = line_rx.recv().await.ok_or_else(|| anyhow::anyhow!("peer {addr} disconnected before hello"))?;
    let username = match protocol::decode(&hello)? {
        Message::Connect { user } => user,
        other => anyhow::bail!("expected connect handshake from {addr}, got {other:?}"),
    };

    let rights = permissions.lock().await.get(&username);
    let read_only = match rights {
        None => {
            tracing::info!(%username, "rejected: no permission entry");
            let _ = out_tx.send(protocol::encode(&Message::HostDisconnect { user: username.clone() }));
            return Ok(());
        }
        Some(Rights::ReadWrite) => false,
        Some(Rights::Read) => true,
    };
    if read_only {
        let _ = out_tx.send(protocol::encode(&Message::ReadOnlyNotice { user: username.clone() }));
    }

    engine.add_participant(&username, read_only).await;
    {
        let mut guard = peers.lock().await;
        guard.by_user.insert(username.clone(), out_tx.clone());
    }

    let snapshot = engine.snapshot().await;
    let mut ordered = Vec::new();
    if let Some((caret, _)) = snapshot.carets.get(&owner) {
        ordered.push((owner.clone(), *caret));
    }
    let mut rest: Vec<_> = snapshot
        .carets
        .iter()
        .filter(|(u, _)| *u != &owner)
        .map(|(u, (caret, _))| (u.clone(), *caret))
        .collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    ordered.extend(rest);
    let _ = out_tx.send(protocol::encode(&Message::Upload { users: ordered }));
    let _ = out_tx.send(protocol::encode(&Message::TextUpload { text: snapshot.lines.join("\n") }));

    let _ = broadcast_tx.send((Message::Connect { user: username.clone() }, Some(username.clone())));

    while let Some(line) = line_rx.recv().await {
        let msg = match protocol::decode(&line) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(%addr, %username, error = %e, "malformed frame, dropped");
                continue;
            }
        };
        match msg {
            Message::Disconnect { .. } => break,
            Message::Motion { dir, .. } => {
                engine.apply_motion(&username, dir, false).await;
                let _ = broadcast_tx.send((Message::Motion { user: username.clone(), dir }, Some(username.clone())));
            }
            Message::ShiftedMotion { dir, .. } => {
                engine.apply_motion(&username, dir, true).await;
                let _ = broadcast_tx.send((Message::ShiftedMotion { user: username.clone(), dir }, Some(username.clone())));
            }
            // Write attempts from a read-only connection are dropped here rather
            // than rebroadcast: the engine would no-op them anyway, and nothing
            // downstream can tell a no-op edit apart from a real one once it is
            // on the wire, so other peers must never see it in the first place.
            Message::WriteChar { c, .. } if !read_only => {
                engine.apply_edit(&username, EditKind::WriteChar(c)).await;
                let _ = broadcast_tx.send((Message::WriteChar { user: username.clone(), c }, Some(username.clone())));
            }
            Message::Newline { .. } if !read_only => {
                engine.apply_edit(&username, EditKind::Newline).await;
                let _ = broadcast_tx.send((Message::Newline { user: username.clone() }, Some(username.clone())));
            }
            Message::Backspace { .. } if !read_only => {
                engine.apply_edit(&username, EditKind::Backspace).await;
                let _ = broadcast_tx.send((Message::Backspace { user: username.clone() }, Some(username.clone())));
            }
            Message::Paste { text, .. } if !read_only => {
                engine.apply_edit(&username, EditKind::Paste(text.clone())).await;
                let _ = broadcast_tx.send((Message::Paste { user: username.clone(), text }, Some(username.clone())));
            }
            Message::Cut { .. } if !read_only => {
                engine.apply_edit(&username, EditKind::Cut).await;
                let _ = broadcast_tx.send((Message::Cut { user: username.clone() }, Some(username.clone())));
            }
            Message::Undo { .. } if !read_only => {
                engine.undo(&username).await;
                let _ = broadcast_tx.send((Message::Undo { user: username.clone() }, Some(username.clone())));
            }
            Message::Redo { .. } if !read_only => {
                engine.redo(&username).await;
                let _ = broadcast_tx.send((Message::Redo { user: username.clone() }, Some(username.clone())));
            }
            Message::WriteChar { .. }
            | Message::Newline { .. }
            | Message::Backspace { .. }
            | Message::Paste { .. }
            | Message::Cut { .. }
            | Message::Undo { .. }
            | Message::Redo { .. } => {
                tracing::debug!(%username, "write attempt from read-only connection, dropped");
            }
            Message::Connect { .. } | Message::Upload { .. } | Message::TextUpload { .. } | Message::HostDisconnect { .. } | Message::ReadOnlyNotice { .. } => {
                tracing::debug!(%username, "unexpected message after handshake, ignored");
            }
        }
    }

    engine.remove_participant(&username).await;
    {
        let mut guard = peers.lock().await;
        guard.by_user.remove(&username);
    }
    let _ = broadcast_tx.send((Message::Disconnect { user: username }, None));
    Ok(())
}
