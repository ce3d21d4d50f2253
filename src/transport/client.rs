//! Client side of a session: connects out to a host, completes the
//! upload handshake, and mirrors every remote message into a local
//! [`Engine`] so the bundled TUI has the same read path for local and
//! remote edits (spec.md §4.7, §4.12).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::participant::{Direction, EditKind};
use crate::protocol::{self, Message};

use super::{read_frames, write_frames};

pub struct ClientSession {
    pub engine: Arc<Engine>,
    pub read_only: bool,
    username: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ClientSession {
    pub async fn connect(addr: SocketAddr, username: String) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(read_frames(read_half, line_tx));

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(write_frames(write_half, out_rx));

        let _ = out_tx.send(protocol::encode(&Message::Connect { user: username.clone() }));

        let mut read_only = false;
        let upload = loop {
            let line = line_rx.recv().await.ok_or_else(|| anyhow::anyhow!("connection closed before upload"))?;
            match protocol::decode(&line) {
                Ok(Message::Upload { users }) => break users,
                Ok(Message::ReadOnlyNotice { .. }) => {
                    read_only = true;
                    continue;
                }
                Ok(Message::HostDisconnect { .. }) => anyhow::bail!("not authorized to join this session"),
                _ => continue,
            }
        };
        if upload.iter().any(|(u, _)| u == &username) {
            anyhow::bail!("username '{username}' is already in use in this session");
        }

        let text = loop {
            let line = line_rx.recv().await.ok_or_else(|| anyhow::anyhow!("connection closed before text upload"))?;
            if let Ok(Message::TextUpload { text }) = protocol::decode(&line) {
                break text;
            }
        };

        let owner = upload.first().map(|(u, _)| u.clone()).unwrap_or_else(|| username.clone());
        let engine = Arc::new(Engine::new(owner, ""));
        engine.set_document_text(&text).await;
        for (user, pos) in &upload {
            engine.add_participant(user, false).await;
            engine.set_position(user, *pos, None).await;
        }
        engine.add_participant(&username, false).await;

        let known: HashSet<String> = upload.iter().map(|(u, _)| u.clone()).collect();
        tokio::spawn(apply_remote_loop(engine.clone(), line_rx, username.clone(), known));

        Ok(ClientSession { engine, read_only, username, outbound: out_tx })
    }

    fn send(&self, msg: Message) {
        let _ = self.outbound.send(protocol::encode(&msg));
    }

    /// Applies `dir` to this client's own engine mirror immediately, then
    /// sends it onward — `apply_remote_loop` drops the echo of this
    /// message when it comes back, so this is the only path that ever
    /// applies a local user's own motions (spec.md §2's local data flow).
    pub async fn send_motion(&self, dir: Direction) {
        self.engine.apply_motion(&self.username, dir, false).await;
        self.send(Message::Motion { user: self.username.clone(), dir });
    }

    pub async fn send_shifted_motion(&self, dir: Direction) {
        self.engine.apply_motion(&self.username, dir, true).await;
        self.send(Message::ShiftedMotion { user: self.username.clone(), dir });
    }

    pub async fn send_edit(&self, kind: EditKind) {
        if self.read_only {
            return;
        }
        self.engine.apply_edit(&self.username, kind.clone()).await;
        let msg = match kind {
            EditKind::WriteChar(c) => Message::WriteChar { user: self.username.clone(), c },
            EditKind::Newline => Message::Newline { user: self.username.clone() },
            EditKind::Backspace => Message::Backspace { user: self.username.clone() },
            EditKind::Paste(text) => Message::Paste { user: self.username.clone(), text },
            EditKind::Cut => Message::Cut { user: self.username.clone() },
        };
        self.send(msg);
    }

    pub async fn send_undo(&self) {
        if self.read_only {
            return;
        }
        self.engine.undo(&self.username).await;
        self.send(Message::Undo { user: self.username.clone() });
    }

    pub async fn send_redo(&self) {
        if self.read_only {
            return;
        }
        self.engine.redo(&self.username).await;
        self.send(Message::Redo { user: self.username.clone() });
    }

    pub fn disconnect(&self) {
        self.send(Message::Disconnect { user: self.username.clone() });
    }
}

/// Applies every message authored by someone else onto the local engine
/// mirror, dropping self-authored echoes and frames from users this
/// client hasn't seen connect (spec.md §4.6/§7).
async fn apply_remote_loop(
    engine: Arc<Engine>,
    mut line_rx: mpsc::UnboundedReceiver<String>,
    local_username: String,
    mut known: HashSet<String>,
) {
    while let Some(line) = line_rx.recv().await {
        let msg = match protocol::decode(&line) {
            Ok(m) => m,
            Err(_) => continue,
        };

        match &msg {
            Message::Connect { user } => {
                if known.insert(user.clone()) {
                    engine.add_participant(user, false).await;
                }
                continue;
            }
            Message::Disconnect { user } | Message::HostDisconnect { user } => {
                known.remove(user);
                engine.remove_participant(user).await;
                continue;
            }
            _ => {}
        }

        let known_list: Vec<String> = known.iter().cloned().collect();

        match msg {
            Message::Motion { user, dir } if protocol::should_apply(&user, &local_username, &known_list) => {
                engine.apply_motion(&user, dir, false).await;
            }
            Message::ShiftedMotion { user, dir } if protocol::should_apply(&user, &local_username, &known_list) => {
                engine.apply_motion(&user, dir, true).await;
            }
            Message::Undo { user } if protocol::should_apply(&user, &local_username, &known_list) => {
                engine.undo(&user).await;
            }
            Message::Redo { user } if protocol::should_apply(&user, &local_username, &known_list) => {
                engine.redo(&user).await;
            }
            other => {
                if let Some((user, kind)) = protocol::motion_to_edit(&other) {
                    if protocol::should_apply(user, &local_username, &known_list) {
                        engine.apply_edit(user, kind).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    use crate::transport::host::HostSession;

    #[test]
    fn duplicate_username_check_matches_upload_list() {
        let upload = vec![("O".to_string(), crate::position::Position::ORIGIN)];
        assert!(upload.iter().any(|(u, _)| u == "O"));
        assert!(!upload.iter().any(|(u, _)| u == "C"));
    }

    /// Reproduces spec.md §2's local data flow end to end: a client's own
    /// keystroke must land in its own engine mirror without waiting on a
    /// round trip through the host, since `apply_remote_loop` drops the
    /// echo of a self-authored message.
    #[tokio::test]
    async fn own_edit_is_reflected_in_local_engine_without_waiting_for_an_echo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("permissions"), "carol:rw\n").unwrap();
        let file_path = dir.path().join("doc.txt");

        let host = HostSession::start(file_path, "owner".to_string(), 0, dir.path().to_path_buf(), "stamp".to_string())
            .await
            .unwrap();
        let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), host.bound_addr.port());

        let client = ClientSession::connect(addr, "carol".to_string()).await.unwrap();
        client.send_edit(EditKind::WriteChar('x')).await;

        let view = client.engine.view().await;
        assert_eq!(view.lines[0], "x");
        assert_eq!(view.participants.iter().find(|p| p.username == "carol").unwrap().caret, crate::position::Position::new(1, 0));
    }
}
