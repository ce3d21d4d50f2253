//! Session/transport (spec.md §4.7): TCP star topology, one host accepting
//! inbound connections, each client opening exactly one outbound
//! connection. Every connection gets a dedicated reader task decoding
//! framed messages and a writer task draining a per-peer send queue;
//! suspension only ever happens on socket I/O or channel recv, never
//! while an engine lock is held (spec.md §5).

pub mod client;
pub mod host;

pub const DEFAULT_PORT: u16 = 12000;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::protocol;

/// Reads raw bytes off `half` until EOF, splitting on the wire delimiter
/// and forwarding each complete frame (delimiter stripped) to `out`.
/// Partial trailing bytes are buffered across reads.
async fn read_frames(mut half: OwnedReadHalf, out: mpsc::UnboundedSender<String>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let (frames, rest) = protocol::split_frames(&buf);
        buf = rest;
        for frame in frames {
            if out.send(frame).is_err() {
                return;
            }
        }
    }
}

/// Drains `rx` and writes each already-delimited frame to `half`, ending
/// silently on the first write failure (spec.md §7: a writer that fails
/// is closed and dropped, not retried).
async fn write_frames(mut half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if half.write_all(&bytes).await.is_err() {
            break;
        }
    }
}
