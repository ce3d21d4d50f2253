//! Line-based ASCII wire protocol (spec.md §4.6/§6).
//!
//! Every message is `author opcode arg...` terminated by the 3-byte
//! delimiter `0x20 0x0A 0x1E`. Tokens containing a literal space use the
//! `/s` escape uniformly (spec.md's Open Questions reject the source's
//! naive single-space split).

use crate::error::ProtocolError;
use crate::participant::{Direction, EditKind};
use crate::position::Position;

pub const DELIMITER: [u8; 3] = [0x20, 0x0A, 0x1E];

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Connect { user: String },
    Upload { users: Vec<(String, Position)> },
    TextUpload { text: String },
    Motion { user: String, dir: Direction },
    ShiftedMotion { user: String, dir: Direction },
    WriteChar { user: String, c: char },
    Newline { user: String },
    Backspace { user: String },
    Paste { user: String, text: String },
    Cut { user: String },
    Undo { user: String },
    Redo { user: String },
    Disconnect { user: String },
    HostDisconnect { user: String },
    ReadOnlyNotice { user: String },
}

fn escape(s: &str) -> String {
    s.replace(' ', "/s")
}

fn unescape(s: &str) -> String {
    s.replace("/s", " ")
}

/// Encodes `msg` into a frame including the trailing delimiter.
pub fn encode(msg: &Message) -> Vec<u8> {
    let body = match msg {
        Message::Connect { user } => format!("{user} -C"),
        Message::Upload { users } => {
            let mut tokens = vec!["host -U".to_string()];
            for (user, pos) in users {
                tokens.push(format!("{user} {} {}", pos.col, pos.line));
            }
            tokens.join(" ")
        }
        Message::TextUpload { text } => format!("host -T {}", escape(text)),
        Message::Motion { user, dir } => format!("{user} -M {}", dir.as_token()),
        Message::ShiftedMotion { user, dir } => format!("{user} -MS {}", dir.as_token()),
        Message::WriteChar { user, c } => format!("{user} -E {}", escape(&c.to_string())),
        Message::Newline { user } => format!("{user} -NL"),
        Message::Backspace { user } => format!("{user} -D"),
        Message::Paste { user, text } => format!("{user} -PASTE {}", escape(text)),
        Message::Cut { user } => format!("{user} -CUT"),
        Message::Undo { user } => format!("{user} -UNDO"),
        Message::Redo { user } => format!("{user} -REDO"),
        Message::Disconnect { user } => format!("{user} -DC"),
        Message::HostDisconnect { user } => format!("{user} -DCH"),
        Message::ReadOnlyNotice { user } => format!("{user} -WNACK"),
    };
    let mut out = body.into_bytes();
    out.extend_from_slice(&DELIMITER);
    out
}

/// Decodes one frame's worth of tokens (delimiter already stripped).
pub fn decode(line: &str) -> Result<Message, ProtocolError> {
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() < 2 {
        return Err(ProtocolError::Malformed(line.to_string()));
    }
    let author = tokens[0].to_string();
    let opcode = tokens[1];

    match opcode {
        "-C" => Ok(Message::Connect { user: author }),
        "-U" => {
            let mut users = Vec::new();
            let rest = &tokens[2..];
            for chunk in rest.chunks(3) {
                if chunk.len() < 3 {
                    break;
                }
                let col: usize = chunk[1].parse().map_err(|_| ProtocolError::Malformed(line.to_string()))?;
                let row: usize = chunk[2].parse().map_err(|_| ProtocolError::Malformed(line.to_string()))?;
                users.push((chunk[0].to_string(), Position::new(col, row)));
            }
            Ok(Message::Upload { users })
        }
        "-T" => {
            if tokens.len() != 3 {
                return Err(ProtocolError::Malformed(line.to_string()));
            }
            Ok(Message::TextUpload { text: unescape(tokens[2]) })
        }
        "-M" | "-MS" => {
            let dir = tokens.get(2).and_then(|t| Direction::from_token(t)).ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
            if opcode == "-M" {
                Ok(Message::Motion { user: author, dir })
            } else {
                Ok(Message::ShiftedMotion { user: author, dir })
            }
        }
        "-E" => {
            if tokens.len() != 3 {
                return Err(ProtocolError::Malformed(line.to_string()));
            }
            let unescaped = unescape(tokens[2]);
            let c = unescaped.chars().next().ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
            Ok(Message::WriteChar { user: author, c })
        }
        "-NL" => Ok(Message::Newline { user: author }),
        "-D" => Ok(Message::Backspace { user: author }),
        "-PASTE" => {
            if tokens.len() != 3 {
                return Err(ProtocolError::Malformed(line.to_string()));
            }
            Ok(Message::Paste { user: author, text: unescape(tokens[2]) })
        }
        "-CUT" => Ok(Message::Cut { user: author }),
        "-UNDO" => Ok(Message::Undo { user: author }),
        "-REDO" => Ok(Message::Redo { user: author }),
        "-DC" => Ok(Message::Disconnect { user: author }),
        "-DCH" => Ok(Message::HostDisconnect { user: author }),
        "-WNACK" => Ok(Message::ReadOnlyNotice { user: author }),
        other => Err(ProtocolError::UnknownOpcode(other.to_string())),
    }
}

/// The §4.6 drop rule: ignore a message whose author is unknown, or whose
/// author is the local username (self-authored echo).
pub fn should_apply(author: &str, local_username: &str, known_users: &[String]) -> bool {
    if author == local_username {
        return false;
    }
    known_users.iter().any(|u| u == author)
}

pub fn motion_to_edit(msg: &Message) -> Option<(&str, EditKind)> {
    match msg {
        Message::WriteChar { user, c } => Some((user, EditKind::WriteChar(*c))),
        Message::Newline { user } => Some((user, EditKind::Newline)),
        Message::Backspace { user } => Some((user, EditKind::Backspace)),
        Message::Paste { user, text } => Some((user, EditKind::Paste(text.clone()))),
        Message::Cut { user } => Some((user, EditKind::Cut)),
        _ => None,
    }
}

/// Splits a byte stream on the delimiter, returning complete frames and the
/// unconsumed remainder to keep buffering.
pub fn split_frames(buf: &[u8]) -> (Vec<String>, Vec<u8>) {
    let mut frames = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + DELIMITER.len() <= buf.len() {
        if buf[i..i + DELIMITER.len()] == DELIMITER {
            if let Ok(s) = std::str::from_utf8(&buf[start..i]) {
                frames.push(s.to_string());
            }
            i += DELIMITER.len();
            start = i;
        } else {
            i += 1;
        }
    }
    (frames, buf[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_write_char_with_escaped_space() {
        let msg = Message::WriteChar { user: "O".into(), c: ' ' };
        let framed = encode(&msg);
        let (frames, rest) = split_frames(&framed);
        assert!(rest.is_empty());
        assert_eq!(frames.len(), 1);
        assert_eq!(decode(&frames[0]).unwrap(), msg);
    }

    #[test]
    fn paste_preserves_interior_spaces_via_escape() {
        let msg = Message::Paste { user: "O".into(), text: "a b  c".into() };
        let framed = encode(&msg);
        let (frames, _) = split_frames(&framed);
        assert_eq!(decode(&frames[0]).unwrap(), msg);
    }

    #[test]
    fn split_frames_buffers_partial_trailing_data() {
        let mut bytes = encode(&Message::Cut { user: "O".into() });
        bytes.extend_from_slice(b"partial-author -M l");
        let (frames, rest) = split_frames(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(rest, b"partial-author -M l");
    }

    #[test]
    fn unknown_opcode_is_reported_not_panicking() {
        assert!(matches!(decode("alice -BOGUS"), Err(ProtocolError::UnknownOpcode(_))));
    }

    #[test]
    fn self_authored_message_is_dropped() {
        let known = vec!["alice".to_string(), "bob".to_string()];
        assert!(!should_apply("alice", "alice", &known));
        assert!(should_apply("bob", "alice", &known));
    }

    #[test]
    fn unknown_author_is_dropped() {
        let known = vec!["alice".to_string()];
        assert!(!should_apply("mallory", "alice", &known));
    }

    #[test]
    fn unescaped_space_in_paste_payload_is_malformed_not_truncated() {
        assert!(matches!(decode("alice -PASTE a b"), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn unescaped_space_in_write_char_payload_is_malformed() {
        assert!(matches!(decode("alice -E a b"), Err(ProtocolError::Malformed(_))));
    }
}
