//! Persisted history/blame artifacts (spec.md §4.5/§6).
//!
//! Layout per opened file, under `<basedir>/history/<basename>/`:
//! - `<session_start>.o.cache` — copy of the file at session end
//! - `<session_start>.cache` — reconciled log
//! - `<session_start>.blame.cache` — per-line authors, one per line
//!
//! Log entry format, space-separated, one per line:
//! `op top_col top_line bot_col bot_line payload author?` where `payload`
//! is the cut text (spaces escaped as `/s`) when `op = cut`, otherwise the
//! author. Lines shorter than five tokens are skipped.

use std::path::{Path, PathBuf};

use crate::history::HistoryFrame;
use crate::position::Position;

fn escape(s: &str) -> String {
    s.replace(' ', "/s")
}

fn unescape(s: &str) -> String {
    s.replace("/s", " ")
}

pub fn history_dir(basedir: &Path, file_path: &Path) -> PathBuf {
    let basename = file_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    basedir.join("history").join(basename)
}

fn serialize_frame(frame: &HistoryFrame) -> String {
    match frame {
        HistoryFrame::Cut { top, bot, text, author } => {
            format!("cut {} {} {} {} {} {}", top.col, top.line, bot.col, bot.line, escape(text), author)
        }
        HistoryFrame::Insert { top, bot, author } => {
            format!("insert {} {} {} {} {}", top.col, top.line, bot.col, bot.line, author)
        }
    }
}

fn parse_frame(line: &str) -> Option<HistoryFrame> {
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() < 5 {
        return None;
    }
    let op = tokens[0];
    let top_col: usize = tokens[1].parse().ok()?;
    let top_line: usize = tokens[2].parse().ok()?;
    let bot_col: usize = tokens[3].parse().ok()?;
    let bot_line: usize = tokens[4].parse().ok()?;
    let top = Position::new(top_col, top_line);
    let bot = Position::new(bot_col, bot_line);

    match op {
        "cut" if tokens.len() >= 7 => Some(HistoryFrame::Cut {
            top,
            bot,
            text: unescape(tokens[5]),
            author: tokens[6].to_string(),
        }),
        "insert" if tokens.len() >= 6 => Some(HistoryFrame::Insert { top, bot, author: tokens[5].to_string() }),
        _ => None,
    }
}

/// Writes the three session artifacts. `session_stamp` is a caller-supplied
/// identifier (the session start time, formatted by the caller) since this
/// module does no clock access of its own.
pub fn write_session(
    basedir: &Path,
    file_path: &Path,
    session_stamp: &str,
    final_text: &str,
    reconciled_log: &[HistoryFrame],
    blame: &[String],
) -> std::io::Result<()> {
    let dir = history_dir(basedir, file_path);
    std::fs::create_dir_all(&dir)?;

    std::fs::write(dir.join(format!("{session_stamp}.o.cache")), final_text)?;

    let log_text: String = reconciled_log.iter().map(serialize_frame).collect::<Vec<_>>().join("\n");
    std::fs::write(dir.join(format!("{session_stamp}.cache")), log_text)?;

    let blame_text = blame.join("\n");
    std::fs::write(dir.join(format!("{session_stamp}.blame.cache")), blame_text)?;

    Ok(())
}

/// Lists session stamps for `file_path`, oldest first, by scanning
/// `.o.cache` files.
pub fn list_sessions(basedir: &Path, file_path: &Path) -> std::io::Result<Vec<String>> {
    let dir = history_dir(basedir, file_path);
    let mut stamps = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stamp) = name.strip_suffix(".o.cache") {
            stamps.push(stamp.to_string());
        }
    }
    stamps.sort();
    Ok(stamps)
}

pub fn read_log(basedir: &Path, file_path: &Path, stamp: &str) -> std::io::Result<Vec<HistoryFrame>> {
    let dir = history_dir(basedir, file_path);
    let contents = std::fs::read_to_string(dir.join(format!("{stamp}.cache")))?;
    Ok(contents.lines().filter_map(parse_frame).collect())
}

pub fn read_document(basedir: &Path, file_path: &Path, stamp: &str) -> std::io::Result<String> {
    let dir = history_dir(basedir, file_path);
    std::fs::read_to_string(dir.join(format!("{stamp}.o.cache")))
}

/// Reads the blame vector. If the file is missing, bootstraps blame from
/// `owner` for every line of `doc_text` (spec.md §7's persistence fallback).
pub fn read_blame(basedir: &Path, file_path: &Path, stamp: &str, doc_text: &str, owner: &str) -> Vec<String> {
    let dir = history_dir(basedir, file_path);
    match std::fs::read_to_string(dir.join(format!("{stamp}.blame.cache"))) {
        Ok(contents) => contents.lines().map(|s| s.to_string()).collect(),
        Err(_) => vec![owner.to_string(); doc_text.split('\n').count().max(1)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cut_frame_round_trips_through_text_format() {
        let frame = HistoryFrame::Cut {
            top: Position::new(0, 0),
            bot: Position::new(3, 1),
            text: "a b".into(),
            author: "alice".into(),
        };
        let line = serialize_frame(&frame);
        assert_eq!(parse_frame(&line), Some(frame));
    }

    #[test]
    fn insert_frame_round_trips_through_text_format() {
        let frame = HistoryFrame::Insert {
            top: Position::new(0, 0),
            bot: Position::new(2, 1),
            author: "bob".into(),
        };
        let line = serialize_frame(&frame);
        assert_eq!(parse_frame(&line), Some(frame));
    }

    #[test]
    fn short_lines_are_skipped() {
        assert_eq!(parse_frame("cut 0 0"), None);
    }

    #[test]
    fn write_then_list_then_read_round_trips_a_session() {
        let dir = tempdir().unwrap();
        let file_path = PathBuf::from("/tmp/doc.txt");
        let frames = vec![HistoryFrame::Insert {
            top: Position::new(0, 0),
            bot: Position::new(1, 0),
            author: "owner".into(),
        }];
        let blame = vec!["owner".to_string()];
        write_session(dir.path(), &file_path, "2026-01-01T00-00-00", "x", &frames, &blame).unwrap();

        let stamps = list_sessions(dir.path(), &file_path).unwrap();
        assert_eq!(stamps, vec!["2026-01-01T00-00-00".to_string()]);

        let read_back = read_log(dir.path(), &file_path, &stamps[0]).unwrap();
        assert_eq!(read_back, frames);
        assert_eq!(read_document(dir.path(), &file_path, &stamps[0]).unwrap(), "x");
        assert_eq!(read_blame(dir.path(), &file_path, &stamps[0], "x", "owner"), blame);
    }

    #[test]
    fn missing_blame_file_bootstraps_from_owner() {
        let dir = tempdir().unwrap();
        let file_path = PathBuf::from("/tmp/missing.txt");
        let blame = read_blame(dir.path(), &file_path, "nope", "a\nb\nc", "owner");
        assert_eq!(blame, vec!["owner", "owner", "owner"]);
    }
}
