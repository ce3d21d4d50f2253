//! The session history log and end-of-session reconciliation/blame pass.
//!
//! Frames are appended exactly as captured at edit time and never
//! touched again until [`reconcile_and_blame`] runs once at session end
//! (see DESIGN.md for why the log, unlike participant carets, is not
//! live-rewritten on every edit). Reconciliation walks the log in
//! reverse: each cut is corrected against *earlier cut* frames only —
//! an earlier insert is never rewritten-against, only ever rewritten
//! itself when it falls after a cut that needed correcting — and any
//! correction is then propagated forward onto later frames.

use crate::position::{self, Position};

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryFrame {
    Cut {
        top: Position,
        bot: Position,
        text: String,
        author: String,
    },
    Insert {
        top: Position,
        bot: Position,
        author: String,
    },
}

impl HistoryFrame {
    pub fn positions(&self) -> (Position, Position) {
        match self {
            HistoryFrame::Cut { top, bot, .. } => (*top, *bot),
            HistoryFrame::Insert { top, bot, .. } => (*top, *bot),
        }
    }

    fn set_positions(&mut self, top: Position, bot: Position) {
        match self {
            HistoryFrame::Cut { top: t, bot: b, .. } => {
                *t = top;
                *b = bot;
            }
            HistoryFrame::Insert { top: t, bot: b, .. } => {
                *t = top;
                *b = bot;
            }
        }
    }

    pub fn author(&self) -> &str {
        match self {
            HistoryFrame::Cut { author, .. } => author,
            HistoryFrame::Insert { author, .. } => author,
        }
    }

}

/// Ordered, removable log of action frames, keyed by a monotonically
/// increasing op id. Frames are recorded as captured and left alone
/// until [`reconcile_and_blame`] processes the whole log at session end.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<(u64, HistoryFrame)>,
    next_id: u64,
}

impl HistoryLog {
    pub fn new() -> Self {
        HistoryLog {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub fn record_cut(&mut self, top: Position, bot: Position, text: String, author: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, HistoryFrame::Cut { top, bot, text, author }));
        id
    }

    pub fn record_insert(&mut self, top: Position, bot: Position, author: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, HistoryFrame::Insert { top, bot, author }));
        id
    }

    /// Removes the frame with the given op id (undo, spec.md §4.5).
    pub fn remove(&mut self, id: u64) {
        self.entries.retain(|(eid, _)| *eid != id);
    }

    pub fn frames(&self) -> Vec<HistoryFrame> {
        self.entries.iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn apply_cut_blame(blame: &mut Vec<String>, top: Position, bot: Position, author: &str) {
    if top.line >= blame.len() || bot.line >= blame.len() {
        return;
    }
    blame[top.line] = author.to_string();
    blame[bot.line] = author.to_string();
    if bot.line > top.line {
        blame.drain(top.line + 1..bot.line);
    }
}

fn apply_insert_blame(blame: &mut Vec<String>, top: Position, bot: Position, author: &str) {
    if top.line > blame.len() {
        return;
    }
    blame[top.line.min(blame.len() - 1)] = author.to_string();
    for _ in 0..bot.line.saturating_sub(top.line) {
        blame.insert(top.line, author.to_string());
    }
}

/// Reconciles a session's frames against the initial document and
/// derives the final blame vector. Returns `(reconciled_frames, blame)`.
///
/// Only earlier *cut* frames participate in correcting a cut's
/// position — undoing an earlier cut's effect means re-inserting what
/// it removed, a plain [`position::rewrite_on_insert`]. Earlier insert
/// frames are left alone (undoing an insert would require deciding
/// whether the cut being reconciled fell inside content that did not
/// exist before the session started, which only matters under
/// concurrent conflicting edits at the same offset — explicitly out of
/// scope per spec.md §1). Text is carried through unchanged; only
/// positions are corrected.
pub fn reconcile_and_blame(
    mut frames: Vec<HistoryFrame>,
    initial_line_count: usize,
    initial_author: &str,
) -> (Vec<HistoryFrame>, Vec<String>) {
    let len = frames.len();

    for i in (0..len).rev() {
        let (top0, bot0, text, author) = match &frames[i] {
            HistoryFrame::Cut { top, bot, text, author } => (*top, *bot, text.clone(), author.clone()),
            HistoryFrame::Insert { .. } => continue,
        };

        let mut top = top0;
        let mut bot = bot0;
        let mut changed = false;
        for j in (0..i).rev() {
            if let HistoryFrame::Cut { top: jtop, bot: jbot, .. } = &frames[j] {
                let (jtop, jbot) = (*jtop, *jbot);
                let ntop = position::rewrite_on_insert(jtop, jbot, top);
                let nbot = position::rewrite_on_insert(jtop, jbot, bot);
                if ntop != top || nbot != bot {
                    changed = true;
                }
                top = ntop;
                bot = nbot;
            }
        }

        if changed {
            for frame in frames.iter_mut().skip(i + 1) {
                let (jt, jb) = frame.positions();
                frame.set_positions(position::rewrite_on_insert(top, bot, jt), position::rewrite_on_insert(top, bot, jb));
            }
        }

        frames[i] = HistoryFrame::Cut { top, bot, text, author };
    }

    let mut blame = vec![initial_author.to_string(); initial_line_count.max(1)];
    for frame in &frames {
        match frame {
            HistoryFrame::Cut { top, bot, author, .. } => apply_cut_blame(&mut blame, *top, *bot, author),
            HistoryFrame::Insert { top, bot, author } => apply_insert_blame(&mut blame, *top, *bot, author),
        }
    }

    (frames, blame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_records_and_removes_by_id() {
        let mut log = HistoryLog::new();
        let id = log.record_insert(Position::ORIGIN, Position::new(1, 0), "o".into());
        assert_eq!(log.frames().len(), 1);
        log.remove(id);
        assert!(log.is_empty());
    }

    #[test]
    fn reconciliation_scenario_from_spec() {
        // O types 'x': insert (0,0)-(1,0)
        // O cuts 'x' back out: cut (0,0)-(1,0) text "x"
        // O pastes "hi\nlo" at (0,0): insert (0,0)-(2,1)
        let frames = vec![
            HistoryFrame::Insert {
                top: Position::new(0, 0),
                bot: Position::new(1, 0),
                author: "O".into(),
            },
            HistoryFrame::Cut {
                top: Position::new(0, 0),
                bot: Position::new(1, 0),
                text: "x".into(),
                author: "O".into(),
            },
            HistoryFrame::Insert {
                top: Position::new(0, 0),
                bot: Position::new(2, 1),
                author: "O".into(),
            },
        ];
        let (reconciled, blame) = reconcile_and_blame(frames, 3, "owner");
        assert_eq!(
            reconciled[0].positions(),
            (Position::new(0, 0), Position::new(1, 0))
        );
        assert_eq!(
            reconciled[1],
            HistoryFrame::Cut {
                top: Position::new(0, 0),
                bot: Position::new(1, 0),
                text: "x".into(),
                author: "O".into(),
            }
        );
        assert_eq!(
            reconciled[2].positions(),
            (Position::new(0, 0), Position::new(2, 1))
        );
        assert_eq!(
            blame,
            vec!["O".to_string(), "O".to_string(), "owner".to_string(), "owner".to_string()]
        );
    }

    #[test]
    fn an_overlapping_earlier_cut_shifts_a_later_cut_forward() {
        let frames = vec![
            HistoryFrame::Cut {
                top: Position::new(0, 0),
                bot: Position::new(2, 0),
                text: "ab".into(),
                author: "A".into(),
            },
            HistoryFrame::Cut {
                top: Position::new(0, 0),
                bot: Position::new(1, 0),
                text: "c".into(),
                author: "B".into(),
            },
        ];
        let (reconciled, _) = reconcile_and_blame(frames, 1, "owner");
        // Undoing A's cut (reinserting "ab") pushes B's recorded range
        // forward by the width of A's removed text.
        assert_eq!(
            reconciled[1].positions(),
            (Position::new(2, 0), Position::new(3, 0))
        );
    }
}
