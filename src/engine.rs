//! The operation engine: the single owner of the document, the participant
//! table, the per-user action/redo stacks, and the history log.
//!
//! Every mutating entry point takes the four locks in the fixed order
//! `action_stacks -> users -> users_positions -> text` and holds them for
//! the whole operation; no `.await` happens while any of them are held.
//! This is coarse-grained on purpose — per spec.md §5 the whole engine is
//! serialized through one event loop's worth of cooperative tasks, not a
//! multi-writer system that needs finer locking.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::document::Document;
use crate::history::{reconcile_and_blame, HistoryFrame, HistoryLog};
use crate::participant::{CutRecord, Direction, EditKind, InsertRecord, UndoEntry};
use crate::position::{self, Position, Range};

/// Connection-level info about a participant, independent of caret state.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub read_only: bool,
}

#[derive(Debug, Default)]
struct Stacks {
    action: Vec<UndoEntry>,
    redo: Vec<EditKind>,
}

struct TextState {
    document: Document,
    history: HistoryLog,
    clipboard: String,
}

/// A read-only snapshot for the renderer (spec.md §4.9's `EngineView`).
pub struct Snapshot {
    pub lines: Vec<String>,
    pub carets: HashMap<String, (Position, Option<Position>)>,
}

pub struct Engine {
    owner: String,
    action_stacks: Mutex<HashMap<String, Stacks>>,
    users: Mutex<HashMap<String, UserInfo>>,
    users_positions: Mutex<HashMap<String, (Position, Option<Position>)>>,
    text: Mutex<TextState>,
}

impl Engine {
    pub fn new(owner: impl Into<String>, initial_text: &str) -> Self {
        let owner = owner.into();
        let mut users = HashMap::new();
        users.insert(owner.clone(), UserInfo { read_only: false });
        let mut positions = HashMap::new();
        positions.insert(owner.clone(), (Position::ORIGIN, None));
        let mut action_stacks = HashMap::new();
        action_stacks.insert(owner.clone(), Stacks::default());

        Engine {
            owner,
            action_stacks: Mutex::new(action_stacks),
            users: Mutex::new(users),
            users_positions: Mutex::new(positions),
            text: Mutex::new(TextState {
                document: Document::from_text(initial_text),
                history: HistoryLog::new(),
                clipboard: String::new(),
            }),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn add_participant(&self, username: &str, read_only: bool) {
        let mut action_stacks = self.action_stacks.lock().await;
        let mut users = self.users.lock().await;
        let mut positions = self.users_positions.lock().await;
        action_stacks.entry(username.to_string()).or_default();
        users.insert(username.to_string(), UserInfo { read_only });
        positions.entry(username.to_string()).or_insert((Position::ORIGIN, None));
    }

    pub async fn remove_participant(&self, username: &str) {
        let mut action_stacks = self.action_stacks.lock().await;
        let mut users = self.users.lock().await;
        let mut positions = self.users_positions.lock().await;
        action_stacks.remove(username);
        users.remove(username);
        positions.remove(username);
    }

    /// Sets a participant's caret/anchor directly, used by transport to
    /// seed positions from a received `-U` upload.
    pub async fn set_position(&self, username: &str, caret: Position, anchor: Option<Position>) {
        let mut positions = self.users_positions.lock().await;
        positions.insert(username.to_string(), (caret, anchor));
    }

    /// Replaces the document wholesale, used by transport to apply a
    /// received `-T` text upload before any edits have happened.
    pub async fn set_document_text(&self, text: &str) {
        let mut t = self.text.lock().await;
        t.document = Document::from_text(text);
    }

    pub async fn snapshot(&self) -> Snapshot {
        let positions = self.users_positions.lock().await;
        let text = self.text.lock().await;
        Snapshot {
            lines: text.document.lines().to_vec(),
            carets: positions.clone(),
        }
    }

    /// Rewrites every participant's (other than the acting user) caret and
    /// anchor, and every stored frame on every participant's action/redo
    /// stack, across an edit. `cut_range` is step 2's selection removal (if
    /// it happened); `insert_range` is step 3's forward insertion (if any).
    async fn propagate(
        &self,
        actor: &str,
        cut_range: Option<(Position, Position)>,
        insert_range: Option<(Position, Position)>,
        positions: &mut HashMap<String, (Position, Option<Position>)>,
        stacks: &mut HashMap<String, Stacks>,
    ) {
        let rewrite = |p: Position| -> Position {
            let p = match cut_range {
                Some((top, bot)) => position::rewrite_on_cut(top, bot, p),
                None => p,
            };
            match insert_range {
                Some((itop, ibot)) => position::rewrite_on_insert(itop, ibot, p),
                None => p,
            }
        };

        for (user, (caret, anchor)) in positions.iter_mut() {
            if user == actor {
                continue;
            }
            *caret = rewrite(*caret);
            *anchor = anchor.map(rewrite);
        }

        for (_, stack) in stacks.iter_mut() {
            for entry in stack.action.iter_mut() {
                rewrite_undo_entry(entry, &rewrite);
            }
        }
    }

    /// The §4.3 template. Applies `kind` on behalf of `actor`, rewriting
    /// every other participant's stored positions and pushing a composite
    /// undo frame. No-ops rather than erroring on edits with nothing to do
    /// (empty selection cut, paste of empty text, backspace at document
    /// start), per spec.md §7.
    pub async fn apply_edit(&self, actor: &str, kind: EditKind) {
        let mut action_stacks = self.action_stacks.lock().await;
        let mut users = self.users.lock().await;
        let mut positions = self.users_positions.lock().await;
        let mut text = self.text.lock().await;

        if users.get(actor).map(|u| u.read_only).unwrap_or(true) {
            return;
        }

        let (caret, anchor) = match positions.get(actor) {
            Some(p) => *p,
            None => return,
        };

        let original_caret = caret;
        let original_anchor = anchor;
        let mut selection_cut: Option<CutRecord> = None;
        let mut cut_range: Option<(Position, Position)> = None;
        let mut caret = caret;
        let mut history_ops = Vec::new();

        if let Some(anchor_pos) = anchor {
            let r = Range::normalize(caret, anchor_pos);
            if !r.is_empty() {
                let cut_text = text.document.range_text(r.top, r.bot);
                text.document.cut(r.top, r.bot);
                history_ops.push(text.history.record_cut(r.top, r.bot, cut_text.clone(), actor.to_string()));
                selection_cut = Some(CutRecord { top: r.top, bot: r.bot, text: cut_text });
                cut_range = Some((r.top, r.bot));
                caret = r.top;
            }
        }

        let had_selection = selection_cut.is_some();
        let mut forward_insert: Option<InsertRecord> = None;
        let mut forward_cut: Option<CutRecord> = None;
        let mut insert_range: Option<(Position, Position)> = None;
        let redo_kind = kind.clone();

        match kind {
            EditKind::WriteChar(c) => {
                let itop = caret;
                let ibot = text.document.insert(&c.to_string(), itop);
                history_ops.push(text.history.record_insert(itop, ibot, actor.to_string()));
                forward_insert = Some(InsertRecord { top: itop, bot: ibot });
                insert_range = Some((itop, ibot));
                caret = ibot;
            }
            EditKind::Newline => {
                let itop = caret;
                let ibot = text.document.insert("\n", itop);
                history_ops.push(text.history.record_insert(itop, ibot, actor.to_string()));
                forward_insert = Some(InsertRecord { top: itop, bot: ibot });
                insert_range = Some((itop, ibot));
                caret = ibot;
            }
            EditKind::Backspace => {
                if !had_selection {
                    let (rtop, removed) = backspace_range(&text.document, caret);
                    if let Some(rbot) = removed {
                        let t = text.document.range_text(rtop, rbot);
                        text.document.cut(rtop, rbot);
                        history_ops.push(text.history.record_cut(rtop, rbot, t.clone(), actor.to_string()));
                        forward_cut = Some(CutRecord { top: rtop, bot: rbot, text: t });
                        cut_range = Some((rtop, rbot));
                        caret = rtop;
                    }
                }
            }
            EditKind::Paste(paste_text) => {
                if !paste_text.is_empty() {
                    let itop = caret;
                    let ibot = text.document.insert(&paste_text, itop);
                    history_ops.push(text.history.record_insert(itop, ibot, actor.to_string()));
                    forward_insert = Some(InsertRecord { top: itop, bot: ibot });
                    insert_range = Some((itop, ibot));
                    caret = ibot;
                }
            }
            EditKind::Cut => {
                if actor == self.owner {
                    if let Some(rec) = &selection_cut {
                        text.clipboard = rec.text.clone();
                    }
                }
            }
        }

        if selection_cut.is_none() && forward_insert.is_none() && forward_cut.is_none() {
            return;
        }

        if let Some(p) = positions.get_mut(actor) {
            p.0 = caret;
            p.1 = None;
        }

        self.propagate(actor, cut_range, insert_range, &mut positions, &mut action_stacks).await;

        let entry = UndoEntry {
            selection_cut,
            forward_insert,
            forward_cut,
            redo: redo_kind,
            history_ops,
            original_caret,
            original_anchor,
        };
        let stacks = action_stacks.entry(actor.to_string()).or_default();
        stacks.action.push(entry);
        stacks.redo.clear();
    }

    /// Plain or shifted caret motion (spec.md §4.3 "Cursor motion").
    pub async fn apply_motion(&self, actor: &str, dir: Direction, shifted: bool) {
        let mut positions = self.users_positions.lock().await;
        let text = self.text.lock().await;

        let (caret, anchor) = match positions.get(actor) {
            Some(p) => *p,
            None => return,
        };

        if shifted {
            let anchor = anchor.unwrap_or(caret);
            let new_caret = text.document.clamp(step(&text.document, caret, dir));
            if let Some(p) = positions.get_mut(actor) {
                *p = (new_caret, Some(anchor));
            }
            return;
        }

        let new_caret = if let Some(anchor) = anchor {
            let r = Range::normalize(caret, anchor);
            match dir {
                // Collapsing left/up lands exactly on the selection's lesser
                // endpoint; collapsing right/down steps one past the greater
                // endpoint, matching a motion from a bare caret at that spot.
                Direction::Left | Direction::Up => text.document.clamp(r.top),
                Direction::Right | Direction::Down => text.document.clamp(step(&text.document, r.bot, dir)),
            }
        } else {
            text.document.clamp(step(&text.document, caret, dir))
        };
        if let Some(p) = positions.get_mut(actor) {
            *p = (new_caret, None);
        }
    }

    /// Pops `actor`'s action stack and reverses the edit it recorded.
    pub async fn undo(&self, actor: &str) {
        let mut action_stacks = self.action_stacks.lock().await;
        // Locked only to respect the fixed acquisition order; undo does not
        // need to inspect connection state.
        let _users = self.users.lock().await;
        let mut positions = self.users_positions.lock().await;
        let mut text = self.text.lock().await;

        let entry = {
            let stacks = action_stacks.entry(actor.to_string()).or_default();
            match stacks.action.pop() {
                Some(e) => e,
                None => return,
            }
        };

        for op in &entry.history_ops {
            text.history.remove(*op);
        }

        if let Some(ins) = &entry.forward_insert {
            text.document.cut(ins.top, ins.bot);
            self.propagate(actor, Some((ins.top, ins.bot)), None, &mut positions, &mut action_stacks).await;
        }
        if let Some(cut) = &entry.forward_cut {
            let ibot = text.document.insert(&cut.text, cut.top);
            self.propagate(actor, None, Some((cut.top, ibot)), &mut positions, &mut action_stacks).await;
        }
        if let Some(sel) = &entry.selection_cut {
            let ibot = text.document.insert(&sel.text, sel.top);
            self.propagate(actor, None, Some((sel.top, ibot)), &mut positions, &mut action_stacks).await;
        }

        if let Some(p) = positions.get_mut(actor) {
            *p = (entry.original_caret, entry.original_anchor);
        }

        let stacks = action_stacks.entry(actor.to_string()).or_default();
        stacks.redo.push(entry.redo);
    }

    /// Pops `actor`'s redo stack and replays the edit through the §4.3
    /// template again, so the resulting undo frame is bookkeeping-
    /// equivalent to the one that was just popped.
    pub async fn redo(&self, actor: &str) {
        let kind = {
            let mut action_stacks = self.action_stacks.lock().await;
            let stacks = action_stacks.entry(actor.to_string()).or_default();
            match stacks.redo.pop() {
                Some(k) => k,
                None => return,
            }
        };
        self.apply_edit(actor, kind).await;
    }

    /// Runs end-of-session reconciliation and returns `(final_text,
    /// reconciled_frames, blame)` for persistence to write out.
    pub async fn finish_session(&self) -> (String, Vec<HistoryFrame>, Vec<String>) {
        let text = self.text.lock().await;
        let frames: Vec<HistoryFrame> = text.history.frames();
        let (reconciled, blame) = reconcile_and_blame(frames, text.document.line_count(), &self.owner);
        (text.document.to_text(), reconciled, blame)
    }

    /// The frames as currently recorded, unreconciled — used by
    /// persistence to write the reconciled log (it reconciles itself).
    pub async fn history_frames(&self) -> Vec<HistoryFrame> {
        self.text.lock().await.history.frames()
    }

    pub async fn clipboard(&self) -> String {
        self.text.lock().await.clipboard.clone()
    }
}

fn rewrite_undo_entry(entry: &mut UndoEntry, rewrite: &dyn Fn(Position) -> Position) {
    if let Some(sel) = &mut entry.selection_cut {
        sel.top = rewrite(sel.top);
        sel.bot = rewrite(sel.bot);
    }
    if let Some(ins) = &mut entry.forward_insert {
        ins.top = rewrite(ins.top);
        ins.bot = rewrite(ins.bot);
    }
    if let Some(cut) = &mut entry.forward_cut {
        cut.top = rewrite(cut.top);
        cut.bot = rewrite(cut.bot);
    }
    entry.original_caret = rewrite(entry.original_caret);
    entry.original_anchor = entry.original_anchor.map(&rewrite);
}

/// The range backspace removes with no active selection: one code point to
/// the left, or a line-join at column 0. `None` at document start (no-op).
fn backspace_range(doc: &Document, caret: Position) -> (Position, Option<Position>) {
    if caret.col > 0 {
        return (Position::new(caret.col - 1, caret.line), Some(caret));
    }
    if caret.line == 0 {
        return (caret, None);
    }
    let prev_len = doc.line_len(caret.line - 1);
    (Position::new(prev_len, caret.line - 1), Some(Position::new(0, caret.line)))
}

fn step(doc: &Document, from: Position, dir: Direction) -> Position {
    match dir {
        Direction::Left => {
            if from.col > 0 {
                Position::new(from.col - 1, from.line)
            } else if from.line > 0 {
                Position::new(doc.line_len(from.line - 1), from.line - 1)
            } else {
                from
            }
        }
        Direction::Right => {
            if from.col < doc.line_len(from.line) {
                Position::new(from.col + 1, from.line)
            } else if from.line + 1 < doc.line_count() {
                Position::new(0, from.line + 1)
            } else {
                from
            }
        }
        Direction::Up => {
            if from.line == 0 {
                from
            } else {
                Position::new(from.col, from.line - 1)
            }
        }
        Direction::Down => {
            if from.line + 1 >= doc.line_count() {
                from
            } else {
                Position::new(from.col, from.line + 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine() -> Engine {
        Engine::new("O", "qwer\nqwer\nqwer")
    }

    #[tokio::test]
    async fn write_char_advances_caret_and_is_undoable() {
        let e = engine().await;
        e.apply_edit("O", EditKind::WriteChar('x')).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "xqwer");
        assert_eq!(snap.carets["O"].0, Position::new(1, 0));

        e.undo("O").await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "qwer");
        assert_eq!(snap.carets["O"].0, Position::new(0, 0));

        e.redo("O").await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "xqwer");
    }

    #[tokio::test]
    async fn shifted_right_then_cut_fills_clipboard() {
        let e = engine().await;
        e.apply_motion("O", Direction::Right, true).await;
        e.apply_edit("O", EditKind::Cut).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "wer");
        assert_eq!(e.clipboard().await, "q");
        assert_eq!(snap.carets["O"].0, Position::new(0, 0));

        e.undo("O").await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "qwer");

        e.redo("O").await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "wer");
    }

    #[tokio::test]
    async fn paste_multiline_splits_and_moves_caret() {
        let e = engine().await;
        e.apply_edit("O", EditKind::Paste("hi\nlo".into())).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines, vec!["hi", "loqwer", "qwer", "qwer"]);
        assert_eq!(snap.carets["O"].0, Position::new(2, 1));
    }

    #[tokio::test]
    async fn edit_by_one_user_rewrites_another_users_caret() {
        let e = engine().await;
        e.add_participant("C", false).await;
        e.apply_motion("C", Direction::Down, false).await;
        e.apply_motion("C", Direction::Down, false).await;
        // C at (0, 2); O pastes at (0,0), a same-line insert, does not
        // shift C's line-2 position.
        e.apply_edit("O", EditKind::Paste("ab".into())).await;
        e.apply_edit("C", EditKind::WriteChar('z')).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines, vec!["abqwer", "qwer", "zqwer"]);
        assert_eq!(snap.carets["C"].0, Position::new(1, 2));
    }

    #[tokio::test]
    async fn backspace_at_document_start_is_a_no_op() {
        let e = engine().await;
        e.apply_edit("O", EditKind::Backspace).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "qwer");
        assert_eq!(snap.carets["O"].0, Position::new(0, 0));
    }

    #[tokio::test]
    async fn backspace_at_column_zero_joins_lines() {
        let e = engine().await;
        e.apply_motion("O", Direction::Down, false).await;
        e.apply_edit("O", EditKind::Backspace).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines, vec!["qwerqwer", "qwer"]);
        assert_eq!(snap.carets["O"].0, Position::new(4, 0));
    }

    #[tokio::test]
    async fn read_only_participant_cannot_edit() {
        let e = engine().await;
        e.add_participant("R", true).await;
        e.apply_edit("R", EditKind::WriteChar('x')).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.lines[0], "qwer");
    }

    #[tokio::test]
    async fn unshifted_left_collapses_selection_to_its_top() {
        let e = engine().await;
        e.set_position("O", Position::new(3, 1), Some(Position::new(1, 1))).await;
        e.apply_motion("O", Direction::Left, false).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.carets["O"].0, Position::new(1, 1));
        assert_eq!(snap.carets["O"].1, None);
    }

    #[tokio::test]
    async fn unshifted_right_collapses_selection_one_past_its_bottom() {
        let e = engine().await;
        e.set_position("O", Position::new(1, 1), Some(Position::new(3, 1))).await;
        e.apply_motion("O", Direction::Right, false).await;
        let snap = e.snapshot().await;
        assert_eq!(snap.carets["O"].0, Position::new(4, 1));
        assert_eq!(snap.carets["O"].1, None);
    }
}
