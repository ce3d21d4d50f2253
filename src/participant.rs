//! Per-user caret/selection state and the reversible edit records that
//! make up a user's undo/redo stacks.

use crate::position::Position;

/// One of the four motion directions used by plain and shifted moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub fn from_token(tok: &str) -> Option<Self> {
        match tok {
            "l" => Some(Direction::Left),
            "r" => Some(Direction::Right),
            "u" => Some(Direction::Up),
            "d" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Direction::Left => "l",
            Direction::Right => "r",
            Direction::Up => "u",
            Direction::Down => "d",
        }
    }
}

/// The tagged edit variant the design notes call for, replacing the
/// source's opcode-keyed function-reference maps.
#[derive(Debug, Clone, PartialEq)]
pub enum EditKind {
    WriteChar(char),
    Newline,
    Backspace,
    Paste(String),
    Cut,
}

/// A captured, reversible removal: text that was at `[top, bot)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CutRecord {
    pub top: Position,
    pub bot: Position,
    pub text: String,
}

/// A captured, reversible insertion spanning `[top, bot)`. The inserted
/// text itself does not need to be stored: undoing an insert is always a
/// cut of the same range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsertRecord {
    pub top: Position,
    pub bot: Position,
}

/// One entry on a participant's action (undo) stack.
///
/// `selection_cut` is the record of step 2 in the template (spec.md
/// §4.3) when the edit started from an active selection.
/// Exactly one of `forward_insert`/`forward_cut` is populated, matching
/// whichever kind of forward edit (if any) step 3 performed; a plain
/// `Cut` operation populates neither, since its forward step is empty.
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub selection_cut: Option<CutRecord>,
    pub forward_insert: Option<InsertRecord>,
    pub forward_cut: Option<CutRecord>,
    /// The edit kind to replay on redo — reproduces the forward edit
    /// through the same template so bookkeeping stays equivalent.
    pub redo: EditKind,
    /// History-log op_cnt(s) this entry's forward application allocated,
    /// removed verbatim on undo (spec.md §4.5).
    pub history_ops: Vec<u64>,
    /// Caret/anchor the actor held immediately before this edit. Undo
    /// restores these (rather than collapsing to the cut's own top) so a
    /// following redo sees the same selection and reproduces the same
    /// composite edit through the template.
    pub original_caret: Position,
    pub original_anchor: Option<Position>,
}

