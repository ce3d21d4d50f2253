//! Minimal crossterm-driven renderer (SPEC_FULL.md §4.12). Raw mode plus
//! the alternate screen, carets/selections in reverse video, one status
//! line. Intentionally thin: key events translate into the same
//! `Edit`/motion calls a remote peer's message would drive, so local and
//! remote edits share one application path.

use std::io::{stdout, Write};
use std::time::Duration;

use anyhow::Result;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use unicode_width::UnicodeWidthStr;

use crate::engine::Engine;
use crate::participant::{Direction, EditKind};
use crate::position::Position;
use crate::render::ViewSnapshot;

/// RAII guard for raw mode + the alternate screen, restored on drop even
/// on an early return or panic.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(stdout(), EnterAlternateScreen, Hide)?;
        Ok(TerminalGuard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(stdout(), LeaveAlternateScreen, Show);
        let _ = terminal::disable_raw_mode();
    }
}

/// What a key event translates to, once decided locally.
pub enum Action {
    Motion(Direction, bool),
    Edit(EditKind),
    Undo,
    Redo,
    Quit,
}

/// Maps a crossterm key event to an [`Action`], or `None` for keys this
/// editor ignores.
pub fn translate_key(key: KeyEvent) -> Option<Action> {
    let shifted = key.modifiers.contains(KeyModifiers::SHIFT);
    match key.code {
        KeyCode::Left => Some(Action::Motion(Direction::Left, shifted)),
        KeyCode::Right => Some(Action::Motion(Direction::Right, shifted)),
        KeyCode::Up => Some(Action::Motion(Direction::Up, shifted)),
        KeyCode::Down => Some(Action::Motion(Direction::Down, shifted)),
        KeyCode::Enter => Some(Action::Edit(EditKind::Newline)),
        KeyCode::Backspace => Some(Action::Edit(EditKind::Backspace)),
        KeyCode::Char('x') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Edit(EditKind::Cut)),
        KeyCode::Char('z') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Undo),
        KeyCode::Char('y') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Redo),
        KeyCode::Char('q') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Char(c) => Some(Action::Edit(EditKind::WriteChar(c))),
        _ => None,
    }
}

/// Polls for one input event without blocking past `timeout`, returning
/// the translated action if the user did something actionable.
pub fn poll_action(timeout: Duration) -> Result<Option<Action>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) => Ok(translate_key(key)),
        _ => Ok(None),
    }
}

/// Draws one frame: document lines, each participant's caret in reverse
/// video (and selection range, if any), and a one-line status bar.
pub fn draw(view: &ViewSnapshot, local_username: &str, read_only: bool) -> Result<()> {
    let mut out = stdout();
    queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;

    for (row, line) in view.lines.iter().enumerate() {
        queue!(out, MoveTo(0, row as u16))?;
        draw_line(&mut out, line, row, view)?;
    }

    let (_, rows) = terminal::size()?;
    let caret = view
        .participants
        .iter()
        .find(|p| p.username == local_username)
        .map(|p| p.caret)
        .unwrap_or(Position::ORIGIN);
    let status = format!(
        " {local_username}{} — {}:{} ",
        if read_only { " [read-only]" } else { "" },
        caret.line + 1,
        caret.col + 1
    );
    queue!(out, MoveTo(0, rows.saturating_sub(1)), SetAttribute(Attribute::Reverse), Print(&status), SetAttribute(Attribute::Reset))?;

    out.flush()?;
    Ok(())
}

fn draw_line(out: &mut impl Write, line: &str, row: usize, view: &ViewSnapshot) -> Result<()> {
    let selected_cols: Vec<(usize, usize)> = view
        .participants
        .iter()
        .filter_map(|p| p.selection)
        .filter(|(top, bot)| top.line <= row && row <= bot.line)
        .map(|(top, bot)| {
            let start = if top.line == row { top.col } else { 0 };
            let end = if bot.line == row { bot.col } else { line.width() };
            (start, end)
        })
        .collect();

    if selected_cols.is_empty() {
        queue!(out, Print(line))?;
        return Ok(());
    }

    for (col, ch) in line.chars().enumerate() {
        let reversed = selected_cols.iter().any(|(s, e)| col >= *s && col < *e);
        if reversed {
            queue!(out, SetAttribute(Attribute::Reverse), Print(ch), SetAttribute(Attribute::Reset))?;
        } else {
            queue!(out, Print(ch))?;
        }
    }
    Ok(())
}

/// Drives the render/input loop until the user quits, dispatching local
/// actions through `on_action` (which forwards to the engine directly for
/// a host, or encodes and sends for a client, then mirrors locally).
pub async fn run_loop<F, Fut>(engine: &Engine, local_username: &str, read_only: bool, mut on_action: F) -> Result<()>
where
    F: FnMut(Action) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    loop {
        let view = engine.view().await;
        draw(&view, local_username, read_only)?;

        if let Some(action) = poll_action(Duration::from_millis(50))? {
            let keep_going = on_action(action).await;
            if !keep_going {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_char_key_becomes_write_char_edit() {
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        match translate_key(key) {
            Some(Action::Edit(EditKind::WriteChar('q'))) => {}
            _ => panic!("expected WriteChar edit"),
        }
    }

    #[test]
    fn shifted_arrow_becomes_shifted_motion() {
        let key = KeyEvent::new(KeyCode::Right, KeyModifiers::SHIFT);
        match translate_key(key) {
            Some(Action::Motion(Direction::Right, true)) => {}
            _ => panic!("expected shifted right motion"),
        }
    }

    #[test]
    fn ctrl_q_becomes_quit() {
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert!(matches!(translate_key(key), Some(Action::Quit)));
    }
}
