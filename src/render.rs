//! Read-only renderer interface (spec.md §4 component table, expanded in
//! SPEC_FULL.md §4.9). The engine owns everything a caller needs to draw
//! a frame; this module only shapes that state for a consumer.

use crate::engine::Engine;
use crate::history::HistoryFrame;
use crate::position::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantSnapshot {
    pub username: String,
    pub caret: Position,
    pub selection: Option<(Position, Position)>,
}

/// Everything a renderer needs for one frame.
pub struct ViewSnapshot {
    pub lines: Vec<String>,
    pub participants: Vec<ParticipantSnapshot>,
}

impl Engine {
    /// Builds a render-ready snapshot from the engine's internal state,
    /// deriving each participant's normalized selection range from their
    /// caret/anchor pair.
    pub async fn view(&self) -> ViewSnapshot {
        let snap = self.snapshot().await;
        let mut participants: Vec<ParticipantSnapshot> = snap
            .carets
            .into_iter()
            .map(|(username, (caret, anchor))| {
                let selection = anchor.map(|a| {
                    let r = crate::position::Range::normalize(caret, a);
                    (r.top, r.bot)
                });
                ParticipantSnapshot { username, caret, selection }
            })
            .collect();
        participants.sort_by(|a, b| a.username.cmp(&b.username));
        ViewSnapshot { lines: snap.lines, participants }
    }
}

/// A replay/blame overlay for `-CH`/`-B` read-only views: a reconciled
/// history log and the derived per-line blame, loaded from disk rather
/// than from a live engine.
pub struct ReplayView {
    pub lines: Vec<String>,
    pub frames: Vec<HistoryFrame>,
    pub blame: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::Direction;

    #[tokio::test]
    async fn view_reports_sorted_participants_with_selection() {
        let engine = Engine::new("O", "abcdef");
        engine.add_participant("C", false).await;
        engine.apply_motion("C", Direction::Right, true).await;
        engine.apply_motion("C", Direction::Right, true).await;

        let view = engine.view().await;
        assert_eq!(view.lines, vec!["abcdef".to_string()]);
        assert_eq!(view.participants.len(), 2);
        assert_eq!(view.participants[0].username, "C");
        assert_eq!(view.participants[0].selection, Some((Position::new(0, 0), Position::new(2, 0))));
        assert_eq!(view.participants[1].username, "O");
        assert_eq!(view.participants[1].selection, None);
    }
}
