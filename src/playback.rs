use std::collections::HashSet;

use crate::feed::{FeedItem, MediaRef};
use crate::player::debug_log;

/// Fraction of a card's area that must be on screen before it counts as
/// visible. Matches the feed's viewability policy; config can override it.
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("player not ready")]
    NotReady,
    #[error("transport failed: {0}")]
    Failed(String),
}

/// Commands a live player must honour. Implementations are allowed to fail
/// while the underlying player is still warming up; callers treat every
/// error here as degraded rendering, never as a fatal condition.
pub trait Transport {
    fn seek_to_start(&mut self) -> Result<(), TransportError>;
    fn play(&mut self) -> Result<(), TransportError>;
    fn pause(&mut self) -> Result<(), TransportError>;
    fn set_looping(&mut self, looping: bool) -> Result<(), TransportError>;
    fn set_muted(&mut self, muted: bool) -> Result<(), TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Seek to start, begin playback, enable loop.
    Activate,
    /// Pause and fall back to the placeholder; no decoding off screen.
    Deactivate,
    SetMuted(bool),
}

/// A transport instruction tagged with the activation generation that issued
/// it. A player only honours commands carrying the current generation, which
/// keeps stale callbacks from rapid scrolling from resurrecting playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    pub item_id: i64,
    pub generation: u64,
    pub action: Action,
}

/// Decides which single feed cell may play media, mirrors the shared mute
/// flag into it, and hands out generation-tagged transport commands as
/// visibility and focus change. All state lives on the UI thread; callers
/// apply the returned commands to their player sessions.
pub struct Coordinator {
    items: Vec<FeedItem>,
    visible: HashSet<i64>,
    screen_focused: bool,
    global_muted: bool,
    generation: u64,
    active: Option<(i64, u64)>,
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator {
            items: Vec::new(),
            visible: HashSet::new(),
            screen_focused: true,
            global_muted: false,
            generation: 0,
            active: None,
        }
    }

    pub fn global_muted(&self) -> bool {
        self.global_muted
    }

    pub fn screen_focused(&self) -> bool {
        self.screen_focused
    }

    pub fn active_id(&self) -> Option<i64> {
        self.active.map(|(id, _)| id)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    /// True when a player callback tagged with `generation` still speaks for
    /// the live activation of `item_id`.
    pub fn is_current(&self, item_id: i64, generation: u64) -> bool {
        self.active == Some((item_id, generation))
    }

    /// Pure visibility/focus predicate from the card's point of view. The
    /// coordinator additionally enforces a single owner via the generation
    /// token; this check alone intentionally mirrors the caller contract.
    pub fn resolve_active(&self, cell_id: i64) -> bool {
        self.screen_focused && self.visible.contains(&cell_id)
    }

    /// Replace the rendered feed. The visibility snapshot is pruned to the
    /// surviving ids so it stays a subset of what is on screen, and an
    /// active cell that vanished is released.
    pub fn replace_items(&mut self, items: Vec<FeedItem>) -> Vec<Command> {
        self.items = items;
        let ids: HashSet<i64> = self.items.iter().map(|item| item.id).collect();
        self.visible.retain(|id| ids.contains(id));
        self.recompute()
    }

    /// Apply one visibility snapshot, replacing the previous one wholesale.
    /// Re-sending an identical snapshot is a no-op and produces no commands.
    pub fn update_visibility(&mut self, viewable_ids: &[i64]) -> Vec<Command> {
        let rendered: HashSet<i64> = self.items.iter().map(|item| item.id).collect();
        let next: HashSet<i64> = viewable_ids
            .iter()
            .copied()
            .filter(|id| rendered.contains(id))
            .collect();
        if next == self.visible {
            return Vec::new();
        }
        self.visible = next;
        self.recompute()
    }

    pub fn set_screen_focus(&mut self, focused: bool) -> Vec<Command> {
        if self.screen_focused == focused {
            return Vec::new();
        }
        self.screen_focused = focused;
        self.recompute()
    }

    /// Single mutator for the shared mute flag. While a cell is active the
    /// flip reaches its player as a transport-only update: no pause, no
    /// restart, no state transition.
    pub fn set_muted(&mut self, muted: bool) -> Vec<Command> {
        if self.global_muted == muted {
            return Vec::new();
        }
        self.global_muted = muted;
        match self.active {
            Some((id, generation)) => vec![Command {
                item_id: id,
                generation,
                action: Action::SetMuted(muted),
            }],
            None => Vec::new(),
        }
    }

    pub fn toggle_muted(&mut self) -> Vec<Command> {
        self.set_muted(!self.global_muted)
    }

    fn candidate(&self) -> Option<i64> {
        if !self.screen_focused {
            return None;
        }
        self.items
            .iter()
            .find(|item| {
                self.visible.contains(&item.id)
                    && item.media.as_ref().is_some_and(MediaRef::is_local_video)
            })
            .map(|item| item.id)
    }

    fn recompute(&mut self) -> Vec<Command> {
        let candidate = self.candidate();
        let mut commands = Vec::new();
        match (self.active, candidate) {
            (Some((id, _)), Some(next)) if id == next => {}
            (previous, next) => {
                if let Some((id, generation)) = previous {
                    commands.push(Command {
                        item_id: id,
                        generation,
                        action: Action::Deactivate,
                    });
                    self.active = None;
                }
                if let Some(id) = next {
                    self.generation = self.generation.wrapping_add(1);
                    self.active = Some((id, self.generation));
                    commands.push(Command {
                        item_id: id,
                        generation: self.generation,
                        action: Action::Activate,
                    });
                }
            }
        }
        commands
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive a transport from one command. Transport failures mean the player is
/// not ready yet or already gone; both degrade to a logged no-op so the cell
/// keeps rendering.
pub fn apply_command<T: Transport>(command: &Command, transport: &mut T, muted: bool) {
    let results: Vec<(&str, Result<(), TransportError>)> = match command.action {
        Action::Activate => vec![
            ("seek", transport.seek_to_start()),
            ("play", transport.play()),
            ("loop", transport.set_looping(true)),
            ("mute", transport.set_muted(muted)),
        ],
        Action::Deactivate => vec![("pause", transport.pause())],
        Action::SetMuted(value) => vec![("mute", transport.set_muted(value))],
    };
    for (op, result) in results {
        if let Err(err) = result {
            debug_log(format!(
                "transport {op} failed for item {} (gen {}): {err}",
                command.item_id, command.generation
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MediaRef;

    fn video_item(id: i64) -> FeedItem {
        FeedItem {
            id,
            media: Some(MediaRef::LocalVideo {
                url: format!("https://cdn.test/{id}.mp4"),
            }),
        }
    }

    fn image_item(id: i64) -> FeedItem {
        FeedItem {
            id,
            media: Some(MediaRef::Image {
                url: format!("https://cdn.test/{id}.jpg"),
            }),
        }
    }

    fn coordinator_with(items: Vec<FeedItem>) -> Coordinator {
        let mut coordinator = Coordinator::new();
        let commands = coordinator.replace_items(items);
        assert!(commands.is_empty(), "nothing visible yet");
        coordinator
    }

    #[test]
    fn identical_snapshot_is_idempotent() {
        let mut coordinator = coordinator_with(vec![video_item(1), video_item(2)]);
        let first = coordinator.update_visibility(&[1]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].action, Action::Activate);
        let second = coordinator.update_visibility(&[1]);
        assert!(second.is_empty());
    }

    #[test]
    fn non_visible_cells_never_resolve_active() {
        let mut coordinator = coordinator_with(vec![video_item(1), video_item(2)]);
        coordinator.update_visibility(&[1]);
        assert!(!coordinator.resolve_active(2));
        coordinator.set_screen_focus(false);
        assert!(!coordinator.resolve_active(2));
    }

    #[test]
    fn focus_gates_resolution() {
        let mut coordinator = coordinator_with(vec![video_item(1)]);
        coordinator.update_visibility(&[1]);
        coordinator.set_screen_focus(false);
        assert!(!coordinator.resolve_active(1));
        coordinator.set_screen_focus(true);
        assert!(coordinator.resolve_active(1));
    }

    #[test]
    fn losing_focus_deactivates_and_regaining_reactivates() {
        let mut coordinator = coordinator_with(vec![video_item(1)]);
        coordinator.update_visibility(&[1]);
        let commands = coordinator.set_screen_focus(false);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].action, Action::Deactivate);
        assert_eq!(coordinator.active_id(), None);

        let commands = coordinator.set_screen_focus(true);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].action, Action::Activate);
        assert_eq!(coordinator.active_id(), Some(1));
    }

    #[test]
    fn scrolling_hands_off_with_fresh_generation() {
        let mut coordinator = coordinator_with(vec![video_item(1), video_item(2)]);
        coordinator.update_visibility(&[1]);
        let first_gen = coordinator.current_generation();

        let commands = coordinator.update_visibility(&[2]);
        assert_eq!(
            commands.iter().map(|c| c.action).collect::<Vec<_>>(),
            vec![Action::Deactivate, Action::Activate]
        );
        assert_eq!(commands[0].item_id, 1);
        assert_eq!(commands[1].item_id, 2);
        assert!(commands[1].generation > first_gen);
        assert!(!coordinator.is_current(1, first_gen));
        assert!(coordinator.is_current(2, commands[1].generation));
    }

    #[test]
    fn image_cells_are_skipped_for_playback() {
        let mut coordinator = coordinator_with(vec![image_item(1), video_item(2)]);
        let commands = coordinator.update_visibility(&[1, 2]);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].item_id, 2);
    }

    #[test]
    fn mute_flip_is_transport_only() {
        let mut coordinator = coordinator_with(vec![video_item(1)]);
        coordinator.update_visibility(&[1]);
        let generation = coordinator.current_generation();

        let commands = coordinator.toggle_muted();
        assert_eq!(
            commands,
            vec![Command {
                item_id: 1,
                generation,
                action: Action::SetMuted(true),
            }]
        );
        // Still active: no deactivate/activate pair was issued.
        assert_eq!(coordinator.active_id(), Some(1));
        assert_eq!(coordinator.current_generation(), generation);
        assert!(coordinator.global_muted());

        let again = coordinator.set_muted(true);
        assert!(again.is_empty());
    }

    #[test]
    fn feed_refresh_prunes_visibility_and_releases_active() {
        let mut coordinator = coordinator_with(vec![video_item(1), video_item(2)]);
        coordinator.update_visibility(&[1, 2]);
        assert_eq!(coordinator.active_id(), Some(1));

        let commands = coordinator.replace_items(vec![video_item(2)]);
        // Item 1 is gone; item 2 survives in the pruned snapshot and takes
        // over as the active cell.
        assert_eq!(
            commands.iter().map(|c| c.action).collect::<Vec<_>>(),
            vec![Action::Deactivate, Action::Activate]
        );
        assert_eq!(commands[1].item_id, 2);

        let commands = coordinator.replace_items(vec![]);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].action, Action::Deactivate);
        assert_eq!(coordinator.active_id(), None);
    }

    #[test]
    fn visibility_ignores_ids_not_rendered() {
        let mut coordinator = coordinator_with(vec![video_item(1)]);
        let commands = coordinator.update_visibility(&[99]);
        assert!(commands.is_empty());
        assert!(!coordinator.resolve_active(99));
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: Vec<String>,
        ready: bool,
    }

    impl Transport for RecordingTransport {
        fn seek_to_start(&mut self) -> Result<(), TransportError> {
            self.record("seek")
        }
        fn play(&mut self) -> Result<(), TransportError> {
            self.record("play")
        }
        fn pause(&mut self) -> Result<(), TransportError> {
            self.record("pause")
        }
        fn set_looping(&mut self, _looping: bool) -> Result<(), TransportError> {
            self.record("loop")
        }
        fn set_muted(&mut self, muted: bool) -> Result<(), TransportError> {
            self.record(if muted { "mute" } else { "unmute" })
        }
    }

    impl RecordingTransport {
        fn record(&mut self, op: &str) -> Result<(), TransportError> {
            if !self.ready {
                return Err(TransportError::NotReady);
            }
            self.calls.push(op.to_string());
            Ok(())
        }
    }

    #[test]
    fn activation_drives_full_transport_sequence() {
        let mut transport = RecordingTransport {
            ready: true,
            ..Default::default()
        };
        let command = Command {
            item_id: 1,
            generation: 1,
            action: Action::Activate,
        };
        apply_command(&command, &mut transport, true);
        assert_eq!(transport.calls, vec!["seek", "play", "loop", "mute"]);
    }

    #[test]
    fn not_ready_transport_is_tolerated() {
        let mut transport = RecordingTransport::default();
        let command = Command {
            item_id: 1,
            generation: 1,
            action: Action::Activate,
        };
        // Every sub-operation fails; nothing panics and nothing is recorded.
        apply_command(&command, &mut transport, false);
        assert!(transport.calls.is_empty());
    }
}
