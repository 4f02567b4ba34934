//! Undo/redo over full track-collection snapshots

use tracing::debug;

use crate::tracks_manager::{TrackList, TracksManager};

/// Default maximum number of history entries kept
pub const DEFAULT_MAX_HISTORY: usize = 100;

const INITIAL_TITLE: &str = "Initial state";

/// One point in the version log
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub title: String,
    pub snapshot: TrackList,
}

/// Versioned log of snapshots with a cursor.
///
/// Entry 0 is the root (initial state). Recording a new entry after an undo
/// truncates the redo tail. When the log exceeds `max_entries` the oldest
/// entry is evicted and the next one becomes the root.
#[derive(Debug)]
pub struct HistoryManager {
    entries: Vec<HistoryEntry>,
    position: usize,
    max_entries: usize,
}

impl HistoryManager {
    /// Start a history rooted at the manager's current state
    pub fn new(tracks: &TracksManager) -> Self {
        Self::with_capacity(tracks, DEFAULT_MAX_HISTORY)
    }

    pub fn with_capacity(tracks: &TracksManager, max_entries: usize) -> Self {
        Self {
            entries: vec![HistoryEntry {
                title: INITIAL_TITLE.to_string(),
                snapshot: tracks.snapshot(),
            }],
            position: 0,
            max_entries: max_entries.max(1),
        }
    }

    /// Record the current state as a new entry after the cursor
    pub fn add_entry(&mut self, title: impl Into<String>, tracks: &TracksManager) {
        let title = title.into();
        self.entries.truncate(self.position + 1);
        self.entries.push(HistoryEntry {
            title,
            snapshot: tracks.snapshot(),
        });
        self.position = self.entries.len() - 1;

        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
            self.position -= excess;
        }
        debug!(title = %self.entries[self.position].title, position = self.position, "History entry added");
    }

    pub fn has_undo(&self) -> bool {
        self.position > 0
    }

    pub fn has_redo(&self) -> bool {
        self.position + 1 < self.entries.len()
    }

    /// Step back and restore that state. Returns false at the root.
    pub fn undo(&mut self, tracks: &mut TracksManager) -> bool {
        if !self.has_undo() {
            return false;
        }
        let undone = self.entries[self.position].title.clone();
        self.position -= 1;
        tracks.restore(self.entries[self.position].snapshot.clone());
        debug!(undone = %undone, "Undo");
        true
    }

    /// Step forward and restore that state. Returns false at the newest entry.
    pub fn redo(&mut self, tracks: &mut TracksManager) -> bool {
        if !self.has_redo() {
            return false;
        }
        self.position += 1;
        tracks.restore(self.entries[self.position].snapshot.clone());
        debug!(redone = %self.entries[self.position].title, "Redo");
        true
    }

    pub fn current_title(&self) -> &str {
        &self.entries[self.position].title
    }

    /// Title of the entry `undo` would revert
    pub fn undo_title(&self) -> Option<&str> {
        self.has_undo().then(|| self.current_title())
    }

    /// Title of the entry `redo` would reapply
    pub fn redo_title(&self) -> Option<&str> {
        self.entries.get(self.position + 1).map(|e| e.title.as_str())
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.title.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and re-root at the current state
    pub fn clear(&mut self, tracks: &TracksManager) {
        self.entries.clear();
        self.entries.push(HistoryEntry {
            title: INITIAL_TITLE.to_string(),
            snapshot: tracks.snapshot(),
        });
        self.position = 0;
    }
}
