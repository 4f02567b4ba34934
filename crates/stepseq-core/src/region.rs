//! Regions: bounded spans of MIDI events on a track

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{MidiEvent, MidiEventKind};

/// Steps per beat (the timeline's smallest unit)
pub const STEPS_PER_BEAT: u64 = 1000;
/// Beats per bar
pub const BEATS_PER_BAR: u64 = 4;
/// Steps per bar
pub const STEPS_PER_BAR: u64 = STEPS_PER_BEAT * BEATS_PER_BAR;

/// Start of the bar containing `step`
pub fn bar_floor(step: u64) -> u64 {
    step / STEPS_PER_BAR * STEPS_PER_BAR
}

/// Smallest bar boundary at or above `step`
pub fn bar_ceil(step: u64) -> u64 {
    step.div_ceil(STEPS_PER_BAR) * STEPS_PER_BAR
}

/// A bounded span of MIDI events, keyed by offset in steps from the region start.
///
/// `length` is always a whole number of bars covering every event offset and
/// only ever grows. The note extrema widen as notes are added and are not
/// narrowed when notes are removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    name: String,
    length: u64,
    events: BTreeMap<u64, Vec<MidiEvent>>,
    min_note_seen: Option<u8>,
    max_note_seen: Option<u8>,
}

impl Default for Region {
    fn default() -> Self {
        Self::new("")
    }
}

impl Region {
    /// Empty region, one bar long
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: STEPS_PER_BAR,
            events: BTreeMap::new(),
            min_note_seen: None,
            max_note_seen: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Length in steps
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn min_note(&self) -> Option<u8> {
        self.min_note_seen
    }

    pub fn max_note(&self) -> Option<u8> {
        self.max_note_seen
    }

    pub fn events(&self) -> &BTreeMap<u64, Vec<MidiEvent>> {
        &self.events
    }

    pub fn events_at(&self, offset: u64) -> &[MidiEvent] {
        self.events.get(&offset).map_or(&[], Vec::as_slice)
    }

    /// Events with `start <= offset < end`, in offset order
    pub fn events_between(&self, start: u64, end: u64) -> impl Iterator<Item = (u64, &MidiEvent)> {
        let range = if start < end { start..end } else { start..start };
        self.events
            .range(range)
            .flat_map(|(&offset, events)| events.iter().map(move |e| (offset, e)))
    }

    pub fn event_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Length this region would have after an event lands at `offset`
    pub fn length_with(&self, offset: u64) -> u64 {
        self.length.max(bar_ceil(offset))
    }

    /// Add a note event on channel 0
    pub fn add_event(&mut self, offset: u64, note: u8, on: bool, velocity: u8) {
        self.add_midi_event(offset, MidiEvent::note(0, note, on, velocity));
    }

    /// Add an event of any kind
    pub fn add_midi_event(&mut self, offset: u64, event: MidiEvent) {
        if event.kind == MidiEventKind::Note {
            self.min_note_seen = Some(self.min_note_seen.map_or(event.number, |n| n.min(event.number)));
            self.max_note_seen = Some(self.max_note_seen.map_or(event.number, |n| n.max(event.number)));
        }
        self.length = self.length_with(offset);
        self.events.entry(offset).or_default().push(event);
    }

    /// Remove the first note event with `note` at `offset`
    pub fn remove_event(&mut self, offset: u64, note: u8) -> Option<MidiEvent> {
        let events = self.events.get_mut(&offset)?;
        let idx = events
            .iter()
            .position(|e| e.kind == MidiEventKind::Note && e.number == note)?;
        let removed = events.remove(idx);
        if events.is_empty() {
            self.events.remove(&offset);
        }
        Some(removed)
    }

    /// Move the first event equal to `event` from one offset to another.
    /// Returns false if no such event exists at `from`.
    pub fn move_event(&mut self, event: &MidiEvent, from: u64, to: u64) -> bool {
        let Some(events) = self.events.get_mut(&from) else {
            return false;
        };
        let Some(idx) = events.iter().position(|e| e == event) else {
            return false;
        };
        let moved = events.remove(idx);
        if events.is_empty() {
            self.events.remove(&from);
        }
        self.length = self.length_with(to);
        self.events.entry(to).or_default().push(moved);
        true
    }
}
