//! Track collection, selection state and time-windowed event dispatch

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::error::{Result, StepseqError};
use crate::event::{MidiEvent, MidiEventKind};
use crate::instrument::Instrument;
use crate::plugin::Plugin;
use crate::track::{Track, TrackId};

/// Shared, immutable view of the track collection. Edits go through
/// [`TracksManager`], which copies on write, so a snapshot never changes.
pub type TrackList = Arc<Vec<Track>>;

/// A selected region: owning track and region start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRef {
    pub track: TrackId,
    pub start: u64,
}

/// Owns the tracks (and through them the instruments) plus selection state
#[derive(Debug)]
pub struct TracksManager {
    tracks: TrackList,
    next_track_id: u64,
    active_track: TrackId,
    solo_track: TrackId,
    active_region: Option<RegionRef>,
}

impl Default for TracksManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TracksManager {
    pub fn new() -> Self {
        Self {
            tracks: Arc::new(Vec::new()),
            next_track_id: 1,
            active_track: TrackId::NULL,
            solo_track: TrackId::NULL,
            active_region: None,
        }
    }

    pub fn add_track(&mut self, name: impl Into<String>) -> TrackId {
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        let track = Track::new(id, name);
        info!(id = %id, name = %track.name, "Track added");
        Arc::make_mut(&mut self.tracks).push(track);
        id
    }

    pub fn add_track_with_instrument(&mut self, name: impl Into<String>, instrument: Instrument) -> TrackId {
        let id = self.add_track(name);
        if let Ok(track) = self.get_track_mut(id) {
            track.set_instrument(Some(Arc::new(instrument)));
        }
        id
    }

    /// Remove a track, clearing any selection that referenced it
    pub fn remove_track(&mut self, id: TrackId) -> Result<Track> {
        let pos = self
            .tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(StepseqError::TrackNotFound(id.0))?;
        let track = Arc::make_mut(&mut self.tracks).remove(pos);
        if self.active_track == id {
            self.active_track = TrackId::NULL;
        }
        if self.solo_track == id {
            self.solo_track = TrackId::NULL;
        }
        if self.active_region.is_some_and(|r| r.track == id) {
            self.active_region = None;
        }
        info!(id = %id, name = %track.name, "Track removed");
        Ok(track)
    }

    pub fn get_track(&self, id: TrackId) -> Result<&Track> {
        self.tracks
            .iter()
            .find(|t| t.id == id)
            .ok_or(StepseqError::TrackNotFound(id.0))
    }

    pub fn get_track_mut(&mut self, id: TrackId) -> Result<&mut Track> {
        Arc::make_mut(&mut self.tracks)
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StepseqError::TrackNotFound(id.0))
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Instruments attached to tracks, in track order
    pub fn instruments(&self) -> impl Iterator<Item = &Arc<Instrument>> {
        self.tracks.iter().filter_map(|t| t.instrument.as_ref())
    }

    fn contains(&self, id: TrackId) -> bool {
        self.tracks.iter().any(|t| t.id == id)
    }

    /// Select a track; an unknown id selects nothing
    pub fn set_active_track(&mut self, id: TrackId) {
        self.active_track = if self.contains(id) { id } else { TrackId::NULL };
    }

    pub fn active_track(&self) -> TrackId {
        self.active_track
    }

    pub fn active_track_ref(&self) -> Option<&Track> {
        self.get_track(self.active_track).ok()
    }

    /// Solo a track; an unknown id (or `TrackId::NULL`) clears solo
    pub fn set_solo_track(&mut self, id: TrackId) {
        self.solo_track = if self.contains(id) { id } else { TrackId::NULL };
    }

    pub fn solo_track(&self) -> TrackId {
        self.solo_track
    }

    /// Select a region; returns false (and clears the selection) if it doesn't exist
    pub fn set_active_region(&mut self, track: TrackId, start: u64) -> bool {
        let exists = self
            .get_track(track)
            .is_ok_and(|t| t.get_region(start).is_some());
        self.active_region = exists.then_some(RegionRef { track, start });
        exists
    }

    pub fn active_region(&self) -> Option<RegionRef> {
        self.active_region
    }

    pub fn clear_active_region(&mut self) {
        self.active_region = None;
    }

    /// Deliver every event with absolute time in `[start, end)` to its
    /// track's plugin. Returns the number of events delivered.
    pub fn send_midi_notes_in_song(&self, start: u64, end: u64) -> usize {
        dispatch_events(&self.tracks, start, end)
    }

    /// Broadcast "all notes off" to every instrument
    pub fn all_notes_off(&self) {
        for instrument in self.instruments() {
            instrument.all_notes_off();
        }
    }

    /// Record a note into every armed track, or the active track if none is
    /// armed. Returns the number of tracks that received it.
    pub fn record_midi_event(&mut self, time: u64, note: u8, on: bool, velocity: u8) -> usize {
        let mut targets: Vec<TrackId> = self.tracks.iter().filter(|t| t.armed).map(|t| t.id).collect();
        if targets.is_empty() && !self.active_track.is_null() {
            targets.push(self.active_track);
        }

        let mut recorded = 0;
        for id in targets {
            let Ok(track) = self.get_track_mut(id) else { continue };
            if track.record_midi_event(time, note, on, velocity).is_some() {
                recorded += 1;
            }
        }
        recorded
    }

    pub fn finish_recording(&mut self) {
        if self.tracks.iter().all(|t| t.recording_region().is_none()) {
            return;
        }
        for track in Arc::make_mut(&mut self.tracks).iter_mut() {
            track.finish_recording();
        }
    }

    /// End of the last region across all tracks
    pub fn end_step(&self) -> u64 {
        self.tracks.iter().map(Track::end_step).max().unwrap_or(0)
    }

    /// Cheap copy of the current track collection
    pub fn snapshot(&self) -> TrackList {
        self.tracks.clone()
    }

    /// Replace the track collection; selections pointing at tracks or regions
    /// that no longer exist fall back to "none". Ids are never handed out twice.
    pub fn restore(&mut self, tracks: TrackList) {
        let max_id = tracks.iter().map(|t| t.id.0).max().unwrap_or(0);
        self.next_track_id = self.next_track_id.max(max_id + 1);
        self.tracks = tracks;

        self.set_active_track(self.active_track);
        self.set_solo_track(self.solo_track);
        if let Some(r) = self.active_region {
            self.set_active_region(r.track, r.start);
        }
        debug!(tracks = self.tracks.len(), "Track collection restored");
    }
}

/// Event dispatch over any track slice: every track with an instrument and
/// plugin, regions in start order, events in offset order.
pub fn dispatch_events(tracks: &[Track], start: u64, end: u64) -> usize {
    if start >= end {
        return 0;
    }
    let mut delivered = 0;

    for track in tracks {
        let Some(instrument) = &track.instrument else {
            continue;
        };
        let slot = instrument.lock();
        let Some(plugin) = slot.as_deref() else {
            continue;
        };
        let channel = instrument.midi_channel();

        for (&region_start, region) in track.regions().range(..end) {
            if region_start + region.length() < start {
                continue;
            }
            let rel_start = start.saturating_sub(region_start);
            let rel_end = end - region_start;
            for (offset, event) in region.events_between(rel_start, rel_end) {
                trace!(track = %track.id, time = region_start + offset, ?event, "Dispatch");
                deliver(plugin, channel, event);
                delivered += 1;
            }
        }
    }
    delivered
}

fn deliver(plugin: &dyn Plugin, channel: u8, event: &MidiEvent) {
    match event.kind {
        MidiEventKind::Note => plugin.send_midi_note(channel, event.number, event.value != 0, event.value),
        _ => plugin.send_midi_event(MidiEvent { channel, ..*event }),
    }
}
