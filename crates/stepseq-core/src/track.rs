//! Track representation

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StepseqError};
use crate::event::MidiEvent;
use crate::instrument::Instrument;
use crate::region::{bar_floor, Region, STEPS_PER_BAR};

/// Unique identifier for tracks. Ids start at 1; `TrackId::NULL` means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl TrackId {
    pub const NULL: TrackId = TrackId(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RGB colour
pub type Color = [u8; 3];

/// Colours handed out to new tracks in order
pub const TRACK_PALETTE: [Color; 8] = [
    [0xE0, 0x6C, 0x75],
    [0x98, 0xC3, 0x79],
    [0xE5, 0xC0, 0x7B],
    [0x61, 0xAF, 0xEF],
    [0xC6, 0x78, 0xDD],
    [0x56, 0xB6, 0xC2],
    [0xD1, 0x9A, 0x66],
    [0xAB, 0xB2, 0xBF],
];

/// A lane of regions keyed by absolute start step, with an optional instrument.
///
/// Regions never overlap: a region occupies `[start, start + length)` and
/// every insertion, move or growth that would intersect a neighbour is refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub color: Color,
    /// Muted state
    pub muted: bool,
    /// Armed for recording
    pub armed: bool,
    regions: BTreeMap<u64, Region>,
    /// Instrument shared with history snapshots of this track
    #[serde(skip)]
    pub instrument: Option<Arc<Instrument>>,
    /// Region receiving recorded events
    #[serde(skip)]
    recording_region: Option<u64>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        let palette_idx = (id.0 as usize).saturating_sub(1) % TRACK_PALETTE.len();
        Self {
            id,
            name: name.into(),
            color: TRACK_PALETTE[palette_idx],
            muted: false,
            armed: false,
            regions: BTreeMap::new(),
            instrument: None,
            recording_region: None,
        }
    }

    pub fn set_instrument(&mut self, instrument: Option<Arc<Instrument>>) {
        self.instrument = instrument;
    }

    pub fn regions(&self) -> &BTreeMap<u64, Region> {
        &self.regions
    }

    pub fn get_region(&self, start: u64) -> Option<&Region> {
        self.regions.get(&start)
    }

    /// Direct access to a region. Growth through this handle is not checked
    /// against neighbours; prefer [`Track::add_event`].
    pub fn get_region_mut(&mut self, start: u64) -> Option<&mut Region> {
        self.regions.get_mut(&start)
    }

    /// Region whose span covers `step` (its end inclusive)
    pub fn region_at(&self, step: u64) -> Option<(u64, &Region)> {
        self.regions
            .range(..=step)
            .next_back()
            .filter(|(start, region)| step <= **start + region.length())
            .map(|(start, region)| (*start, region))
    }

    /// Start of a region intersecting `[start, start + length)`, ignoring `skip`
    fn find_overlap(&self, start: u64, length: u64, skip: Option<u64>) -> Option<u64> {
        let end = start + length;
        self.regions
            .iter()
            .filter(|(s, _)| Some(**s) != skip)
            .find(|(s, r)| **s < end && start < **s + r.length())
            .map(|(s, _)| *s)
    }

    pub fn add_region(&mut self, start: u64, region: Region) -> Result<()> {
        if let Some(existing) = self.find_overlap(start, region.length(), None) {
            return Err(StepseqError::RegionOverlap { start, existing });
        }
        self.regions.insert(start, region);
        Ok(())
    }

    pub fn remove_region(&mut self, start: u64) -> Option<Region> {
        if self.recording_region == Some(start) {
            self.recording_region = None;
        }
        self.regions.remove(&start)
    }

    pub fn move_region(&mut self, from: u64, to: u64) -> Result<()> {
        let Some(region) = self.regions.get(&from) else {
            return Err(StepseqError::RegionNotFound { track: self.id.0, start: from });
        };
        if let Some(existing) = self.find_overlap(to, region.length(), Some(from)) {
            return Err(StepseqError::RegionOverlap { start: to, existing });
        }
        if let Some(region) = self.regions.remove(&from) {
            self.regions.insert(to, region);
        }
        if self.recording_region == Some(from) {
            self.recording_region = Some(to);
        }
        Ok(())
    }

    /// Create a one-bar region at the bar containing `offset_hint` and make it
    /// the recording target. Returns `None` if a region already occupies that
    /// bar; a region covering the bar start becomes the recording target.
    pub fn start_new_region(&mut self, offset_hint: u64) -> Option<u64> {
        let bar = bar_floor(offset_hint);
        if self.find_overlap(bar, STEPS_PER_BAR, None).is_some() {
            if let Some((start, region)) = self.region_at(bar) {
                if bar < start + region.length() {
                    self.recording_region = Some(start);
                }
            }
            return None;
        }
        let name = format!("{} {}", self.name, self.regions.len() + 1);
        self.regions.insert(bar, Region::new(name));
        self.recording_region = Some(bar);
        Some(bar)
    }

    pub fn recording_region(&self) -> Option<u64> {
        self.recording_region
    }

    /// Forget the recording target; the next recorded event picks a new one
    pub fn finish_recording(&mut self) {
        self.recording_region = None;
    }

    /// Whether the region at `start` could grow to hold an event at `offset`
    fn can_grow(&self, start: u64, offset: u64) -> bool {
        let Some(region) = self.regions.get(&start) else {
            return false;
        };
        let new_end = start + region.length_with(offset);
        self.regions
            .range(start + 1..)
            .next()
            .is_none_or(|(next, _)| *next >= new_end)
    }

    fn recording_target(&mut self, time: u64) -> Option<u64> {
        if let Some(start) = self.recording_region {
            if time >= start && self.can_grow(start, time - start) {
                return Some(start);
            }
        }
        if let Some((start, _)) = self.region_at(time) {
            self.recording_region = Some(start);
            return Some(start);
        }

        let prev_end = self
            .regions
            .range(..=time)
            .next_back()
            .map_or(0, |(s, r)| s + r.length());
        let start = bar_floor(time).max(prev_end);
        if let Some(existing) = self.find_overlap(start, STEPS_PER_BAR, None) {
            warn!(track = %self.id, time, existing, "No room for a new recording region");
            return None;
        }
        let name = format!("{} {}", self.name, self.regions.len() + 1);
        self.regions.insert(start, Region::new(name));
        self.recording_region = Some(start);
        Some(start)
    }

    /// Record a note at absolute `time`, creating a region if none covers it.
    /// Returns the start of the region that received the event.
    pub fn record_midi_event(&mut self, time: u64, note: u8, on: bool, velocity: u8) -> Option<u64> {
        let start = self.recording_target(time)?;
        let channel = self.instrument.as_ref().map_or(0, |i| i.midi_channel());
        let region = self.regions.get_mut(&start)?;
        region.add_midi_event(time - start, MidiEvent::note(channel, note, on, velocity));
        Some(start)
    }

    /// Add a note to an existing region, refusing growth into the next region
    pub fn add_event(&mut self, region_start: u64, offset: u64, note: u8, on: bool, velocity: u8) -> Result<()> {
        self.ensure_room(region_start, offset)?;
        if let Some(region) = self.regions.get_mut(&region_start) {
            region.add_event(offset, note, on, velocity);
        }
        Ok(())
    }

    pub fn remove_event(&mut self, region_start: u64, offset: u64, note: u8) -> Result<Option<MidiEvent>> {
        let track = self.id.0;
        let region = self
            .regions
            .get_mut(&region_start)
            .ok_or(StepseqError::RegionNotFound { track, start: region_start })?;
        Ok(region.remove_event(offset, note))
    }

    /// Move an event within a region. Returns false if the event wasn't found.
    pub fn move_event(&mut self, region_start: u64, event: &MidiEvent, from: u64, to: u64) -> Result<bool> {
        self.ensure_room(region_start, to)?;
        Ok(self
            .regions
            .get_mut(&region_start)
            .is_some_and(|region| region.move_event(event, from, to)))
    }

    fn ensure_room(&self, region_start: u64, offset: u64) -> Result<()> {
        if !self.regions.contains_key(&region_start) {
            return Err(StepseqError::RegionNotFound { track: self.id.0, start: region_start });
        }
        if !self.can_grow(region_start, offset) {
            let existing = self
                .regions
                .range(region_start + 1..)
                .next()
                .map_or(region_start, |(s, _)| *s);
            return Err(StepseqError::RegionOverlap { start: region_start, existing });
        }
        Ok(())
    }

    /// End of the last region in steps
    pub fn end_step(&self) -> u64 {
        self.regions
            .iter()
            .map(|(start, region)| start + region.length())
            .max()
            .unwrap_or(0)
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
    }

    pub fn toggle_armed(&mut self) {
        self.armed = !self.armed;
    }
}
