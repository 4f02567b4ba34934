//! stepseq-core: Timeline model, transport and undo history for the stepseq sequencer

mod error;
pub mod event;
pub mod history;
mod instrument;
pub mod plugin;
pub mod region;
mod track;
pub mod tracks_manager;
pub mod transport;

pub use error::{Result, StepseqError};
pub use event::{MidiEvent, MidiEventKind, ALL_NOTES_OFF};
pub use history::{HistoryEntry, HistoryManager, DEFAULT_MAX_HISTORY};
pub use instrument::{Instrument, PluginSlot};
pub use plugin::{MidiEventQueue, Plugin, PluginOutput};
pub use region::{Region, STEPS_PER_BAR, STEPS_PER_BEAT};
pub use track::{Color, Track, TrackId, TRACK_PALETTE};
pub use tracks_manager::{dispatch_events, RegionRef, TrackList, TracksManager};
pub use transport::{Transport, TransportState, DEFAULT_BPM, MAX_BPM, MIN_BPM};
