//! Application context: owns the editable arrangement and its history, and
//! publishes every committed change to the audio thread.

use std::sync::Arc;
use std::time::Instant;

use stepseq_core::{
    DEFAULT_MAX_HISTORY, HistoryManager, Instrument, Result, TrackId, TracksManager, TransportState,
};
use tracing::{debug, info, warn};

use crate::audio_engine::EngineState;
use crate::clock_services::{ArpeggiatorHandle, PreviewHandle};

const DEFAULT_PREVIEW_MS: f64 = 250.0;

pub struct Session {
    tracks: TracksManager,
    history: HistoryManager,
    engine: Arc<EngineState>,
    preview: Option<PreviewHandle>,
    preview_duration_ms: f64,
    arpeggiator: Option<ArpeggiatorHandle>,
    /// Notes captured since recording started
    recorded: usize,
}

impl Session {
    pub fn new(engine: Arc<EngineState>) -> Self {
        Self::with_history_limit(engine, DEFAULT_MAX_HISTORY)
    }

    pub fn with_history_limit(engine: Arc<EngineState>, history_limit: usize) -> Self {
        let tracks = TracksManager::new();
        let history = HistoryManager::with_capacity(&tracks, history_limit);
        engine.publish(&tracks);
        Self {
            tracks,
            history,
            engine,
            preview: None,
            preview_duration_ms: DEFAULT_PREVIEW_MS,
            arpeggiator: None,
            recorded: 0,
        }
    }

    pub fn with_preview(mut self, handle: PreviewHandle, duration_ms: f64) -> Self {
        self.preview = Some(handle);
        self.preview_duration_ms = duration_ms;
        self
    }

    pub fn with_arpeggiator(mut self, handle: ArpeggiatorHandle) -> Self {
        self.arpeggiator = Some(handle);
        self.retarget_arpeggiator();
        self
    }

    pub fn tracks(&self) -> &TracksManager {
        &self.tracks
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn engine(&self) -> &Arc<EngineState> {
        &self.engine
    }

    pub fn arpeggiator(&self) -> Option<&ArpeggiatorHandle> {
        self.arpeggiator.as_ref()
    }

    fn publish(&self) {
        self.engine.publish(&self.tracks);
    }

    fn commit(&mut self, title: &str) {
        self.history.add_entry(title, &self.tracks);
        self.publish();
    }

    /// Apply an undoable edit. On success a history entry named `title` is
    /// recorded and the result is published; on failure the arrangement is
    /// left as it was.
    pub fn edit<R>(&mut self, title: &str, f: impl FnOnce(&mut TracksManager) -> Result<R>) -> Result<R> {
        let before = self.tracks.snapshot();
        match f(&mut self.tracks) {
            Ok(value) => {
                debug!(title, "Edit committed");
                self.commit(title);
                Ok(value)
            }
            Err(e) => {
                warn!(title, error = %e, "Edit failed, rolling back");
                self.tracks.restore(before);
                Err(e)
            }
        }
    }

    pub fn add_track(&mut self, name: &str, instrument: Option<Instrument>) -> TrackId {
        let id = match instrument {
            Some(instrument) => self.tracks.add_track_with_instrument(name, instrument),
            None => self.tracks.add_track(name),
        };
        self.commit("Add track");
        id
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<()> {
        self.edit("Remove track", |tracks| tracks.remove_track(id).map(|_| ()))?;
        self.retarget_arpeggiator();
        Ok(())
    }

    pub fn has_undo(&self) -> bool {
        self.history.has_undo()
    }

    pub fn has_redo(&self) -> bool {
        self.history.has_redo()
    }

    /// Step back one entry. A take in progress is committed first so the
    /// undo reverts it rather than a step underneath it.
    pub fn undo(&mut self) -> bool {
        self.commit_pending_take();
        let Some(title) = self.history.undo_title().map(str::to_owned) else {
            return false;
        };
        if !self.history.undo(&mut self.tracks) {
            return false;
        }
        debug!(title = %title, "Undo");
        self.publish();
        self.retarget_arpeggiator();
        true
    }

    pub fn redo(&mut self) -> bool {
        self.commit_pending_take();
        if !self.history.redo(&mut self.tracks) {
            return false;
        }
        self.publish();
        self.retarget_arpeggiator();
        true
    }

    pub fn set_active_track(&mut self, id: TrackId) {
        self.tracks.set_active_track(id);
        self.retarget_arpeggiator();
    }

    pub fn set_solo_track(&mut self, id: TrackId) {
        self.tracks.set_solo_track(id);
        self.publish();
    }

    pub fn set_active_region(&mut self, track: TrackId, start: u64) -> bool {
        self.tracks.set_active_region(track, start)
    }

    fn active_instrument(&self) -> Option<Arc<Instrument>> {
        self.tracks.active_track_ref().and_then(|t| t.instrument.clone())
    }

    fn retarget_arpeggiator(&self) {
        if let Some(arp) = &self.arpeggiator {
            arp.set_target(self.active_instrument());
        }
    }

    // Transport surface

    pub fn transport_state(&self) -> TransportState {
        self.engine.transport().state()
    }

    pub fn cursor(&self) -> u64 {
        self.engine.transport().display_cursor(Instant::now())
    }

    pub fn position(&self) -> String {
        self.engine.transport().format_position()
    }

    pub fn toggle_playing(&mut self) {
        let was_recording = self.engine.transport().is_recording();
        self.engine.transport().toggle_playing();
        if was_recording {
            self.finish_recording();
        }
    }

    pub fn stop_playing(&mut self) {
        let was_recording = self.engine.transport().is_recording();
        self.engine.transport().stop_playing();
        if was_recording {
            self.finish_recording();
        }
    }

    pub fn start_recording(&mut self) {
        self.recorded = 0;
        self.engine.transport().start_recording();
        info!("Recording started");
    }

    pub fn stop_recording(&mut self) {
        self.engine.transport().stop_recording();
        self.finish_recording();
    }

    /// While recording, close the current take so history stays linear.
    /// Recording carries on into fresh regions afterwards.
    fn commit_pending_take(&mut self) {
        if self.engine.transport().is_recording() {
            self.finish_recording();
        }
    }

    fn finish_recording(&mut self) {
        self.tracks.finish_recording();
        info!(notes = self.recorded, "Recording finished");
        if std::mem::take(&mut self.recorded) > 0 {
            self.commit("Record");
        }
    }

    pub fn set_cursor_at_step(&self, step: u64) {
        self.engine.transport().set_cursor_at_step(step);
    }

    pub fn bpm(&self) -> u32 {
        self.engine.transport().bpm()
    }

    pub fn set_bpm(&self, bpm: u32) -> Result<()> {
        self.engine.transport().set_bpm(bpm)
    }

    // Live input

    /// Play a note on the active track's instrument. While recording the note
    /// is also captured at the cursor; captured notes become audible once
    /// recording stops.
    pub fn play_note(&mut self, note: u8, on: bool, velocity: u8) {
        if let Some(instrument) = self.active_instrument() {
            instrument.send_midi_note(note, on, velocity);
        }

        let (recording, time) = {
            let transport = self.engine.transport();
            (transport.is_recording(), transport.display_cursor(Instant::now()))
        };
        if recording && self.tracks.record_midi_event(time, note, on, velocity) > 0 {
            self.recorded += 1;
        }
    }

    /// Audition a note on the active instrument for the preview duration
    pub fn preview_note(&self, note: u8, velocity: u8) -> bool {
        let (Some(preview), Some(instrument)) = (&self.preview, self.active_instrument()) else {
            return false;
        };
        preview.preview(instrument, note, velocity, self.preview_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepseq_core::{Region, StepseqError};

    use crate::clock_services::{ClockListener, ClockTick, arpeggiator, note_preview};
    use crate::clock_services::test_support::{ProbePlugin, pending};

    fn session() -> Session {
        Session::new(Arc::new(EngineState::new(120)))
    }

    fn probe(name: &str) -> Instrument {
        let (plugin, _) = ProbePlugin::new(&[0.0], 64);
        Instrument::with_plugin(name, 0, Box::new(plugin))
    }

    #[test]
    fn test_edit_publishes_and_undoes() {
        let mut s = session();
        let id = s.add_track("Lead", None);
        assert_eq!(s.engine().playback().tracks.len(), 1);

        let added = s.edit("Add region", |t| t.get_track_mut(id)?.add_region(0, Region::new("A")));
        assert!(added.is_ok());
        assert_eq!(s.history().current_title(), "Add region");
        assert!(s.engine().playback().tracks[0].get_region(0).is_some());

        assert!(s.undo());
        assert!(s.engine().playback().tracks[0].get_region(0).is_none());
        assert!(s.redo());
        assert!(s.tracks().get_track(id).is_ok_and(|t| t.get_region(0).is_some()));
        assert!(!s.has_redo());
    }

    #[test]
    fn test_failed_edit_rolls_back() {
        let mut s = session();
        let id = s.add_track("Lead", None);
        let entries = s.history().len();

        let result = s.edit("Two regions", |t| {
            let track = t.get_track_mut(id)?;
            track.add_region(0, Region::new("A"))?;
            track.add_region(2000, Region::new("B"))
        });
        assert_eq!(result, Err(StepseqError::RegionOverlap { start: 2000, existing: 0 }));
        assert!(s.tracks().get_track(id).is_ok_and(|t| t.regions().is_empty()));
        assert_eq!(s.history().len(), entries);
    }

    #[test]
    fn test_remove_unknown_track() {
        let mut s = session();
        assert_eq!(s.remove_track(TrackId(42)), Err(StepseqError::TrackNotFound(42)));
        assert!(!s.has_undo());
    }

    #[test]
    fn test_solo_is_published() {
        let mut s = session();
        let id = s.add_track("Drums", None);
        s.set_solo_track(id);
        assert_eq!(s.engine().playback().solo, id);
        s.set_solo_track(TrackId::NULL);
        assert!(s.engine().playback().solo.is_null());
    }

    #[test]
    fn test_record_live_notes() {
        let mut s = session();
        let id = s.add_track("Keys", Some(probe("keys")));
        s.set_active_track(id);
        let inst = s.tracks().get_track(id).ok().and_then(|t| t.instrument.clone());
        let inst = inst.expect("instrument");

        s.set_cursor_at_step(4500);
        s.start_recording();
        s.play_note(60, true, 100);
        s.play_note(60, false, 0);

        // Live-thru reaches the plugin immediately
        assert_eq!(pending(&inst).len(), 2);
        // Not audible to the engine until recording stops
        assert!(s.engine().playback().tracks[0].regions().is_empty());

        s.stop_recording();
        assert_eq!(s.history().current_title(), "Record");
        let published = s.engine().playback();
        let region = published.tracks[0].get_region(4000).expect("recorded region");
        assert_eq!(region.event_count(), 2);
        assert_eq!(s.transport_state(), TransportState::Playing);

        assert!(s.undo());
        assert!(s.engine().playback().tracks[0].regions().is_empty());
    }

    #[test]
    fn test_undo_while_recording_reverts_the_take_only() {
        let mut s = session();
        let id = s.add_track("Keys", Some(probe("keys")));
        s.set_active_track(id);

        s.set_cursor_at_step(4500);
        s.start_recording();
        s.play_note(60, true, 100);
        assert!(s.undo());

        assert_eq!(s.history().current_title(), "Add track");
        assert_eq!(s.history().redo_title(), Some("Record"));
        assert!(s.tracks().get_track(id).is_ok_and(|t| t.regions().is_empty()));

        s.stop_recording();
        assert_eq!(
            s.history().titles().collect::<Vec<_>>(),
            vec!["Initial state", "Add track", "Record"]
        );
        assert!(s.has_redo());
        assert!(s.redo());
        assert!(s.tracks().get_track(id).is_ok_and(|t| t.get_region(4000).is_some()));
        assert_eq!(s.engine().playback().tracks.len(), 1);
    }

    #[test]
    fn test_stop_recording_without_notes_adds_no_entry() {
        let mut s = session();
        s.add_track("Keys", None);
        let entries = s.history().len();
        s.start_recording();
        s.stop_playing();
        assert_eq!(s.history().len(), entries);
        assert_eq!(s.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn test_preview_uses_active_instrument() {
        let (mut service, handle) = note_preview();
        let mut s = session().with_preview(handle, 100.0);
        assert!(!s.preview_note(60, 100));

        let id = s.add_track("Keys", Some(probe("keys")));
        s.set_active_track(id);
        assert!(s.preview_note(60, 100));

        service.tick(&ClockTick { diff_ms: 1.0, bpm: 120, playing: false });
        let inst = s.tracks().active_track_ref().and_then(|t| t.instrument.clone()).expect("instrument");
        let events = pending(&inst);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_note_on());
    }

    #[test]
    fn test_arpeggiator_follows_active_track() {
        let (mut arp, handle) = arpeggiator();
        let mut s = session().with_arpeggiator(handle);
        let id = s.add_track("Arp", Some(probe("arp")));
        s.set_active_track(id);

        let arp_handle = s.arpeggiator().expect("arpeggiator").clone();
        arp_handle.note_on(60, 90);
        arp.tick(&ClockTick { diff_ms: 1.0, bpm: 120, playing: true });

        let inst = s.tracks().active_track_ref().and_then(|t| t.instrument.clone()).expect("instrument");
        let events = pending(&inst);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].number, 60);
    }

    #[test]
    fn test_bpm_validation() {
        let s = session();
        assert_eq!(s.set_bpm(400), Err(StepseqError::InvalidTempo(400)));
        assert!(s.set_bpm(140).is_ok());
        assert_eq!(s.bpm(), 140);
    }
}
