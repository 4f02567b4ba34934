//! Audio engine: shared playback state and the output stream that renders it

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use stepseq_core::{Result as CoreResult, TrackId, TrackList, TracksManager, Transport};
use thiserror::Error;
use tracing::{debug, info};

use crate::audio_io::{AudioOutputError, RealtimeOutputStream};
use crate::clock_services::ClockListener;
use crate::render::RenderEngine;

#[derive(Debug, Error)]
pub enum AudioEngineError {
    #[error("Audio output error: {0}")]
    Output(#[from] AudioOutputError),
    #[error("Engine already running")]
    AlreadyRunning,
    #[error("Engine not running")]
    NotRunning,
}

/// Immutable view of the arrangement the audio thread plays from
#[derive(Debug, Clone, Default)]
pub struct PlaybackSnapshot {
    pub tracks: TrackList,
    pub solo: TrackId,
}

impl PlaybackSnapshot {
    pub fn from_tracks(tracks: &TracksManager) -> Self {
        Self {
            tracks: tracks.snapshot(),
            solo: tracks.solo_track(),
        }
    }
}

/// Audio engine state shared between UI and audio thread
pub struct EngineState {
    /// Play/record state and cursor, locked briefly once per callback
    pub transport: Mutex<Transport>,
    /// Latest published arrangement, swapped in by the UI after each edit
    timeline: ArcSwap<PlaybackSnapshot>,
    /// Device sample rate, 0 until a stream has been started
    sample_rate: AtomicU32,
}

impl EngineState {
    pub fn new(bpm: u32) -> Self {
        Self {
            transport: Mutex::new(Transport::new(bpm)),
            timeline: ArcSwap::from_pointee(PlaybackSnapshot::default()),
            sample_rate: AtomicU32::new(0),
        }
    }

    pub fn transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the transport locked
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut Transport) -> R) -> R {
        f(&mut self.transport())
    }

    /// Make the current track collection visible to the audio thread
    pub fn publish(&self, tracks: &TracksManager) {
        let snapshot = PlaybackSnapshot::from_tracks(tracks);
        debug!(tracks = snapshot.tracks.len(), solo = %snapshot.solo, "Publishing arrangement");
        self.timeline.store(Arc::new(snapshot));
    }

    /// Current published arrangement
    pub fn playback(&self) -> Arc<PlaybackSnapshot> {
        self.timeline.load_full()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }
}

/// Audio engine for sequencer playback
pub struct AudioEngine {
    state: Arc<EngineState>,
    stream: Option<RealtimeOutputStream>,
}

impl AudioEngine {
    pub fn new(bpm: u32) -> Self {
        Self {
            state: Arc::new(EngineState::new(bpm)),
            stream: None,
        }
    }

    /// Get shared state for UI access
    pub fn state(&self) -> Arc<EngineState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the default output device and start rendering. Listeners are
    /// moved to the audio thread and ticked once per callback.
    pub fn start(&mut self, listeners: Vec<Box<dyn ClockListener>>) -> Result<(), AudioEngineError> {
        if self.stream.is_some() {
            return Err(AudioEngineError::AlreadyRunning);
        }

        let mut engine = RenderEngine::new(self.state.clone(), listeners);
        let stream = RealtimeOutputStream::start(move |buffer, sample_rate, channels| {
            engine.render(buffer, sample_rate, channels);
        })?;

        self.state.set_sample_rate(stream.sample_rate());
        self.stream = Some(stream);
        info!("Audio engine started");
        Ok(())
    }

    /// Stop the audio engine
    pub fn stop(&mut self) -> Result<(), AudioEngineError> {
        let stream = self.stream.take().ok_or(AudioEngineError::NotRunning)?;
        stream.stop();
        self.state.transport().pause();
        info!("Audio engine stopped");
        Ok(())
    }

    pub fn toggle_playing(&self) {
        self.state.transport().toggle_playing();
    }

    /// Stop and rewind; sounding notes are silenced on the next callback
    pub fn stop_playback(&self) {
        self.state.transport().stop_playing();
    }

    pub fn start_recording(&self) {
        self.state.transport().start_recording();
    }

    pub fn stop_recording(&self) {
        self.state.transport().stop_recording();
    }

    pub fn set_cursor_at_step(&self, step: u64) {
        self.state.transport().set_cursor_at_step(step);
    }

    pub fn set_bpm(&self, bpm: u32) -> CoreResult<()> {
        self.state.transport().set_bpm(bpm)
    }

    pub fn cursor(&self) -> u64 {
        self.state.transport().cursor()
    }

    pub fn is_playing(&self) -> bool {
        self.state.transport().is_playing()
    }

    pub fn publish(&self, tracks: &TracksManager) {
        self.state.publish(tracks);
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.sample_rate()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
    }
}
