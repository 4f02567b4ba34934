//! Real-time render callback: advance the clock, dispatch due events, mix plugins

use std::sync::Arc;

use stepseq_core::{Plugin, Track, TrackId, dispatch_events};
use tracing::trace;

use crate::audio_engine::EngineState;
use crate::clock_services::{ClockListener, ClockTick};

/// Owned by the audio thread; called once per device buffer
pub struct RenderEngine {
    state: Arc<EngineState>,
    listeners: Vec<Box<dyn ClockListener>>,
}

impl RenderEngine {
    pub fn new(state: Arc<EngineState>, listeners: Vec<Box<dyn ClockListener>>) -> Self {
        Self { state, listeners }
    }

    pub fn add_listener(&mut self, listener: Box<dyn ClockListener>) {
        self.listeners.push(listener);
    }

    /// Fill `buffer` (interleaved, `channels` wide) with the next slice of audio.
    /// Never fails: anything that cannot play this callback is skipped.
    pub fn render(&mut self, buffer: &mut [f32], sample_rate: u32, channels: u16) {
        buffer.fill(0.0);
        if channels == 0 || sample_rate == 0 {
            return;
        }
        let channels = channels as usize;
        let frames = buffer.len() / channels;
        let diff_ms = frames as f64 * 1000.0 / sample_rate as f64;

        let (silence, start, end, playing, bpm) = {
            let mut transport = self.state.transport();
            let silence = transport.take_silence_request();
            let start = transport.cursor();
            transport.advance(diff_ms);
            (silence, start, transport.cursor(), transport.is_playing(), transport.bpm())
        };

        let snapshot = self.state.playback();

        if silence {
            for instrument in snapshot.tracks.iter().filter_map(|t| t.instrument.as_ref()) {
                instrument.all_notes_off();
            }
        }
        if playing {
            let delivered = dispatch_events(&snapshot.tracks, start, end);
            if delivered > 0 {
                trace!(start, end, delivered, "Dispatched events");
            }
        }

        let tick = ClockTick { diff_ms, bpm, playing };
        for listener in &mut self.listeners {
            listener.tick(&tick);
        }

        for track in snapshot.tracks.iter() {
            render_track(track, snapshot.solo, buffer, frames, channels, sample_rate);
        }
    }
}

fn is_audible(track: &Track, solo: TrackId) -> bool {
    !track.muted && (solo.is_null() || solo == track.id)
}

fn render_track(track: &Track, solo: TrackId, buffer: &mut [f32], frames: usize, channels: usize, sample_rate: u32) {
    let Some(instrument) = &track.instrument else {
        return;
    };
    let mut slot = instrument.lock();
    let Some(plugin) = slot.as_deref_mut() else {
        return;
    };

    plugin.set_sample_rate(sample_rate as f32);
    plugin.process_events();
    if is_audible(track, solo) {
        mix_plugin(plugin, buffer, frames, channels);
    } else {
        // Muted plugins keep running so note-offs and release tails play out
        // silently instead of resuming mid-note on unmute.
        pull_blocks(plugin, frames, |_, _, _| {});
    }
}

/// Call `process_audio` until `frames` have been produced or the plugin
/// returns nothing. `sink` gets `(channels, frames_before, produced)`.
fn pull_blocks(plugin: &mut dyn Plugin, frames: usize, mut sink: impl FnMut(&[Vec<f32>], usize, usize)) {
    let mut written = 0;
    while written < frames {
        let output = plugin.process_audio(frames - written);
        let produced = output.frames.min(frames - written);
        if produced == 0 || output.channels.is_empty() {
            break;
        }
        sink(output.channels, written, produced);
        written += produced;
    }
}

/// Sum plugin output into the interleaved `buffer`.
/// Destination channel `c` reads source channel `c % source_channels`.
fn mix_plugin(plugin: &mut dyn Plugin, buffer: &mut [f32], frames: usize, channels: usize) {
    pull_blocks(plugin, frames, |sources, written, produced| {
        for c in 0..channels {
            let source = &sources[c % sources.len()];
            for (i, sample) in source.iter().take(produced).enumerate() {
                buffer[(written + i) * channels + c] += sample;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    use stepseq_core::{ALL_NOTES_OFF, Instrument, MidiEvent, Region, TracksManager};

    use crate::clock_services::test_support::ProbePlugin;

    type Log = Arc<Mutex<Vec<MidiEvent>>>;

    fn logged(log: &Log) -> Vec<MidiEvent> {
        std::mem::take(&mut *log.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn probe_track(tracks: &mut TracksManager, name: &str, levels: &[f32], block: usize) -> (TrackId, Log) {
        let (plugin, log) = ProbePlugin::new(levels, block);
        let id = tracks.add_track_with_instrument(name, Instrument::with_plugin(name, 0, Box::new(plugin)));
        (id, log)
    }

    fn engine(tracks: &TracksManager) -> RenderEngine {
        let state = Arc::new(EngineState::new(120));
        state.publish(tracks);
        RenderEngine::new(state, Vec::new())
    }

    #[test]
    fn test_solo_beats_other_tracks() {
        let mut tracks = TracksManager::new();
        let (one, _) = probe_track(&mut tracks, "one", &[0.25], 64);
        probe_track(&mut tracks, "two", &[0.5], 64);
        tracks.set_solo_track(one);

        let mut engine = engine(&tracks);
        let mut buffer = vec![1.0; 32];
        engine.render(&mut buffer, 48_000, 2);
        assert!(buffer.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_mute_and_sum() {
        let mut tracks = TracksManager::new();
        probe_track(&mut tracks, "one", &[0.25], 64);
        let (two, _) = probe_track(&mut tracks, "two", &[0.5], 64);
        let (three, _) = probe_track(&mut tracks, "three", &[0.125], 64);
        if let Ok(t) = tracks.get_track_mut(three) {
            t.toggle_mute();
        }

        let mut engine = engine(&tracks);
        let mut buffer = vec![0.0; 16];
        engine.render(&mut buffer, 48_000, 1);
        assert!(buffer.iter().all(|&s| s == 0.75));

        if let Ok(t) = tracks.get_track_mut(two) {
            t.toggle_mute();
        }
        engine.state.publish(&tracks);
        engine.render(&mut buffer, 48_000, 1);
        assert!(buffer.iter().all(|&s| s == 0.25));
    }

    /// Silent plugin that counts the frames it has been asked to render
    struct FrameCounter {
        queue: stepseq_core::MidiEventQueue,
        outputs: Vec<Vec<f32>>,
        rendered: Arc<AtomicUsize>,
    }

    impl Plugin for FrameCounter {
        fn name(&self) -> &str {
            "frame-counter"
        }
        fn events(&self) -> &stepseq_core::MidiEventQueue {
            &self.queue
        }
        fn process_events(&mut self) {}
        fn process_audio(&mut self, requested_frames: usize) -> stepseq_core::PluginOutput<'_> {
            let frames = requested_frames.min(16);
            self.rendered.fetch_add(frames, Ordering::SeqCst);
            stepseq_core::PluginOutput::new(&self.outputs, frames)
        }
        fn channel_count(&self) -> usize {
            1
        }
        fn block_size(&self) -> usize {
            16
        }
    }

    #[test]
    fn test_muted_plugin_keeps_rendering_silently() {
        let rendered = Arc::new(AtomicUsize::new(0));
        let plugin = FrameCounter {
            queue: Default::default(),
            outputs: vec![vec![1.0; 16]],
            rendered: rendered.clone(),
        };
        let mut tracks = TracksManager::new();
        let id = tracks.add_track_with_instrument("muted", Instrument::with_plugin("muted", 0, Box::new(plugin)));
        if let Ok(t) = tracks.get_track_mut(id) {
            t.toggle_mute();
        }

        let mut engine = engine(&tracks);
        let mut buffer = vec![0.0; 2 * 40];
        engine.render(&mut buffer, 48_000, 2);
        assert!(buffer.iter().all(|&s| s == 0.0));
        assert_eq!(rendered.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn test_channel_mapping_wraps_source_channels() {
        let mut tracks = TracksManager::new();
        probe_track(&mut tracks, "stereo", &[0.1, 0.2], 64);

        let mut engine = engine(&tracks);
        let mut buffer = vec![0.0; 4 * 8];
        engine.render(&mut buffer, 48_000, 4);
        for frame in buffer.chunks(4) {
            assert_eq!(frame, &[0.1, 0.2, 0.1, 0.2]);
        }
    }

    #[test]
    fn test_pulls_multiple_blocks() {
        let mut tracks = TracksManager::new();
        probe_track(&mut tracks, "small", &[0.5], 3);

        let mut engine = engine(&tracks);
        let mut buffer = vec![0.0; 10];
        engine.render(&mut buffer, 48_000, 1);
        assert!(buffer.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_dispatch_only_while_playing() {
        let mut tracks = TracksManager::new();
        let (id, log) = probe_track(&mut tracks, "keys", &[0.0], 64);
        let mut region = Region::new("clip");
        region.add_event(0, 60, true, 100);
        region.add_event(1000, 60, false, 0);
        assert!(tracks.get_track_mut(id).and_then(|t| t.add_region(0, region)).is_ok());

        let mut engine = engine(&tracks);
        // 48 frames at 48 kHz = 1 ms = 8 steps at 120 bpm
        let mut buffer = vec![0.0; 48];
        engine.render(&mut buffer, 48_000, 1);
        assert!(logged(&log).is_empty());

        engine.state.transport().start_playing();
        engine.render(&mut buffer, 48_000, 1);
        let events = logged(&log);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_note_on());
        assert_eq!(engine.state.transport().cursor(), 8);
    }

    #[test]
    fn test_stop_broadcasts_all_notes_off() {
        let mut tracks = TracksManager::new();
        let (_, log) = probe_track(&mut tracks, "keys", &[0.0], 64);

        let mut engine = engine(&tracks);
        engine.state.transport().start_playing();
        engine.state.transport().set_cursor_at_step(5000);
        engine.state.transport().stop_playing();

        let mut buffer = vec![0.0; 48];
        engine.render(&mut buffer, 48_000, 1);
        let events = logged(&log);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].number, ALL_NOTES_OFF);
        assert_eq!(engine.state.transport().cursor(), 0);

        engine.render(&mut buffer, 48_000, 1);
        assert!(logged(&log).is_empty());
    }

    struct CountingListener(Arc<Mutex<Vec<ClockTick>>>);

    impl ClockListener for CountingListener {
        fn name(&self) -> &str {
            "counter"
        }
        fn tick(&mut self, tick: &ClockTick) {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).push(*tick);
        }
    }

    #[test]
    fn test_listeners_get_callback_duration() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine(&TracksManager::new());
        engine.add_listener(Box::new(CountingListener(ticks.clone())));

        let mut buffer = vec![0.0; 2 * 441];
        engine.render(&mut buffer, 44_100, 2);
        let ticks = ticks.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(ticks.len(), 1);
        assert!((ticks[0].diff_ms - 10.0).abs() < 1e-9);
        assert_eq!(ticks[0].bpm, 120);
        assert!(!ticks[0].playing);
    }

    #[test]
    fn test_zero_channels_is_silent() {
        let mut engine = engine(&TracksManager::new());
        let mut buffer = vec![1.0; 8];
        engine.render(&mut buffer, 48_000, 0);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }
}
