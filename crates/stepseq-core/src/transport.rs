//! Transport state and musical clock

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StepseqError};
use crate::region::{STEPS_PER_BAR, STEPS_PER_BEAT};

pub const MIN_BPM: u32 = 10;
pub const MAX_BPM: u32 = 300;
pub const DEFAULT_BPM: u32 = 120;

/// Transport playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
}

/// Play/record flags, cursor and tempo.
///
/// The cursor is kept with sub-step precision so that consecutive `advance`
/// calls partition time without drift; `cursor()` reports whole steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transport {
    playing: bool,
    recording: bool,
    position: f64,
    bpm: u32,
    /// Set by `stop_playing`, consumed by the audio callback
    #[serde(skip)]
    silence_requested: bool,
    #[serde(skip)]
    last_update: Option<Instant>,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            playing: false,
            recording: false,
            position: 0.0,
            bpm: DEFAULT_BPM,
            silence_requested: false,
            last_update: None,
        }
    }
}

impl Transport {
    pub fn new(bpm: u32) -> Self {
        Self {
            bpm: bpm.clamp(MIN_BPM, MAX_BPM),
            ..Default::default()
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: u32) -> Result<()> {
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(StepseqError::InvalidTempo(bpm));
        }
        self.bpm = bpm;
        Ok(())
    }

    /// `steps = (ms / 1000) / (60 / bpm) * 4000`
    pub fn ms_to_steps(&self, ms: f64) -> f64 {
        (ms / 1000.0) / (60.0 / self.bpm as f64) * STEPS_PER_BAR as f64
    }

    /// `ms = (steps / 4000) * (60 / bpm) * 1000`
    pub fn steps_to_ms(&self, steps: f64) -> f64 {
        (steps / STEPS_PER_BAR as f64) * (60.0 / self.bpm as f64) * 1000.0
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn state(&self) -> TransportState {
        match (self.playing, self.recording) {
            (true, true) => TransportState::Recording,
            (true, false) => TransportState::Playing,
            _ => TransportState::Stopped,
        }
    }

    /// Cursor in whole steps
    pub fn cursor(&self) -> u64 {
        self.position as u64
    }

    /// Move the cursor forward by `diff_ms` if playing
    pub fn advance(&mut self, diff_ms: f64) {
        self.last_update = Some(Instant::now());
        if !self.playing || diff_ms <= 0.0 {
            return;
        }
        self.position += self.ms_to_steps(diff_ms);
    }

    /// Cursor extrapolated from the last advance, for display between callbacks
    pub fn display_cursor(&self, now: Instant) -> u64 {
        let Some(last) = self.last_update.filter(|_| self.playing) else {
            return self.cursor();
        };
        let elapsed_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
        (self.position + self.ms_to_steps(elapsed_ms)) as u64
    }

    pub fn start_playing(&mut self) {
        self.playing = true;
    }

    /// Stop without moving the cursor
    pub fn pause(&mut self) {
        self.playing = false;
        self.recording = false;
    }

    pub fn toggle_playing(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.start_playing();
        }
    }

    /// Stop, rewind to 0 and request silencing of all sounding notes
    pub fn stop_playing(&mut self) {
        self.playing = false;
        self.recording = false;
        self.position = 0.0;
        self.silence_requested = true;
    }

    pub fn start_recording(&mut self) {
        self.recording = true;
        self.start_playing();
    }

    /// Stop recording; playback continues
    pub fn stop_recording(&mut self) {
        self.recording = false;
    }

    pub fn set_cursor_at_step(&mut self, step: u64) {
        self.position = step as f64;
    }

    /// Returns true once after each `stop_playing`
    pub fn take_silence_request(&mut self) -> bool {
        std::mem::take(&mut self.silence_requested)
    }

    /// Position as "bar.beat.step" (1-based bar and beat)
    pub fn format_position(&self) -> String {
        let cursor = self.cursor();
        let bar = cursor / STEPS_PER_BAR + 1;
        let beat = cursor % STEPS_PER_BAR / STEPS_PER_BEAT + 1;
        let step = cursor % STEPS_PER_BEAT;
        format!("{}.{}.{:03}", bar, beat, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_round_trip() {
        for bpm in [60, 120, 180] {
            let t = Transport::new(bpm);
            for ms in [0.0, 125.0, 1000.0, 5000.0] {
                let back = t.steps_to_ms(t.ms_to_steps(ms));
                assert!((back - ms).abs() < 1e-6, "bpm={} ms={} back={}", bpm, ms, back);
            }
        }
    }

    #[test]
    fn test_conversion_values() {
        let t = Transport::new(60);
        assert_eq!(t.ms_to_steps(1000.0), 4000.0);
        let t = Transport::new(120);
        assert_eq!(t.steps_to_ms(4000.0), 500.0);
    }

    #[test]
    fn test_advance_only_while_playing() {
        let mut t = Transport::new(120);
        t.advance(500.0);
        assert_eq!(t.cursor(), 0);

        t.start_playing();
        t.advance(500.0);
        assert_eq!(t.cursor(), 4000);

        t.pause();
        t.advance(500.0);
        assert_eq!(t.cursor(), 4000);
    }

    #[test]
    fn test_advance_does_not_drift() {
        let mut t = Transport::new(120);
        t.start_playing();
        // 512-frame buffers at 44.1 kHz are not a whole number of steps
        let diff_ms = 512.0 * 1000.0 / 44_100.0;
        let mut last = t.cursor();
        for _ in 0..1000 {
            t.advance(diff_ms);
            assert!(t.cursor() >= last);
            last = t.cursor();
        }
        let expected = t.ms_to_steps(diff_ms * 1000.0);
        assert!((t.cursor() as f64 - expected).abs() <= 1.0);
    }

    #[test]
    fn test_state_machine() {
        let mut t = Transport::default();
        assert_eq!(t.state(), TransportState::Stopped);

        t.start_recording();
        assert_eq!(t.state(), TransportState::Recording);
        assert!(t.is_playing());

        t.stop_recording();
        assert_eq!(t.state(), TransportState::Playing);

        t.start_recording();
        t.advance(100.0);
        t.stop_playing();
        assert_eq!(t.state(), TransportState::Stopped);
        assert_eq!(t.cursor(), 0);
        assert!(t.take_silence_request());
        assert!(!t.take_silence_request());
    }

    #[test]
    fn test_toggle_keeps_cursor() {
        let mut t = Transport::new(120);
        t.set_cursor_at_step(2500);
        t.toggle_playing();
        assert!(t.is_playing());
        t.toggle_playing();
        assert!(!t.is_playing());
        assert_eq!(t.cursor(), 2500);
        assert!(!t.take_silence_request());
    }

    #[test]
    fn test_set_bpm_range() {
        let mut t = Transport::default();
        assert!(t.set_bpm(90).is_ok());
        assert_eq!(t.bpm(), 90);
        assert_eq!(t.set_bpm(5), Err(StepseqError::InvalidTempo(5)));
        assert_eq!(t.set_bpm(301), Err(StepseqError::InvalidTempo(301)));
        assert_eq!(t.bpm(), 90);
    }

    #[test]
    fn test_format_position() {
        let mut t = Transport::default();
        t.set_cursor_at_step(5250);
        assert_eq!(t.format_position(), "2.2.250");
    }

    #[test]
    fn test_saved_transport_has_no_pending_silence() {
        let mut t = Transport::new(140);
        t.set_cursor_at_step(3000);
        t.stop_playing();
        let text = toml::to_string(&t).unwrap();
        assert!(!text.contains("silence"));

        let mut loaded: Transport = toml::from_str(&text).unwrap();
        assert_eq!(loaded.bpm(), 140);
        assert!(!loaded.take_silence_request());
    }
}
