//! Polyphonic sine synthesizer

use stepseq_core::{ALL_NOTES_OFF, MidiEvent, MidiEventKind, MidiEventQueue, Plugin, PluginOutput};

/// "All Sound Off" controller: silence immediately, skipping release
const ALL_SOUND_OFF: u8 = 120;

const MAX_VOICES: usize = 16;
const BLOCK_SIZE: usize = 256;
const CHANNELS: usize = 2;

/// State for a single voice
#[derive(Debug, Clone)]
struct SineVoice {
    note: u8,
    active: bool,
    releasing: bool,
    age: usize,
    phase: f64,
    env: f64,
    velocity: f32,
}

impl SineVoice {
    fn new() -> Self {
        Self {
            note: 0,
            active: false,
            releasing: false,
            age: 0,
            phase: 0.0,
            env: 0.0,
            velocity: 0.0,
        }
    }

    fn trigger(&mut self, note: u8, velocity: u8) {
        self.note = note;
        self.active = true;
        self.releasing = false;
        self.age = 0;
        self.phase = 0.0;
        self.env = 0.0;
        self.velocity = velocity as f32 / 127.0;
    }

    fn tick(&mut self, sample_rate: f32, attack_secs: f64, release_secs: f64) -> f32 {
        if !self.active {
            return 0.0;
        }
        self.age += 1;
        let dt = 1.0 / sample_rate as f64;

        if self.releasing {
            self.env *= (-dt / release_secs).exp();
            if self.env < 0.0001 {
                self.active = false;
                return 0.0;
            }
        } else if self.env < 1.0 {
            self.env = (self.env + dt / attack_secs).min(1.0);
        }

        let freq = 440.0 * 2f64.powf((self.note as f64 - 69.0) / 12.0);
        self.phase = (self.phase + freq * dt).fract();
        let osc = (self.phase * std::f64::consts::TAU).sin();

        (osc * self.env) as f32 * self.velocity
    }
}

/// Simple polyphonic sine instrument with linear attack and exponential release
pub struct SineSynth {
    sample_rate: f32,
    voices: Vec<SineVoice>,
    events: MidiEventQueue,
    incoming: Vec<MidiEvent>,
    outputs: Vec<Vec<f32>>,
    gain: f32,
    attack_secs: f64,
    release_secs: f64,
}

impl std::fmt::Debug for SineSynth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SineSynth")
            .field("sample_rate", &self.sample_rate)
            .field("active_voices", &self.active_voices())
            .finish()
    }
}

impl SineSynth {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            voices: (0..MAX_VOICES).map(|_| SineVoice::new()).collect(),
            events: MidiEventQueue::default(),
            incoming: Vec::with_capacity(256),
            outputs: vec![vec![0.0; BLOCK_SIZE]; CHANNELS],
            gain: 0.3,
            attack_secs: 0.005,
            release_secs: 0.08,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        // Retrigger same note, else a free voice, else steal the oldest
        let idx = self
            .voices
            .iter()
            .position(|v| v.active && v.note == note)
            .or_else(|| self.voices.iter().position(|v| !v.active))
            .unwrap_or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, v)| v.age)
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            });
        self.voices[idx].trigger(note, velocity);
    }

    fn note_off(&mut self, note: u8) {
        for voice in self.voices.iter_mut().filter(|v| v.active && v.note == note) {
            voice.releasing = true;
        }
    }

    fn handle(&mut self, event: MidiEvent) {
        match event.kind {
            MidiEventKind::Note if event.value != 0 => self.note_on(event.number, event.value),
            MidiEventKind::Note => self.note_off(event.number),
            MidiEventKind::Controller if event.number == ALL_NOTES_OFF => {
                for voice in &mut self.voices {
                    voice.releasing = true;
                }
            }
            MidiEventKind::Controller if event.number == ALL_SOUND_OFF => {
                for voice in &mut self.voices {
                    voice.active = false;
                }
            }
            _ => {}
        }
    }
}

impl Plugin for SineSynth {
    fn name(&self) -> &str {
        "Sine Synth"
    }

    fn events(&self) -> &MidiEventQueue {
        &self.events
    }

    fn process_events(&mut self) {
        let mut incoming = std::mem::take(&mut self.incoming);
        self.events.drain_into(&mut incoming);
        for event in incoming.drain(..) {
            self.handle(event);
        }
        self.incoming = incoming;
    }

    fn process_audio(&mut self, requested_frames: usize) -> PluginOutput<'_> {
        let frames = requested_frames.min(BLOCK_SIZE);
        for frame_idx in 0..frames {
            let mut mix = 0.0f32;
            for voice in &mut self.voices {
                mix += voice.tick(self.sample_rate, self.attack_secs, self.release_secs);
            }
            let out = (mix * self.gain).tanh();
            for channel in &mut self.outputs {
                channel[frame_idx] = out;
            }
        }
        PluginOutput::new(&self.outputs, frames)
    }

    fn channel_count(&self) -> usize {
        CHANNELS
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        if (sample_rate - self.sample_rate).abs() < 1.0 {
            return;
        }
        self.sample_rate = sample_rate;
    }

    fn close(&mut self) {
        for voice in &mut self.voices {
            voice.active = false;
        }
    }

    fn save_state(&self) -> Vec<u8> {
        self.gain.to_le_bytes().to_vec()
    }

    fn load_state(&mut self, state: &[u8]) {
        let Ok(bytes) = <[u8; 4]>::try_from(state) else {
            tracing::warn!(len = state.len(), "Ignoring malformed Sine Synth state");
            return;
        };
        self.set_gain(f32::from_le_bytes(bytes));
    }
}
