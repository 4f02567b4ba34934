//! Arpeggiator service: cycles through held notes at a tempo-synced rate

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use stepseq_core::Instrument;
use stepseq_core::region::BEATS_PER_BAR;
use tracing::debug;

use super::{COMMAND_CAPACITY, ClockListener, ClockTick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArpMode {
    #[default]
    Up,
    Down,
    UpDown,
    Random,
}

enum ArpCommand {
    NoteOn(u8, u8),
    NoteOff(u8),
    SetTarget(Option<Arc<Instrument>>),
    SetMode(ArpMode),
    SetRate(u32),
    SetOctaves(u8),
    SetGate(f32),
}

/// UI side of the arpeggiator
#[derive(Clone)]
pub struct ArpeggiatorHandle {
    tx: Sender<ArpCommand>,
}

impl ArpeggiatorHandle {
    fn send(&self, command: ArpCommand) -> bool {
        self.tx.try_send(command).is_ok()
    }

    pub fn note_on(&self, note: u8, velocity: u8) -> bool {
        self.send(ArpCommand::NoteOn(note, velocity))
    }

    pub fn note_off(&self, note: u8) -> bool {
        self.send(ArpCommand::NoteOff(note))
    }

    /// Instrument receiving the arpeggiated notes; `None` disables output
    pub fn set_target(&self, instrument: Option<Arc<Instrument>>) -> bool {
        self.send(ArpCommand::SetTarget(instrument))
    }

    pub fn set_mode(&self, mode: ArpMode) -> bool {
        self.send(ArpCommand::SetMode(mode))
    }

    /// Notes per bar (4 = quarter notes, 16 = sixteenths)
    pub fn set_rate(&self, notes_per_bar: u32) -> bool {
        self.send(ArpCommand::SetRate(notes_per_bar))
    }

    pub fn set_octaves(&self, octaves: u8) -> bool {
        self.send(ArpCommand::SetOctaves(octaves))
    }

    /// Fraction of each step the note sounds (0.1 - 1.0)
    pub fn set_gate(&self, gate: f32) -> bool {
        self.send(ArpCommand::SetGate(gate))
    }
}

/// Audio side of the arpeggiator
pub struct Arpeggiator {
    rx: Receiver<ArpCommand>,
    target: Option<Arc<Instrument>>,
    mode: ArpMode,
    rate: u32,
    octaves: u8,
    gate: f32,
    held: Vec<u8>,
    velocity: u8,
    sequence: Vec<u8>,
    step_index: usize,
    elapsed_ms: f64,
    /// First note of a new phrase fires on the next tick
    restart: bool,
    sounding: Option<u8>,
    rng_state: u64,
}

/// Create a connected arpeggiator and handle
pub fn arpeggiator() -> (Arpeggiator, ArpeggiatorHandle) {
    let (tx, rx) = bounded(COMMAND_CAPACITY);
    let service = Arpeggiator {
        rx,
        target: None,
        mode: ArpMode::Up,
        rate: 8,
        octaves: 1,
        gate: 0.8,
        held: Vec::with_capacity(16),
        velocity: 100,
        sequence: Vec::with_capacity(64),
        step_index: 0,
        elapsed_ms: 0.0,
        restart: false,
        sounding: None,
        rng_state: 99999,
    };
    (service, ArpeggiatorHandle { tx })
}

impl Arpeggiator {
    pub fn mode(&self) -> ArpMode {
        self.mode
    }

    pub fn held_notes(&self) -> &[u8] {
        &self.held
    }

    fn next_random(&mut self) -> usize {
        self.rng_state = self.rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.rng_state >> 33) as usize
    }

    fn apply(&mut self, command: ArpCommand) {
        match command {
            ArpCommand::NoteOn(note, velocity) => {
                if self.held.is_empty() {
                    self.restart = true;
                    self.step_index = 0;
                }
                if !self.held.contains(&note) {
                    self.held.push(note);
                }
                self.velocity = velocity;
            }
            ArpCommand::NoteOff(note) => self.held.retain(|&n| n != note),
            ArpCommand::SetTarget(target) => {
                self.release();
                self.target = target;
            }
            ArpCommand::SetMode(mode) => self.mode = mode,
            ArpCommand::SetRate(rate) => self.rate = rate.clamp(1, 32),
            ArpCommand::SetOctaves(octaves) => self.octaves = octaves.clamp(1, 4),
            ArpCommand::SetGate(gate) => self.gate = gate.clamp(0.1, 1.0),
        }
    }

    fn rebuild_sequence(&mut self) {
        let mut sorted = self.held.clone();
        sorted.sort_unstable();

        self.sequence.clear();
        for oct in 0..self.octaves {
            for &note in &sorted {
                self.sequence.push((note as u16 + oct as u16 * 12).min(127) as u8);
            }
        }
        match self.mode {
            ArpMode::Down => self.sequence.reverse(),
            ArpMode::UpDown if self.sequence.len() > 2 => {
                let down: Vec<u8> = self.sequence[1..self.sequence.len() - 1].iter().rev().copied().collect();
                self.sequence.extend(down);
            }
            _ => {}
        }
    }

    fn release(&mut self) {
        let Some(note) = self.sounding.take() else { return };
        if let Some(target) = &self.target {
            target.send_midi_note(note, false, 0);
        }
    }

    fn fire(&mut self) {
        self.release();
        self.rebuild_sequence();
        if self.sequence.is_empty() {
            return;
        }
        let idx = match self.mode {
            ArpMode::Random => self.next_random() % self.sequence.len(),
            _ => self.step_index % self.sequence.len(),
        };
        self.step_index = self.step_index.wrapping_add(1);
        let note = self.sequence[idx];
        let Some(target) = &self.target else { return };
        if target.send_midi_note(note, true, self.velocity) {
            self.sounding = Some(note);
        }
    }
}

impl ClockListener for Arpeggiator {
    fn name(&self) -> &str {
        "arpeggiator"
    }

    fn tick(&mut self, tick: &ClockTick) {
        while let Ok(command) = self.rx.try_recv() {
            self.apply(command);
        }

        if self.held.is_empty() {
            self.release();
            self.elapsed_ms = 0.0;
            return;
        }
        if self.target.is_none() || tick.bpm == 0 {
            return;
        }

        let step_ms = 60_000.0 / tick.bpm as f64 * BEATS_PER_BAR as f64 / self.rate as f64;
        let gate_ms = step_ms * self.gate as f64;

        if self.restart {
            self.restart = false;
            self.elapsed_ms = 0.0;
            debug!(held = self.held.len(), "Arpeggiator started");
            self.fire();
            return;
        }

        self.elapsed_ms += tick.diff_ms;
        if self.sounding.is_some() && self.elapsed_ms >= gate_ms {
            self.release();
        }
        while self.elapsed_ms >= step_ms {
            self.elapsed_ms -= step_ms;
            self.fire();
        }
    }
}
