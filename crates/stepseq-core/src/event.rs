//! Timestamped musical events stored in regions

use serde::{Deserialize, Serialize};

/// Controller number for "All Notes Off"
pub const ALL_NOTES_OFF: u8 = 123;

/// Kind of MIDI message an event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiEventKind {
    Note,
    Controller,
    ProgramChange,
    Pressure,
}

/// A single MIDI event. For notes, `value` is the velocity and 0 means note off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiEvent {
    /// MIDI channel (0-15)
    pub channel: u8,
    pub kind: MidiEventKind,
    /// Note, controller or program number (0-127)
    pub number: u8,
    /// Velocity or controller value (0-127)
    pub value: u8,
}

impl MidiEvent {
    pub fn new(channel: u8, kind: MidiEventKind, number: u8, value: u8) -> Self {
        Self {
            channel: channel & 0x0F,
            kind,
            number: number.min(127),
            value: value.min(127),
        }
    }

    /// Note event; a note off always carries value 0
    pub fn note(channel: u8, number: u8, on: bool, velocity: u8) -> Self {
        let value = if on { velocity } else { 0 };
        Self::new(channel, MidiEventKind::Note, number, value)
    }

    pub fn controller(channel: u8, number: u8, value: u8) -> Self {
        Self::new(channel, MidiEventKind::Controller, number, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::new(channel, MidiEventKind::ProgramChange, program, 0)
    }

    pub fn pressure(channel: u8, value: u8) -> Self {
        Self::new(channel, MidiEventKind::Pressure, 0, value)
    }

    pub fn is_note(&self) -> bool {
        self.kind == MidiEventKind::Note
    }

    pub fn is_note_on(&self) -> bool {
        self.is_note() && self.value != 0
    }

    pub fn is_note_off(&self) -> bool {
        self.is_note() && self.value == 0
    }

    /// Raw MIDI bytes (status, data1, data2). Two-byte messages pad with 0.
    pub fn to_bytes(&self) -> [u8; 3] {
        let channel = self.channel & 0x0F;
        match self.kind {
            MidiEventKind::Note if self.value != 0 => [0x90 | channel, self.number, self.value],
            MidiEventKind::Note => [0x80 | channel, self.number, 0],
            MidiEventKind::Controller => [0xB0 | channel, self.number, self.value],
            MidiEventKind::ProgramChange => [0xC0 | channel, self.number, 0],
            MidiEventKind::Pressure => [0xD0 | channel, self.value, 0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_off_has_zero_value() {
        let off = MidiEvent::note(0, 60, false, 100);
        assert_eq!(off.value, 0);
        assert!(off.is_note_off());
        assert!(!off.is_note_on());
    }

    #[test]
    fn test_to_bytes() {
        assert_eq!(MidiEvent::note(1, 60, true, 90).to_bytes(), [0x91, 60, 90]);
        assert_eq!(MidiEvent::note(1, 60, false, 90).to_bytes(), [0x81, 60, 0]);
        assert_eq!(MidiEvent::controller(0, ALL_NOTES_OFF, 0).to_bytes(), [0xB0, 123, 0]);
        assert_eq!(MidiEvent::program_change(2, 5).to_bytes(), [0xC2, 5, 0]);
        assert_eq!(MidiEvent::pressure(3, 70).to_bytes(), [0xD3, 70, 0]);
    }

    #[test]
    fn test_values_are_clamped() {
        let ev = MidiEvent::new(18, MidiEventKind::Controller, 200, 255);
        assert_eq!(ev.channel, 2);
        assert_eq!(ev.number, 127);
        assert_eq!(ev.value, 127);
    }
}
