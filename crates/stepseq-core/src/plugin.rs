//! Contract for external audio-generating plugins

use std::sync::{Mutex, PoisonError};

use crate::event::MidiEvent;

/// Default capacity of a plugin's pending event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Thread-safe buffer of MIDI events waiting for the next audio callback.
///
/// Any thread may push; the audio thread drains the whole queue once per
/// callback by swapping the contents out under the queue's own lock. Pushes
/// beyond capacity are dropped rather than blocking the producer.
#[derive(Debug)]
pub struct MidiEventQueue {
    events: Mutex<Vec<MidiEvent>>,
    capacity: usize,
}

impl Default for MidiEventQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl MidiEventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Queue an event. Returns false if the queue is full.
    pub fn push(&self, event: MidiEvent) -> bool {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            tracing::trace!(capacity = self.capacity, "MIDI queue full, dropping event");
            return false;
        }
        events.push(event);
        true
    }

    /// Swap the queued events into `out` (cleared first), leaving the queue empty
    pub fn drain_into(&self, out: &mut Vec<MidiEvent>) {
        out.clear();
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut *events, out);
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One chunk of rendered audio: one contiguous buffer per channel, each at
/// least `frames` long.
#[derive(Debug, Clone, Copy)]
pub struct PluginOutput<'a> {
    pub channels: &'a [Vec<f32>],
    pub frames: usize,
}

impl<'a> PluginOutput<'a> {
    pub fn new(channels: &'a [Vec<f32>], frames: usize) -> Self {
        Self { channels, frames }
    }

    pub fn empty() -> Self {
        Self { channels: &[], frames: 0 }
    }
}

/// Audio-generating plugin driven by MIDI.
///
/// Event submission goes through the plugin's own [`MidiEventQueue`] and only
/// needs `&self`; `process_events` and `process_audio` run on the audio thread.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    /// Queue that buffers events until the next `process_events`
    fn events(&self) -> &MidiEventQueue;

    fn send_midi_note(&self, channel: u8, note: u8, on: bool, velocity: u8) {
        self.events().push(MidiEvent::note(channel, note, on, velocity));
    }

    /// Non-note events (controllers, program changes, pressure)
    fn send_midi_event(&self, event: MidiEvent) {
        self.events().push(event);
    }

    /// Drain the queue and hand the events to the plugin implementation
    fn process_events(&mut self);

    /// Render up to `requested_frames` (at most one native block)
    fn process_audio(&mut self, requested_frames: usize) -> PluginOutput<'_>;

    fn channel_count(&self) -> usize;

    fn block_size(&self) -> usize;

    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    /// Release plugin resources before the handle is dropped
    fn close(&mut self) {}

    fn open_editor(&mut self) -> bool {
        false
    }

    fn close_editor(&mut self) {}

    /// Opaque plugin state for persistence
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn load_state(&mut self, _state: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drains_by_swap() {
        let queue = MidiEventQueue::with_capacity(4);
        assert!(queue.push(MidiEvent::note(0, 60, true, 100)));
        assert!(queue.push(MidiEvent::note(0, 60, false, 0)));

        let mut out = vec![MidiEvent::note(0, 1, true, 1)];
        queue.drain_into(&mut out);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_note_on());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_is_bounded() {
        let queue = MidiEventQueue::with_capacity(2);
        assert!(queue.push(MidiEvent::note(0, 60, true, 100)));
        assert!(queue.push(MidiEvent::note(0, 61, true, 100)));
        assert!(!queue.push(MidiEvent::note(0, 62, true, 100)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_queue_accepts_from_other_threads() {
        let queue = std::sync::Arc::new(MidiEventQueue::default());
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for n in 0..10u8 {
                        queue.push(MidiEvent::note(i, n, true, 100));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 40);
    }
}
