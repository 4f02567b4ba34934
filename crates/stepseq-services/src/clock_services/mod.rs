//! Services driven by the render clock (note preview, arpeggiator)
//!
//! Each service is split in two: a handle the UI keeps and clones freely,
//! and a listener the render engine owns and ticks once per callback. They
//! talk over a bounded crossbeam channel so the UI never blocks the audio
//! thread.

pub mod arpeggiator;
pub mod preview;

pub use arpeggiator::{ArpMode, Arpeggiator, ArpeggiatorHandle, arpeggiator};
pub use preview::{NotePreview, PreviewHandle, note_preview};

/// Default channel capacity for service commands
pub const COMMAND_CAPACITY: usize = 256;

/// Timing information handed to listeners each callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    /// Milliseconds covered by this callback
    pub diff_ms: f64,
    pub bpm: u32,
    pub playing: bool,
}

/// Something the render engine advances once per audio callback
pub trait ClockListener: Send {
    fn name(&self) -> &str;
    fn tick(&mut self, tick: &ClockTick);
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex, PoisonError};

    use stepseq_core::{MidiEvent, MidiEventQueue, Plugin, PluginOutput};

    /// Plugin that logs processed events and outputs a constant per channel
    pub struct ProbePlugin {
        queue: MidiEventQueue,
        log: Arc<Mutex<Vec<MidiEvent>>>,
        outputs: Vec<Vec<f32>>,
        block_size: usize,
    }

    impl ProbePlugin {
        pub fn new(levels: &[f32], block_size: usize) -> (Self, Arc<Mutex<Vec<MidiEvent>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let plugin = Self {
                queue: MidiEventQueue::default(),
                log: log.clone(),
                outputs: levels.iter().map(|&l| vec![l; block_size]).collect(),
                block_size,
            };
            (plugin, log)
        }
    }

    impl Plugin for ProbePlugin {
        fn name(&self) -> &str {
            "probe"
        }
        fn events(&self) -> &MidiEventQueue {
            &self.queue
        }
        fn process_events(&mut self) {
            let mut drained = Vec::new();
            self.queue.drain_into(&mut drained);
            self.log.lock().unwrap_or_else(PoisonError::into_inner).extend(drained);
        }
        fn process_audio(&mut self, requested_frames: usize) -> PluginOutput<'_> {
            PluginOutput::new(&self.outputs, requested_frames.min(self.block_size))
        }
        fn channel_count(&self) -> usize {
            self.outputs.len()
        }
        fn block_size(&self) -> usize {
            self.block_size
        }
    }

    /// Pending (unprocessed) events of an instrument's plugin
    pub fn pending(instrument: &stepseq_core::Instrument) -> Vec<MidiEvent> {
        instrument
            .map_plugin(|p| {
                let mut out = Vec::new();
                p.events().drain_into(&mut out);
                out
            })
            .unwrap_or_default()
    }
}
