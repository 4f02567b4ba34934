//! Fixed-length note preview (e.g. clicking a key in an editor)

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use stepseq_core::Instrument;
use tracing::trace;

use super::{COMMAND_CAPACITY, ClockListener, ClockTick};

struct PreviewRequest {
    instrument: Arc<Instrument>,
    note: u8,
    velocity: u8,
    duration_ms: f64,
}

struct SoundingNote {
    instrument: Arc<Instrument>,
    note: u8,
    remaining_ms: f64,
}

/// UI side of the preview service
#[derive(Clone)]
pub struct PreviewHandle {
    tx: Sender<PreviewRequest>,
}

impl PreviewHandle {
    /// Sound `note` on `instrument` for `duration_ms`. Returns false if the
    /// request queue is full or the service is gone.
    pub fn preview(&self, instrument: Arc<Instrument>, note: u8, velocity: u8, duration_ms: f64) -> bool {
        let request = PreviewRequest {
            instrument,
            note,
            velocity,
            duration_ms,
        };
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Audio side of the preview service: starts requested notes and stops them
/// once their duration has elapsed on the render clock.
pub struct NotePreview {
    rx: Receiver<PreviewRequest>,
    sounding: Vec<SoundingNote>,
}

/// Create a connected preview service and handle
pub fn note_preview() -> (NotePreview, PreviewHandle) {
    let (tx, rx) = bounded(COMMAND_CAPACITY);
    let service = NotePreview {
        rx,
        sounding: Vec::with_capacity(COMMAND_CAPACITY),
    };
    (service, PreviewHandle { tx })
}

impl NotePreview {
    pub fn sounding_count(&self) -> usize {
        self.sounding.len()
    }
}

impl ClockListener for NotePreview {
    fn name(&self) -> &str {
        "note-preview"
    }

    fn tick(&mut self, tick: &ClockTick) {
        self.sounding.retain_mut(|s| {
            s.remaining_ms -= tick.diff_ms;
            if s.remaining_ms > 0.0 {
                return true;
            }
            s.instrument.send_midi_note(s.note, false, 0);
            false
        });

        while let Ok(request) = self.rx.try_recv() {
            trace!(note = request.note, instrument = %request.instrument.name(), "Preview");
            if !request.instrument.send_midi_note(request.note, true, request.velocity) {
                continue;
            }
            self.sounding.push(SoundingNote {
                instrument: request.instrument,
                note: request.note,
                remaining_ms: request.duration_ms,
            });
        }
    }
}
