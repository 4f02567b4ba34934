//! stepseq-services: Real-time render engine, audio output and clock-driven services

pub mod audio_engine;
pub mod audio_io;
pub mod clock_services;
pub mod native_instruments;
pub mod render;
pub mod session;

pub use audio_engine::{AudioEngine, AudioEngineError, EngineState, PlaybackSnapshot};
pub use audio_io::{AudioOutputError, OutputDeviceInfo, RealtimeOutputStream, default_device_info};
pub use clock_services::{
    ArpMode, Arpeggiator, ArpeggiatorHandle, ClockListener, ClockTick, NotePreview, PreviewHandle,
    arpeggiator, note_preview,
};
pub use native_instruments::SineSynth;
pub use render::RenderEngine;
pub use session::Session;
