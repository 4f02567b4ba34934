//! Built-in plugins that need no external host

pub mod sine_synth;

pub use sine_synth::SineSynth;
