//! Instrument slot guarding exclusive access to a plugin

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::event::{ALL_NOTES_OFF, MidiEvent};
use crate::plugin::Plugin;

/// The guarded plugin handle
pub type PluginSlot = Option<Box<dyn Plugin>>;

/// A named slot that may hold one plugin.
///
/// Every access to the plugin goes through [`Instrument::lock`]; the guard is
/// the synchronization boundary between the UI thread (swapping plugins,
/// saving state) and the audio thread (processing audio each callback).
pub struct Instrument {
    name: String,
    midi_channel: u8,
    plugin: Mutex<PluginSlot>,
}

impl Instrument {
    pub fn new(name: impl Into<String>, midi_channel: u8) -> Self {
        Self {
            name: name.into(),
            midi_channel: midi_channel & 0x0F,
            plugin: Mutex::new(None),
        }
    }

    pub fn with_plugin(name: impl Into<String>, midi_channel: u8, plugin: Box<dyn Plugin>) -> Self {
        let instrument = Self::new(name, midi_channel);
        instrument.set_plugin(Some(plugin));
        instrument
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn midi_channel(&self) -> u8 {
        self.midi_channel
    }

    /// Acquire the plugin handle; released when the guard drops
    pub fn lock(&self) -> MutexGuard<'_, PluginSlot> {
        self.plugin.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the plugin. The previous one is closed and dropped under the
    /// lock before the new one is installed.
    pub fn set_plugin(&self, plugin: PluginSlot) {
        let mut slot = self.lock();
        if let Some(mut old) = slot.take() {
            info!(instrument = %self.name, plugin = %old.name(), "Closing plugin");
            old.close();
            drop(old);
        }
        if let Some(new) = &plugin {
            info!(instrument = %self.name, plugin = %new.name(), "Plugin attached");
        }
        *slot = plugin;
    }

    pub fn has_plugin(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `f` against the plugin if one is attached
    pub fn map_plugin<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Plugin) -> R,
    {
        let mut slot = self.lock();
        let plugin = slot.as_mut()?;
        Some(f(plugin.as_mut()))
    }

    /// Send a note on this instrument's channel. Returns false without a plugin.
    pub fn send_midi_note(&self, note: u8, on: bool, velocity: u8) -> bool {
        self.map_plugin(|p| p.send_midi_note(self.midi_channel, note, on, velocity))
            .is_some()
    }

    pub fn all_notes_off(&self) {
        self.map_plugin(|p| {
            p.send_midi_event(MidiEvent::controller(self.midi_channel, ALL_NOTES_OFF, 0))
        });
    }

    pub fn save_state(&self) -> Option<Vec<u8>> {
        self.map_plugin(|p| p.save_state())
    }

    pub fn load_state(&self, state: &[u8]) -> bool {
        self.map_plugin(|p| p.load_state(state)).is_some()
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("midi_channel", &self.midi_channel)
            .field("has_plugin", &self.has_plugin())
            .finish()
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        let slot = self.plugin.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut plugin) = slot.take() {
            plugin.close();
        }
    }
}
