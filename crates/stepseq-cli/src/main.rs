//! stepseq: headless step sequencer that plays a demo arrangement

mod config;

use std::thread;
use std::time::Duration;

use anyhow::Context;
use stepseq_core::{Instrument, Region, STEPS_PER_BAR, STEPS_PER_BEAT};
use stepseq_services::{
    ArpMode, AudioEngine, ClockListener, Session, SineSynth, arpeggiator, default_device_info, note_preview,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use config::{StepseqConfig, config_path, load_config, save_config};

const FALLBACK_SAMPLE_RATE: u32 = 48_000;

fn init_logging(config: &StepseqConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

fn synth(name: &str, channel: u8, sample_rate: u32) -> Instrument {
    Instrument::with_plugin(name, channel, Box::new(SineSynth::new(sample_rate as f32)))
}

/// Two bars of bass and chord stabs, plus an empty track for the arpeggiator
fn build_demo(session: &mut Session, sample_rate: u32) -> anyhow::Result<()> {
    let bass = session.add_track("Bass", Some(synth("Bass", 0, sample_rate)));
    let chords = session.add_track("Chords", Some(synth("Chords", 1, sample_rate)));
    let arp = session.add_track("Arp", Some(synth("Arp", 2, sample_rate)));

    session.edit("Bass line", |tracks| {
        let mut region = Region::new("Bass");
        let roots = [36, 36, 43, 41, 36, 36, 39, 41];
        for (i, &note) in roots.iter().enumerate() {
            let offset = i as u64 * STEPS_PER_BEAT;
            region.add_event(offset, note, true, 110);
            region.add_event(offset + STEPS_PER_BEAT / 2, note, false, 0);
        }
        tracks.get_track_mut(bass)?.add_region(0, region)
    })?;

    session.edit("Chords", |tracks| {
        let mut region = Region::new("Stabs");
        for bar in 0..2 {
            let offset = bar * STEPS_PER_BAR + STEPS_PER_BEAT;
            for note in [60, 63, 67] {
                region.add_event(offset, note, true, 80);
                region.add_event(offset + STEPS_PER_BEAT * 2, note, false, 0);
            }
        }
        tracks.get_track_mut(chords)?.add_region(0, region)
    })?;

    session.set_active_track(arp);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = load_config();
    init_logging(&config);

    if !config_path().exists() {
        if let Err(e) = save_config(&config) {
            tracing::warn!("Failed to write default config: {}", e);
        }
    }

    tracing::info!(bpm = config.bpm, "Starting stepseq");

    let sample_rate = match default_device_info() {
        Ok(info) => {
            tracing::info!(device = %info, "Default output device");
            info.sample_rate
        }
        Err(e) => {
            tracing::warn!("Could not query output device: {}", e);
            FALLBACK_SAMPLE_RATE
        }
    };

    let mut engine = AudioEngine::new(config.bpm);
    let (preview, preview_handle) = note_preview();
    let (arp, arp_handle) = arpeggiator();

    let mut session = Session::with_history_limit(engine.state(), config.history_limit)
        .with_preview(preview_handle, config.preview_duration_ms)
        .with_arpeggiator(arp_handle);
    build_demo(&mut session, sample_rate)?;

    let listeners: Vec<Box<dyn ClockListener>> = vec![Box::new(preview), Box::new(arp)];
    engine.start(listeners).context("starting audio engine")?;

    session.preview_note(72, 100);
    thread::sleep(Duration::from_millis(400));

    if let Some(arp) = session.arpeggiator() {
        arp.set_mode(ArpMode::UpDown);
        arp.set_rate(16);
        arp.set_gate(0.5);
    }

    session.toggle_playing();
    let half = config.demo_seconds / 2;
    for second in 0..config.demo_seconds {
        if second == half {
            if let Some(arp) = session.arpeggiator() {
                for note in [72, 75, 79] {
                    arp.note_on(note, 70);
                }
            }
        }
        thread::sleep(Duration::from_secs(1));
        tracing::info!(position = %session.position(), "Playing");
        if session.cursor() >= session.tracks().end_step() {
            session.set_cursor_at_step(0);
        }
    }

    if let Some(arp) = session.arpeggiator() {
        for note in [72, 75, 79] {
            arp.note_off(note);
        }
    }
    session.stop_playing();
    // Let the release tails ring out
    thread::sleep(Duration::from_millis(300));
    engine.stop()?;

    tracing::info!("Done");
    Ok(())
}
