//! Error types for stepseq

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepseqError {
    #[error("Track not found: {0}")]
    TrackNotFound(u64),
    #[error("Region not found at step {start} on track {track}")]
    RegionNotFound { track: u64, start: u64 },
    #[error("Region at step {start} overlaps region at step {existing}")]
    RegionOverlap { start: u64, existing: u64 },
    #[error("Tempo out of range: {0} bpm")]
    InvalidTempo(u32),
}

pub type Result<T> = std::result::Result<T, StepseqError>;
