/// Error types for hexseq.
///
/// Nothing here is fatal to playback: the scheduler logs and skips on every
/// failure it meets mid-tick. These types surface from registry edits,
/// configuration loading and the audio boundary.
use thiserror::Error;

use crate::grid::{BranchId, Coord, PathId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("Hex {0} is not on the board")]
    UnknownHex(Coord),
}

/// Rejected registry edits. A rejected edit leaves the registry untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Route is empty")]
    EmptyRoute,

    #[error("Hex {0} is not on the board")]
    UnknownHex(Coord),

    #[error("Route hexes {0} and {1} are not adjacent")]
    NotAdjacent(Coord, Coord),

    #[error("Route visits hex {0} twice")]
    RepeatedHex(Coord),

    #[error("Hex {0} is already claimed")]
    Occupied(Coord),

    #[error("Hex {0} cannot hold a path")]
    Unusable(Coord),

    #[error("Hex {0} lies in another path's reservation buffer")]
    Reserved(Coord),

    #[error("Unknown path: {0}")]
    UnknownPath(PathId),

    #[error("Unknown branch: {0}")]
    UnknownBranch(BranchId),

    #[error("Invalid value {value} for {param}")]
    InvalidValue { param: &'static str, value: f64 },
}

/// A utility handler refused its input. The pipeline passes the context
/// through unchanged when this happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Offset amount must be finite, got {0}")]
    NonFiniteOffset(f64),

    #[error("Speed rate must be finite and positive, got {0}")]
    InvalidRate(f64),

    #[error("Probability chance must be within 0..=1, got {0}")]
    InvalidChance(f64),

    #[error("Gain must be finite and non-negative, got {0}")]
    InvalidGain(f64),

    #[error("Pan must be finite, got {0}")]
    NonFinitePan(f64),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    #[error("Sample not loaded: {0}")]
    SampleNotLoaded(String),

    #[error("Voice backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Effect chain for {0} already disposed")]
    AlreadyDisposed(PathId),

    #[error("Effect chain backend error: {0}")]
    Backend(String),
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid tempo: {0}. Must be between 40.0 and 240.0 BPM")]
    InvalidTempo(f64),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Audio device not available")]
    DeviceNotAvailable,

    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Failed to read default stream config")]
    DefaultStreamConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
