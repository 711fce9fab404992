/// HEXSEQ - A hex-grid step sequencer library
///
/// This library provides the core components for a path-based sequencer:
/// - Axial hex board with route search between hexes
/// - Path and branch registry for the tracks drawn on the board
/// - Step scheduler and per-trigger effect pipeline
/// - Audio output through cpal

pub mod audio;
pub mod config;
pub mod error;
pub mod grid;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioBackend, AudioOutput, ChainParams, EffectChain, MixChain, VoiceRequest};
pub use config::EngineConfig;
pub use error::{ChainError, Error, GridError, PipelineError, RegistryError, Result, VoiceError};
pub use grid::{BranchId, Coord, Direction, Hex, HexGrid, PathId};
pub use sequencer::{
    BranchEffect, BranchKind, Clock, EffectKind, ManualClock, PathParam, RandomRange, Sequencer,
    ThreadClock, TickReport, UtilityKind,
};
