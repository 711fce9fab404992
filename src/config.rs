/// Engine configuration.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tempo, board and trigger-timing settings for one session.
///
/// All times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bpm: f64,
    /// Scheduler ticks per beat; 2 ticks on eighth notes.
    pub steps_per_beat: u32,
    pub grid_radius: u32,
    /// Hexes within this distance of a path's terminal hex are closed to new routes.
    pub reservation_radius: u32,
    /// Delay between a tick firing and the voices it schedules.
    pub lookahead: f64,
    /// Minimum spacing between two starts of the same sample.
    pub trigger_epsilon: f64,
    /// Trimmed from a voice's ring-out so it ends before the path wraps.
    pub duration_epsilon: f64,
    pub min_duration: f64,
    /// Fixed RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            steps_per_beat: 2,
            grid_radius: 4,
            reservation_radius: 1,
            lookahead: 0.05,
            trigger_epsilon: 0.01,
            duration_epsilon: 0.01,
            min_duration: 0.05,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(40.0..=240.0).contains(&self.bpm) {
            return Err(Error::InvalidTempo(self.bpm));
        }
        if self.steps_per_beat == 0 {
            return Err(Error::InvalidConfig("steps_per_beat must be at least 1".into()));
        }
        if self.grid_radius == 0 {
            return Err(Error::InvalidConfig("grid_radius must be at least 1".into()));
        }
        for (name, value) in [
            ("lookahead", self.lookahead),
            ("trigger_epsilon", self.trigger_epsilon),
            ("duration_epsilon", self.duration_epsilon),
            ("min_duration", self.min_duration),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.trigger_epsilon == 0.0 {
            return Err(Error::InvalidConfig("trigger_epsilon must be positive".into()));
        }
        Ok(())
    }

    /// Length of one scheduler step at the configured tempo.
    pub fn step_duration(&self) -> f64 {
        60.0 / self.bpm / self.steps_per_beat as f64
    }
}
