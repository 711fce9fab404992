/// Branch kinds and their typed settings
///
/// Utilities reshape a step's trigger context; effects drive a path's audio
/// chain. Every kind has a neutral value, and a branch sitting at its neutral
/// value is never stored.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UtilityKind {
    Offset,
    Speed,
    Probability,
    Volume,
    Pan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    Chaos,
    Distortion,
    PitchShift,
}

impl EffectKind {
    pub const ALL: [EffectKind; 3] = [EffectKind::Chaos, EffectKind::Distortion, EffectKind::PitchShift];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    Utility(UtilityKind),
    Effect(EffectKind),
}

impl BranchKind {
    pub const ALL: [BranchKind; 8] = [
        BranchKind::Utility(UtilityKind::Offset),
        BranchKind::Utility(UtilityKind::Speed),
        BranchKind::Utility(UtilityKind::Probability),
        BranchKind::Utility(UtilityKind::Volume),
        BranchKind::Utility(UtilityKind::Pan),
        BranchKind::Effect(EffectKind::Chaos),
        BranchKind::Effect(EffectKind::Distortion),
        BranchKind::Effect(EffectKind::PitchShift),
    ];

    pub fn name(self) -> &'static str {
        match self {
            BranchKind::Utility(UtilityKind::Offset) => "Offset",
            BranchKind::Utility(UtilityKind::Speed) => "Speed",
            BranchKind::Utility(UtilityKind::Probability) => "Probability",
            BranchKind::Utility(UtilityKind::Volume) => "Volume",
            BranchKind::Utility(UtilityKind::Pan) => "Pan",
            BranchKind::Effect(EffectKind::Chaos) => "Chaos",
            BranchKind::Effect(EffectKind::Distortion) => "Distortion",
            BranchKind::Effect(EffectKind::PitchShift) => "PitchShift",
        }
    }

    pub fn is_utility(self) -> bool {
        matches!(self, BranchKind::Utility(_))
    }

    pub fn neutral(self) -> f64 {
        match self {
            BranchKind::Utility(UtilityKind::Speed)
            | BranchKind::Utility(UtilityKind::Probability)
            | BranchKind::Utility(UtilityKind::Volume) => 1.0,
            _ => 0.0,
        }
    }

    /// Inclusive value range offered to the UI; values are clamped into it.
    pub fn range(self) -> (f64, f64) {
        match self {
            BranchKind::Utility(UtilityKind::Offset) => (-1.0, 1.0),
            BranchKind::Utility(UtilityKind::Speed) => (0.125, 8.0),
            BranchKind::Utility(UtilityKind::Probability) => (0.0, 1.0),
            BranchKind::Utility(UtilityKind::Volume) => (0.0, 1.0),
            BranchKind::Utility(UtilityKind::Pan) => (-12.0, 12.0),
            BranchKind::Effect(EffectKind::Chaos) => (0.0, 1.0),
            BranchKind::Effect(EffectKind::Distortion) => (0.0, 1.0),
            BranchKind::Effect(EffectKind::PitchShift) => (-24.0, 24.0),
        }
    }

    pub fn clamp(self, value: f64) -> f64 {
        let (min, max) = self.range();
        value.clamp(min, max)
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BranchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BranchKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown effect: {s}"))
    }
}

/// A branch's typed setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BranchEffect {
    /// Shift the trigger by `amount` steps.
    Offset { amount: f64 },
    Speed { rate: f64 },
    Probability { chance: f64 },
    Volume { gain: f64 },
    /// Pan offset in dB, added to the path's own pan.
    Pan { pan: f64 },
    Chaos { amount: f64 },
    Distortion { amount: f64 },
    PitchShift { semitones: f64 },
}

impl BranchEffect {
    pub fn new(kind: BranchKind, value: f64) -> Self {
        match kind {
            BranchKind::Utility(UtilityKind::Offset) => BranchEffect::Offset { amount: value },
            BranchKind::Utility(UtilityKind::Speed) => BranchEffect::Speed { rate: value },
            BranchKind::Utility(UtilityKind::Probability) => BranchEffect::Probability { chance: value },
            BranchKind::Utility(UtilityKind::Volume) => BranchEffect::Volume { gain: value },
            BranchKind::Utility(UtilityKind::Pan) => BranchEffect::Pan { pan: value },
            BranchKind::Effect(EffectKind::Chaos) => BranchEffect::Chaos { amount: value },
            BranchKind::Effect(EffectKind::Distortion) => BranchEffect::Distortion { amount: value },
            BranchKind::Effect(EffectKind::PitchShift) => BranchEffect::PitchShift { semitones: value },
        }
    }

    pub fn kind(&self) -> BranchKind {
        match self {
            BranchEffect::Offset { .. } => BranchKind::Utility(UtilityKind::Offset),
            BranchEffect::Speed { .. } => BranchKind::Utility(UtilityKind::Speed),
            BranchEffect::Probability { .. } => BranchKind::Utility(UtilityKind::Probability),
            BranchEffect::Volume { .. } => BranchKind::Utility(UtilityKind::Volume),
            BranchEffect::Pan { .. } => BranchKind::Utility(UtilityKind::Pan),
            BranchEffect::Chaos { .. } => BranchKind::Effect(EffectKind::Chaos),
            BranchEffect::Distortion { .. } => BranchKind::Effect(EffectKind::Distortion),
            BranchEffect::PitchShift { .. } => BranchKind::Effect(EffectKind::PitchShift),
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            BranchEffect::Offset { amount } => amount,
            BranchEffect::Speed { rate } => rate,
            BranchEffect::Probability { chance } => chance,
            BranchEffect::Volume { gain } => gain,
            BranchEffect::Pan { pan } => pan,
            BranchEffect::Chaos { amount } => amount,
            BranchEffect::Distortion { amount } => amount,
            BranchEffect::PitchShift { semitones } => semitones,
        }
    }

    pub fn is_neutral(&self) -> bool {
        (self.value() - self.kind().neutral()).abs() < f64::EPSILON
    }
}

/// Per-path randomization window for one effect. When enabled, each trigger
/// draws the effect's value uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomRange {
    pub enabled: bool,
    pub min: f64,
    pub max: f64,
}

impl RandomRange {
    pub fn new(enabled: bool, min: f64, max: f64) -> Self {
        Self { enabled, min, max }
    }

    /// `min <= max`, both inside the effect's range.
    pub fn normalized(self, effect: EffectKind) -> Self {
        let kind = BranchKind::Effect(effect);
        let a = kind.clamp(self.min);
        let b = kind.clamp(self.max);
        Self {
            enabled: self.enabled,
            min: a.min(b),
            max: a.max(b),
        }
    }
}

impl Default for RandomRange {
    fn default() -> Self {
        Self {
            enabled: false,
            min: 0.0,
            max: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Randomization {
    pub chaos: RandomRange,
    pub distortion: RandomRange,
    pub pitch_shift: RandomRange,
}

impl Randomization {
    pub fn get(&self, effect: EffectKind) -> RandomRange {
        match effect {
            EffectKind::Chaos => self.chaos,
            EffectKind::Distortion => self.distortion,
            EffectKind::PitchShift => self.pitch_shift,
        }
    }

    pub fn set(&mut self, effect: EffectKind, range: RandomRange) {
        let range = range.normalized(effect);
        match effect {
            EffectKind::Chaos => self.chaos = range,
            EffectKind::Distortion => self.distortion = range,
            EffectKind::PitchShift => self.pitch_shift = range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for kind in BranchKind::ALL {
            assert_eq!(kind.name().parse::<BranchKind>(), Ok(kind));
        }
        assert_eq!("speed".parse::<BranchKind>(), Ok(BranchKind::Utility(UtilityKind::Speed)));
        assert!("Reverb".parse::<BranchKind>().is_err());
    }

    #[test]
    fn test_neutral_detection() {
        assert!(BranchEffect::Speed { rate: 1.0 }.is_neutral());
        assert!(!BranchEffect::Speed { rate: 2.0 }.is_neutral());
        assert!(BranchEffect::Offset { amount: 0.0 }.is_neutral());
        assert!(BranchEffect::new(BranchKind::Effect(EffectKind::Chaos), 0.0).is_neutral());
    }

    #[test]
    fn test_random_range_normalized() {
        let r = RandomRange::new(true, 0.9, -3.0).normalized(EffectKind::Chaos);
        assert_eq!(r.min, 0.0);
        assert_eq!(r.max, 0.9);

        let mut rnd = Randomization::default();
        rnd.set(EffectKind::PitchShift, RandomRange::new(true, 30.0, -5.0));
        assert_eq!(rnd.get(EffectKind::PitchShift), RandomRange::new(true, -5.0, 24.0));
    }
}
