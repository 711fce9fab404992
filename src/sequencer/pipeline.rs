/// Per-trigger transformation pipeline
///
/// A step that passed the path's probability gate becomes a
/// [`PlaybackContext`], is folded through the path's utility branches in
/// registration order, gets its ring-out duration, and finally has its start
/// time pushed past the last start of the same sample.
use std::collections::HashMap;

use rand::Rng;
use tracing::warn;

use super::effects::{BranchEffect, EffectKind};
use super::registry::{Branch, Path};
use crate::audio::EffectChain;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackContext {
    pub trigger_time: f64,
    pub duration: Option<f64>,
    pub speed_rate: f64,
    pub cancelled: bool,
    /// Multiplies the path volume.
    pub gain: f64,
    /// dB, added to the path pan.
    pub pan: f64,
}

impl PlaybackContext {
    pub fn new(now: f64, lookahead: f64) -> Self {
        Self {
            trigger_time: now + lookahead,
            duration: None,
            speed_rate: 1.0,
            cancelled: false,
            gain: 1.0,
            pan: 0.0,
        }
    }
}

/// True when a uniform draw lands outside `chance`. `0` always fails and `1`
/// always passes.
pub fn gate_fails<R: Rng>(rng: &mut R, chance: f64) -> bool {
    rng.gen::<f64>() >= chance
}

/// One utility applied to a context. Effect branches pass through untouched.
pub fn apply_utility<R: Rng>(
    mut ctx: PlaybackContext,
    effect: &BranchEffect,
    step_duration: f64,
    rng: &mut R,
) -> Result<PlaybackContext, PipelineError> {
    match *effect {
        BranchEffect::Offset { amount } => {
            if !amount.is_finite() {
                return Err(PipelineError::NonFiniteOffset(amount));
            }
            ctx.trigger_time += amount * step_duration;
        }
        BranchEffect::Speed { rate } => {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(PipelineError::InvalidRate(rate));
            }
            ctx.duration = ctx.duration.map(|d| d / rate);
            ctx.speed_rate = rate;
        }
        BranchEffect::Probability { chance } => {
            if !(0.0..=1.0).contains(&chance) {
                return Err(PipelineError::InvalidChance(chance));
            }
            if gate_fails(rng, chance) {
                ctx.cancelled = true;
            }
        }
        BranchEffect::Volume { gain } => {
            if !gain.is_finite() || gain < 0.0 {
                return Err(PipelineError::InvalidGain(gain));
            }
            ctx.gain *= gain;
        }
        BranchEffect::Pan { pan } => {
            if !pan.is_finite() {
                return Err(PipelineError::NonFinitePan(pan));
            }
            ctx.pan += pan;
        }
        BranchEffect::Chaos { .. } | BranchEffect::Distortion { .. } | BranchEffect::PitchShift { .. } => {}
    }
    Ok(ctx)
}

/// Folds `branches` over `ctx`. A failing handler is logged and skipped.
pub fn fold_utilities<'a, I, R>(
    ctx: PlaybackContext,
    branches: I,
    step_duration: f64,
    rng: &mut R,
) -> PlaybackContext
where
    I: IntoIterator<Item = &'a Branch>,
    R: Rng,
{
    branches
        .into_iter()
        .filter(|b| b.kind().is_utility())
        .fold(ctx, |ctx, branch| {
            match apply_utility(ctx, &branch.effect(), step_duration, rng) {
                Ok(next) => next,
                Err(err) => {
                    warn!(branch = %branch.id(), error = %err, "utility failed, passing context through");
                    ctx
                }
            }
        })
}

/// How long a voice may ring: through the rest of the path's pass, never
/// shorter than `min_duration`.
pub fn total_duration(
    sequence_len: usize,
    index: usize,
    base_step: f64,
    speed_rate: f64,
    epsilon: f64,
    min_duration: f64,
) -> f64 {
    let one_step = base_step / speed_rate;
    let remaining = sequence_len.saturating_sub(index) as f64;
    (remaining * one_step + one_step - epsilon).max(min_duration)
}

/// The value an effect plays with on this trigger: a fresh draw from the
/// path's randomization window when enabled, the fixed path value otherwise.
pub fn resolve_effect<R: Rng>(path: &Path, effect: EffectKind, rng: &mut R) -> f64 {
    let range = path.randomization().get(effect);
    if range.enabled {
        if range.max > range.min {
            rng.gen_range(range.min..=range.max)
        } else {
            range.min
        }
    } else {
        path.effect(effect)
    }
}

/// Parameter writes for one trigger on a path's effect chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSettings {
    /// Left untouched when chaos is off.
    pub delay_time: Option<f64>,
    pub feedback: Option<f64>,
    pub delay_wet: f64,
    pub distortion: f64,
    pub distortion_wet: f64,
    pub pitch: f64,
    pub pitch_wet: f64,
    pub gain: f64,
    /// Normalized to `-1..=1`.
    pub pan: f64,
}

impl ChainSettings {
    pub const MIN_DELAY: f64 = 0.050;
    pub const MAX_DELAY: f64 = 0.125;

    pub fn for_trigger<R: Rng>(path: &Path, ctx: &PlaybackContext, rng: &mut R) -> Self {
        let chaos = resolve_effect(path, EffectKind::Chaos, rng);
        let distortion = resolve_effect(path, EffectKind::Distortion, rng);
        let pitch = resolve_effect(path, EffectKind::PitchShift, rng);

        let (delay_time, feedback, delay_wet) = if chaos > 0.0 {
            (
                Some(rng.gen_range(Self::MIN_DELAY..=Self::MAX_DELAY)),
                Some(rng.gen_range(0.0..=0.75 * chaos)),
                0.8 * chaos,
            )
        } else {
            (None, None, 0.0)
        };

        let (distortion, distortion_wet) = if distortion > 0.01 {
            (distortion, 1.0)
        } else {
            (0.0, 0.0)
        };

        Self {
            delay_time,
            feedback,
            delay_wet,
            distortion,
            distortion_wet,
            pitch,
            pitch_wet: if pitch.abs() > 0.01 { 1.0 } else { 0.0 },
            gain: path.volume() * ctx.gain,
            pan: ((path.pan() + ctx.pan) / 12.0).clamp(-1.0, 1.0),
        }
    }

    /// Writes in chain order: delay, distortion, pitch, volume, pan.
    pub fn apply<C: EffectChain + ?Sized>(&self, chain: &mut C) {
        if let Some(t) = self.delay_time {
            chain.set_delay_time(t);
        }
        if let Some(fb) = self.feedback {
            chain.set_feedback(fb);
        }
        chain.set_delay_wet(self.delay_wet);
        chain.set_distortion(self.distortion);
        chain.set_distortion_wet(self.distortion_wet);
        chain.set_pitch(self.pitch);
        chain.set_pitch_wet(self.pitch_wet);
        chain.set_gain(self.gain);
        chain.set_pan(self.pan);
    }
}

/// Last start time per sample name, shared by all paths.
#[derive(Debug, Clone, Default)]
pub struct TriggerTimes {
    last: HashMap<String, f64>,
}

impl TriggerTimes {
    /// Earliest start at or after `requested` that keeps `sample`'s starts
    /// strictly increasing by at least `epsilon`. Records the result.
    pub fn schedule(&mut self, sample: &str, requested: f64, now: f64, epsilon: f64) -> f64 {
        let mut start = requested.max(now + epsilon);
        if let Some(&last) = self.last.get(sample) {
            start = start.max(last + epsilon);
        }
        self.last.insert(sample.to_string(), start);
        start
    }

    pub fn last(&self, sample: &str) -> Option<f64> {
        self.last.get(sample).copied()
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}
