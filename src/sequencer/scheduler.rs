/// Step scheduler - per-path playheads driven by one shared tick
///
/// Each tick reads the registry once, advances every active path by its own
/// speed, and hands the steps that survive the gates to the audio backend.
/// Paths of different lengths stay phase-aligned because every playhead is
/// derived from the same transport origin.
use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use tracing::{debug, trace, warn};

use super::effects::{BranchEffect, BranchKind, UtilityKind};
use super::pipeline::{self, ChainSettings, PlaybackContext, TriggerTimes};
use super::registry::{Path, Registry};
use crate::audio::{AudioBackend, VoiceRequest};
use crate::config::EngineConfig;
use crate::grid::PathId;

use super::clock::{Clock, ClockHandle, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Running,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub active: usize,
    pub triggered: usize,
    pub empty_steps: usize,
    pub gated: usize,
    pub cancelled: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    step_duration: f64,
    lookahead: f64,
    trigger_epsilon: f64,
    duration_epsilon: f64,
    min_duration: f64,
}

impl From<&EngineConfig> for Timing {
    fn from(config: &EngineConfig) -> Self {
        Self {
            step_duration: config.step_duration(),
            lookahead: config.lookahead,
            trigger_epsilon: config.trigger_epsilon,
            duration_epsilon: config.duration_epsilon,
            min_duration: config.min_duration,
        }
    }
}

pub struct Scheduler {
    state: TransportState,
    handle: Option<ClockHandle>,
    timing: Timing,
    indices: BTreeMap<PathId, usize>,
    /// Steps elapsed on the shared transport, counted from time zero.
    transport_step: u64,
    /// Fractional step left over from each path's speed multiplier.
    speed_carry: HashMap<PathId, f64>,
    trigger_times: TriggerTimes,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: TransportState::Stopped,
            handle: None,
            timing: Timing::from(config),
            indices: BTreeMap::new(),
            transport_step: 0,
            speed_carry: HashMap::new(),
            trigger_times: TriggerTimes::default(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TransportState::Running
    }

    pub fn step_duration(&self) -> f64 {
        self.timing.step_duration
    }

    /// Current step of every path.
    pub fn indices(&self) -> &BTreeMap<PathId, usize> {
        &self.indices
    }

    pub fn index_of(&self, path: PathId) -> Option<usize> {
        self.indices.get(&path).copied()
    }

    pub fn trigger_times(&self) -> &TriggerTimes {
        &self.trigger_times
    }

    /// True when `tick` belongs to the live repeating callback.
    pub fn accepts(&self, tick: &Tick) -> bool {
        self.is_running() && self.handle == Some(tick.handle)
    }

    /// Transport steps elapsed at time `now`.
    fn steps_at(&self, now: f64) -> u64 {
        if self.timing.step_duration <= 0.0 {
            return 0;
        }
        (now.max(0.0) / self.timing.step_duration).floor() as u64
    }

    fn aligned_index(&self, len: usize) -> usize {
        (self.transport_step % len.max(1) as u64) as usize
    }

    pub fn start<C: Clock + ?Sized>(&mut self, registry: &Registry, clock: &mut C) {
        if self.is_running() {
            return;
        }
        self.trigger_times.clear();
        self.speed_carry.clear();

        let now = clock.now();
        self.transport_step = self.steps_at(now);
        self.indices = registry
            .paths()
            .map(|p| (p.id(), self.aligned_index(p.len())))
            .collect();

        self.handle = Some(clock.schedule_repeating(self.timing.step_duration));
        self.state = TransportState::Running;
        debug!(now, paths = self.indices.len(), "scheduler started");
    }

    pub fn stop<C: Clock + ?Sized, B: AudioBackend>(&mut self, clock: &mut C, backend: &mut B) {
        if !self.is_running() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            clock.cancel(handle);
        }
        backend.stop_all();
        for index in self.indices.values_mut() {
            *index = 0;
        }
        self.trigger_times.clear();
        self.speed_carry.clear();
        self.state = TransportState::Stopped;
        debug!("scheduler stopped");
    }

    /// Applies a tempo change, moving the repeating callback to the new
    /// step length when running.
    pub fn retime<C: Clock + ?Sized>(&mut self, config: &EngineConfig, clock: &mut C) {
        self.timing = Timing::from(config);
        if let Some(handle) = self.handle.take() {
            clock.cancel(handle);
            self.handle = Some(clock.schedule_repeating(self.timing.step_duration));
        }
    }

    /// Brings the playhead table in line with the registry: new paths join
    /// in phase with the transport, deleted paths are dropped.
    pub fn sync_paths(&mut self, registry: &Registry) {
        self.indices.retain(|id, _| registry.path(*id).is_some());
        self.speed_carry.retain(|id, _| registry.path(*id).is_some());
        for path in registry.paths() {
            let aligned = if self.is_running() {
                self.aligned_index(path.len())
            } else {
                0
            };
            let index = self.indices.entry(path.id()).or_insert(aligned);
            *index %= path.len().max(1);
        }
    }

    /// Speed multiplier for this tick: the path's `Speed` utility when valid,
    /// capped at the path length.
    fn speed_multiplier(registry: &Registry, path: &Path) -> f64 {
        let rate = match registry
            .find_branch(path.id(), BranchKind::Utility(UtilityKind::Speed))
            .map(|b| b.effect())
        {
            Some(BranchEffect::Speed { rate }) if rate.is_finite() && rate > 0.0 => rate,
            _ => 1.0,
        };
        rate.min(path.len() as f64)
    }

    /// Moves a path's playhead forward. Returns the new index.
    fn advance(&mut self, path: &Path, multiplier: f64) -> usize {
        let len = path.len().max(1);
        let carry = self.speed_carry.entry(path.id()).or_insert(0.0);
        let total = multiplier + *carry;
        let steps = total.floor();
        *carry = total - steps;
        let index = self.indices.entry(path.id()).or_insert(0);
        *index = (*index + steps as usize) % len;
        *index
    }

    /// Runs one step for every active path at transport time `now`.
    pub fn tick<B, R>(
        &mut self,
        registry: &Registry,
        backend: &mut B,
        chains: &mut HashMap<PathId, B::Chain>,
        rng: &mut R,
        now: f64,
    ) -> TickReport
    where
        B: AudioBackend,
        R: Rng,
    {
        let mut report = TickReport::default();
        self.transport_step += 1;
        let any_solo = registry.paths().any(Path::solo);
        let timing = self.timing;

        for path in registry.paths() {
            if any_solo && !path.solo() {
                continue;
            }
            if path.bypass() {
                continue;
            }
            report.active += 1;

            let len = path.len();
            let index = self.indices.get(&path.id()).copied().unwrap_or(0) % len.max(1);
            let multiplier = Self::speed_multiplier(registry, path);

            let sample = registry
                .grid()
                .get(path.sequence()[index])
                .and_then(|hex| hex.sample_name.clone());

            // advance together with the trigger decision so a stop between
            // ticks never leaves a playhead moved without its step attempted
            self.advance(path, multiplier);

            let Some(sample) = sample else {
                report.empty_steps += 1;
                continue;
            };
            if pipeline::gate_fails(rng, path.probability()) {
                report.gated += 1;
                continue;
            }

            let ctx = PlaybackContext::new(now, timing.lookahead);
            let ctx = pipeline::fold_utilities(ctx, registry.branches_of(path.id()), timing.step_duration, rng);
            if ctx.cancelled {
                report.cancelled += 1;
                continue;
            }

            let duration = ctx.duration.unwrap_or_else(|| {
                pipeline::total_duration(
                    len,
                    index,
                    timing.step_duration,
                    ctx.speed_rate,
                    timing.duration_epsilon,
                    timing.min_duration,
                )
            });

            if let Some(chain) = chains.get_mut(&path.id()) {
                ChainSettings::for_trigger(path, &ctx, rng).apply(chain);
            }

            let start_time = self
                .trigger_times
                .schedule(&sample, ctx.trigger_time, now, timing.trigger_epsilon);
            let voice = VoiceRequest {
                path: path.id(),
                sample: &sample,
                start_time,
                offset: 0.0,
                duration,
            };
            match backend.start_voice(&voice) {
                Ok(()) => {
                    report.triggered += 1;
                    trace!(path = %path.id(), index, %sample, start_time, duration, "triggered");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(path = %path.id(), %sample, error = %err, "voice start failed");
                }
            }
        }
        report
    }
}
