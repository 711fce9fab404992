/// Core sequencer logic - paths on a hex board played against one clock
///
/// `Sequencer` ties the pieces together: the registry owns the board and the
/// paths drawn on it, the scheduler walks every path's playhead on each clock
/// tick, and the audio backend receives the resulting voices. It is generic
/// over the clock and the backend so the same engine runs live or offline.
use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, EffectChain};
use crate::config::EngineConfig;
use crate::error::{GridError, RegistryError};
use crate::grid::{pathfinder, BranchId, Coord, HexGrid, PathId};
use crate::Result;

pub mod clock;
pub mod effects;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

pub use clock::{Clock, ClockHandle, ManualClock, ThreadClock, Tick};
pub use effects::{BranchEffect, BranchKind, EffectKind, RandomRange, Randomization, UtilityKind};
pub use registry::{Branch, Path, PathParam, Registry};
pub use scheduler::{Scheduler, TickReport, TransportState};

pub struct Sequencer<C: Clock, B: AudioBackend> {
    config: EngineConfig,
    registry: Registry,
    scheduler: Scheduler,
    clock: C,
    backend: B,
    chains: HashMap<PathId, B::Chain>,
    rng: StdRng,
}

impl<C: Clock, B: AudioBackend> Sequencer<C, B> {
    /// Engine over a hexagon board of `config.grid_radius`.
    pub fn new(config: EngineConfig, clock: C, backend: B) -> Result<Self> {
        let grid = HexGrid::hexagon(config.grid_radius);
        Self::with_grid(config, grid, clock, backend)
    }

    pub fn with_grid(config: EngineConfig, grid: HexGrid, clock: C, backend: B) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(
            bpm = config.bpm,
            hexes = grid.len(),
            seeded = config.seed.is_some(),
            "sequencer ready"
        );

        Ok(Self {
            registry: Registry::new(grid, config.reservation_radius),
            scheduler: Scheduler::new(&config),
            config,
            clock,
            backend,
            chains: HashMap::new(),
            rng,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn grid(&self) -> &HexGrid {
        self.registry.grid()
    }

    /// Board access for attribute toggles (hidden, center ring, ...).
    pub fn grid_mut(&mut self) -> &mut HexGrid {
        self.registry.grid_mut()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn chain(&self, path: PathId) -> Option<&B::Chain> {
        self.chains.get(&path)
    }

    pub fn bpm(&self) -> f64 {
        self.config.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.config.bpm = bpm.clamp(40.0, 240.0);
        self.scheduler.retime(&self.config, &mut self.clock);
        debug!(bpm = self.config.bpm, "tempo changed");
    }

    pub fn assign_sample(&mut self, coord: Coord, sample: Option<String>) -> std::result::Result<(), GridError> {
        self.registry.grid_mut().assign_sample(coord, sample)
    }

    // -- drafting --

    /// Shortest usable route between two hexes, or empty.
    pub fn propose_route(&self, start: Coord, goal: Coord) -> Vec<Coord> {
        pathfinder::find_route(self.registry.grid(), start, goal, &self.registry.blocked())
    }

    /// Shortest route to `goal` from any free outer-ring entry, or empty.
    pub fn propose_candidate(&self, goal: Coord) -> Vec<Coord> {
        pathfinder::select_candidate(self.registry.grid(), goal, &self.registry.blocked())
    }

    pub fn can_commit_more_paths(&self) -> bool {
        pathfinder::can_commit_more_paths(self.registry.grid(), &self.registry.blocked())
    }

    pub fn set_draft(&mut self, route: &[Coord]) {
        self.registry.set_draft(route);
    }

    pub fn clear_draft(&mut self) {
        self.registry.clear_draft();
    }

    // -- registry edits --

    pub fn commit_path(&mut self, route: &[Coord]) -> std::result::Result<PathId, RegistryError> {
        let id = self.registry.commit_path(route)?;
        self.sync_path_effect_chains();
        self.scheduler.sync_paths(&self.registry);
        Ok(id)
    }

    /// Removes a path and its branches, releasing its effect chain.
    pub fn delete_path(&mut self, id: PathId) -> std::result::Result<Vec<BranchId>, RegistryError> {
        let removed = self.registry.delete_path(id)?;
        self.sync_path_effect_chains();
        self.sync_branch_nodes();
        Ok(removed)
    }

    pub fn delete_branch(&mut self, id: BranchId) -> std::result::Result<Branch, RegistryError> {
        let branch = self.registry.delete_branch(id)?;
        self.sync_branch_nodes();
        Ok(branch)
    }

    /// Sets a utility or effect branch value on a path. The neutral value
    /// removes the branch; `Ok(None)` means the path has none of that kind.
    pub fn upsert_utility(
        &mut self,
        path: PathId,
        kind: BranchKind,
        value: f64,
    ) -> std::result::Result<Option<BranchId>, RegistryError> {
        let id = self.registry.upsert_branch(path, BranchEffect::new(kind, value))?;
        self.sync_branch_nodes();
        Ok(id)
    }

    pub fn set_path_param(&mut self, path: PathId, param: PathParam) -> std::result::Result<(), RegistryError> {
        self.registry.set_param(path, param)
    }

    // -- reconciliation --

    /// Creates a chain for every path that lacks one and disposes chains
    /// whose path is gone. Returns how many chains were disposed.
    pub fn sync_path_effect_chains(&mut self) -> usize {
        let stale: Vec<PathId> = self
            .chains
            .keys()
            .copied()
            .filter(|id| self.registry.path(*id).is_none())
            .collect();
        for id in &stale {
            if let Some(mut chain) = self.chains.remove(id) {
                if let Err(err) = chain.dispose() {
                    warn!(path = %id, error = %err, "effect chain dispose failed");
                }
            }
        }

        let missing: Vec<PathId> = self
            .registry
            .paths()
            .map(Path::id)
            .filter(|id| !self.chains.contains_key(id))
            .collect();
        for id in missing {
            let chain = self.backend.create_chain(id);
            self.chains.insert(id, chain);
            debug!(path = %id, "created effect chain");
        }
        stale.len()
    }

    /// Drops per-path playback state left behind by removed paths.
    pub fn sync_branch_nodes(&mut self) {
        self.scheduler.sync_paths(&self.registry);
    }

    // -- transport --

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn start(&mut self) {
        if self.is_playing() {
            return;
        }
        self.sync_path_effect_chains();
        self.scheduler.start(&self.registry, &mut self.clock);
        info!(paths = self.registry.path_count(), "playback started");
    }

    pub fn stop(&mut self) {
        if !self.is_playing() {
            return;
        }
        self.scheduler.stop(&mut self.clock, &mut self.backend);
        self.sync_path_effect_chains();
        info!("playback stopped");
    }

    pub fn toggle_play(&mut self) {
        if self.is_playing() {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Runs one scheduler tick at transport time `now`.
    pub fn tick(&mut self, now: f64) -> TickReport {
        self.scheduler
            .tick(&self.registry, &mut self.backend, &mut self.chains, &mut self.rng, now)
    }

    /// Drains the clock and runs a tick for each one that belongs to the live
    /// transport. Returns the number of ticks run.
    pub fn pump(&mut self) -> usize {
        let ticks = self.clock.poll_ticks();
        self.run_ticks(ticks)
    }

    /// Runs the given ticks, skipping any from a cancelled callback. Each
    /// tick plays at the time it was due, not the time it was drained.
    pub fn run_ticks(&mut self, ticks: Vec<Tick>) -> usize {
        let mut ran = 0;
        for tick in ticks {
            if !self.scheduler.accepts(&tick) {
                continue;
            }
            let report = self.tick(tick.time);
            if report.triggered > 0 || report.failed > 0 {
                debug!(time = tick.time, ?report, "tick");
            }
            ran += 1;
        }
        ran
    }

    /// Current step of every path, for display.
    pub fn playback_indices(&self) -> BTreeMap<PathId, usize> {
        self.scheduler.indices().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ChainParams, VoiceRequest};
    use crate::error::{ChainError, VoiceError};

    #[derive(Default)]
    struct SpyChain {
        params: ChainParams,
    }

    impl EffectChain for SpyChain {
        fn set_delay_time(&mut self, seconds: f64) {
            self.params.delay_time = seconds;
        }
        fn set_feedback(&mut self, amount: f64) {
            self.params.feedback = amount;
        }
        fn set_delay_wet(&mut self, wet: f64) {
            self.params.delay_wet = wet;
        }
        fn set_distortion(&mut self, amount: f64) {
            self.params.distortion = amount;
        }
        fn set_distortion_wet(&mut self, wet: f64) {
            self.params.distortion_wet = wet;
        }
        fn set_pitch(&mut self, semitones: f64) {
            self.params.pitch = semitones;
        }
        fn set_pitch_wet(&mut self, wet: f64) {
            self.params.pitch_wet = wet;
        }
        fn set_gain(&mut self, gain: f64) {
            self.params.gain = gain;
        }
        fn set_pan(&mut self, pan: f64) {
            self.params.pan = pan;
        }
        fn dispose(&mut self) -> std::result::Result<(), ChainError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        voices: usize,
        chains_created: usize,
    }

    impl AudioBackend for CountingBackend {
        type Chain = SpyChain;

        fn start_voice(&mut self, _: &VoiceRequest<'_>) -> std::result::Result<(), VoiceError> {
            self.voices += 1;
            Ok(())
        }

        fn stop_all(&mut self) {}

        fn create_chain(&mut self, _: PathId) -> SpyChain {
            self.chains_created += 1;
            SpyChain::default()
        }
    }

    fn engine() -> Sequencer<ManualClock, CountingBackend> {
        let config = EngineConfig {
            seed: Some(11),
            ..EngineConfig::default()
        };
        Sequencer::new(config, ManualClock::new(), CountingBackend::default()).unwrap()
    }

    #[test]
    fn test_sequencer_creation() {
        let seq = engine();
        assert!(!seq.is_playing());
        assert_eq!(seq.grid().len(), 61);
        assert!(seq.can_commit_more_paths());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            bpm: 500.0,
            ..EngineConfig::default()
        };
        assert!(Sequencer::new(config, ManualClock::new(), CountingBackend::default()).is_err());
    }

    #[test]
    fn test_set_bpm_clamps() {
        let mut seq = engine();
        seq.set_bpm(1000.0);
        assert_eq!(seq.bpm(), 240.0);
        seq.set_bpm(10.0);
        assert_eq!(seq.bpm(), 40.0);
    }

    #[test]
    fn test_commit_creates_chain_and_delete_drops_it() {
        let mut seq = engine();
        let route = seq.propose_candidate(Coord::new(1, 0));
        assert!(!route.is_empty());
        let id = seq.commit_path(&route).unwrap();
        assert!(seq.chain(id).is_some());
        assert_eq!(seq.backend().chains_created, 1);
        assert_eq!(seq.playback_indices().get(&id), Some(&0));

        seq.delete_path(id).unwrap();
        assert!(seq.chain(id).is_none());
        assert!(seq.playback_indices().is_empty());
    }

    #[test]
    fn test_pump_drives_ticks() {
        let mut seq = engine();
        let route = vec![Coord::new(4, 0), Coord::new(3, 0), Coord::new(2, 0)];
        for &c in &route {
            seq.assign_sample(c, Some("hat".into())).unwrap();
        }
        let id = seq.commit_path(&route).unwrap();

        assert_eq!(seq.pump(), 0);
        seq.start();
        assert_eq!(seq.pump(), 1);
        seq.clock_mut().advance(0.5);
        assert_eq!(seq.pump(), 2);
        assert_eq!(seq.backend().voices, 3);
        assert_eq!(seq.playback_indices()[&id], 0);

        seq.stop();
        seq.clock_mut().advance(1.0);
        assert_eq!(seq.pump(), 0);
    }

    #[test]
    fn test_effect_values_reach_chain() {
        let mut seq = engine();
        let route = vec![Coord::new(4, 0), Coord::new(3, 0)];
        seq.assign_sample(route[0], Some("bass".into())).unwrap();
        let id = seq.commit_path(&route).unwrap();
        seq.upsert_utility(id, BranchKind::Effect(EffectKind::PitchShift), 7.0)
            .unwrap();
        seq.set_path_param(id, PathParam::Volume(0.5)).unwrap();

        seq.start();
        seq.pump();
        let params = seq.chain(id).unwrap().params;
        assert_eq!(params.pitch, 7.0);
        assert_eq!(params.pitch_wet, 1.0);
        assert_eq!(params.gain, 0.5);
    }
}
