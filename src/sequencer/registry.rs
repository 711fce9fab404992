/// Path and branch registry - the authoritative session model
///
/// The registry owns the hex board. Every edit that claims or releases hexes
/// goes through here so the board flags and the path table never disagree.
use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use super::effects::{BranchEffect, BranchKind, EffectKind, RandomRange, Randomization};
use crate::error::RegistryError;
use crate::grid::{pathfinder, BranchId, Coord, HexGrid, PathId};

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    id: PathId,
    sequence: Vec<Coord>,
    volume: f64,
    pan: f64,
    chaos: f64,
    distortion: f64,
    pitch_shift: f64,
    probability: f64,
    solo: bool,
    bypass: bool,
    randomization: Randomization,
}

impl Path {
    fn new(id: PathId, sequence: Vec<Coord>) -> Self {
        Self {
            id,
            sequence,
            volume: 1.0,
            pan: 0.0,
            chaos: 0.0,
            distortion: 0.0,
            pitch_shift: 0.0,
            probability: 1.0,
            solo: false,
            bypass: false,
            randomization: Randomization::default(),
        }
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    /// Never empty.
    pub fn sequence(&self) -> &[Coord] {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn terminal(&self) -> Coord {
        self.sequence[self.sequence.len() - 1]
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Pan in dB, `-12..=12`.
    pub fn pan(&self) -> f64 {
        self.pan
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn solo(&self) -> bool {
        self.solo
    }

    pub fn bypass(&self) -> bool {
        self.bypass
    }

    pub fn effect(&self, effect: EffectKind) -> f64 {
        match effect {
            EffectKind::Chaos => self.chaos,
            EffectKind::Distortion => self.distortion,
            EffectKind::PitchShift => self.pitch_shift,
        }
    }

    pub fn randomization(&self) -> &Randomization {
        &self.randomization
    }

    fn set_effect(&mut self, effect: EffectKind, value: f64) {
        let value = BranchKind::Effect(effect).clamp(value);
        match effect {
            EffectKind::Chaos => self.chaos = value,
            EffectKind::Distortion => self.distortion = value,
            EffectKind::PitchShift => self.pitch_shift = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    id: BranchId,
    parent: PathId,
    effect: BranchEffect,
    attached_to: Coord,
    anchor: Coord,
}

impl Branch {
    pub fn id(&self) -> BranchId {
        self.id
    }

    pub fn parent(&self) -> PathId {
        self.parent
    }

    pub fn effect(&self) -> BranchEffect {
        self.effect
    }

    pub fn kind(&self) -> BranchKind {
        self.effect.kind()
    }

    /// The parent's terminal hex at the time the branch was created.
    pub fn attached_to(&self) -> Coord {
        self.attached_to
    }

    /// The hex the branch occupies on the board.
    pub fn anchor(&self) -> Coord {
        self.anchor
    }
}

/// A settable path field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathParam {
    Volume(f64),
    Pan(f64),
    Chaos(f64),
    Distortion(f64),
    PitchShift(f64),
    Probability(f64),
    Solo(bool),
    Bypass(bool),
    Randomization { effect: EffectKind, range: RandomRange },
}

pub struct Registry {
    grid: HexGrid,
    paths: BTreeMap<PathId, Path>,
    branches: Vec<Branch>,
    next_path: u32,
    next_branch: u32,
    reservation_radius: u32,
    draft: Vec<Coord>,
}

impl Registry {
    pub fn new(grid: HexGrid, reservation_radius: u32) -> Self {
        Self {
            grid,
            paths: BTreeMap::new(),
            branches: Vec::new(),
            next_path: 1,
            next_branch: 1,
            reservation_radius,
            draft: Vec::new(),
        }
    }

    pub fn grid(&self) -> &HexGrid {
        &self.grid
    }

    /// Board access for samples and terrain flags. Path and branch claims are
    /// only changed through registry edits.
    pub fn grid_mut(&mut self) -> &mut HexGrid {
        &mut self.grid
    }

    pub fn reservation_radius(&self) -> u32 {
        self.reservation_radius
    }

    /// Paths in creation order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.values()
    }

    pub fn path(&self, id: PathId) -> Option<&Path> {
        self.paths.get(&id)
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// Branches in registration order.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    pub fn branches_of(&self, path: PathId) -> impl Iterator<Item = &Branch> {
        self.branches.iter().filter(move |b| b.parent == path)
    }

    pub fn find_branch(&self, path: PathId, kind: BranchKind) -> Option<&Branch> {
        self.branches_of(path).find(|b| b.kind() == kind)
    }

    pub fn draft(&self) -> &[Coord] {
        &self.draft
    }

    /// Hexes closed to new routes right now.
    pub fn blocked(&self) -> HashSet<Coord> {
        pathfinder::blocked_set(
            &self.grid,
            self.paths.values().map(Path::terminal),
            self.reservation_radius,
        )
    }

    /// Marks `route` as the route being drafted, replacing any earlier draft.
    pub fn set_draft(&mut self, route: &[Coord]) {
        self.clear_draft();
        for &coord in route {
            self.grid.set_draft(coord, true);
        }
        self.draft = route.to_vec();
    }

    pub fn clear_draft(&mut self) {
        self.grid.clear_drafts();
        self.draft.clear();
    }

    /// Re-checks a route against the board as it is now.
    pub fn validate_route(&self, route: &[Coord]) -> Result<(), RegistryError> {
        if route.is_empty() {
            return Err(RegistryError::EmptyRoute);
        }
        let blocked = self.blocked();
        let mut seen = HashSet::new();
        for (i, &coord) in route.iter().enumerate() {
            let hex = self
                .grid
                .get(coord)
                .ok_or(RegistryError::UnknownHex(coord))?;
            if !seen.insert(coord) {
                return Err(RegistryError::RepeatedHex(coord));
            }
            if i > 0 && !route[i - 1].is_adjacent(coord) {
                return Err(RegistryError::NotAdjacent(route[i - 1], coord));
            }
            if hex.is_path || hex.path_id.is_some() || hex.branch_id.is_some() {
                return Err(RegistryError::Occupied(coord));
            }
            if hex.is_reserved_terrain() {
                return Err(RegistryError::Unusable(coord));
            }
            if blocked.contains(&coord) {
                return Err(RegistryError::Reserved(coord));
            }
        }
        Ok(())
    }

    /// Commits `route` as a new path. A route that went stale since it was
    /// drafted is rejected without touching the board.
    pub fn commit_path(&mut self, route: &[Coord]) -> Result<PathId, RegistryError> {
        if let Err(err) = self.validate_route(route) {
            warn!(error = %err, len = route.len(), "rejected path commit");
            return Err(err);
        }

        let id = PathId(self.next_path);
        self.next_path += 1;
        for &coord in route {
            self.grid.claim_for_path(coord, id);
        }
        if self.draft.iter().any(|c| route.contains(c)) {
            self.clear_draft();
        }
        self.paths.insert(id, Path::new(id, route.to_vec()));
        info!(path = %id, len = route.len(), "committed path");
        Ok(id)
    }

    /// Removes a path together with every branch hanging off it. Returns the
    /// removed branch ids.
    pub fn delete_path(&mut self, id: PathId) -> Result<Vec<BranchId>, RegistryError> {
        if self.paths.remove(&id).is_none() {
            return Err(RegistryError::UnknownPath(id));
        }
        let removed: Vec<BranchId> = self.branches_of(id).map(Branch::id).collect();
        self.branches.retain(|b| b.parent != id);
        let released = self.grid.release_owned(id, &removed);
        info!(path = %id, branches = removed.len(), hexes = released, "deleted path");
        Ok(removed)
    }

    pub fn delete_branch(&mut self, id: BranchId) -> Result<Branch, RegistryError> {
        let pos = self
            .branches
            .iter()
            .position(|b| b.id == id)
            .ok_or(RegistryError::UnknownBranch(id))?;
        let branch = self.branches.remove(pos);
        self.grid.release_branch(id);
        if let BranchKind::Effect(effect) = branch.kind() {
            if let Some(path) = self.paths.get_mut(&branch.parent) {
                path.set_effect(effect, 0.0);
            }
        }
        debug!(branch = %id, kind = %branch.kind(), "deleted branch");
        Ok(branch)
    }

    /// Creates or updates the `(path, kind)` branch. A neutral value removes
    /// the branch instead; `Ok(None)` means no branch remains.
    pub fn upsert_branch(
        &mut self,
        path: PathId,
        effect: BranchEffect,
    ) -> Result<Option<BranchId>, RegistryError> {
        let kind = effect.kind();
        let value = effect.value();
        if !value.is_finite() {
            return Err(RegistryError::InvalidValue {
                param: kind.name(),
                value,
            });
        }
        let terminal = self
            .paths
            .get(&path)
            .map(Path::terminal)
            .ok_or(RegistryError::UnknownPath(path))?;
        let effect = BranchEffect::new(kind, kind.clamp(value));

        if let BranchKind::Effect(e) = kind {
            if let Some(p) = self.paths.get_mut(&path) {
                p.set_effect(e, effect.value());
            }
        }

        let existing = self.find_branch(path, kind).map(Branch::id);
        if effect.is_neutral() {
            if let Some(id) = existing {
                self.delete_branch(id)?;
            }
            return Ok(None);
        }

        if let Some(id) = existing {
            if let Some(branch) = self.branches.iter_mut().find(|b| b.id == id) {
                branch.effect = effect;
            }
            debug!(branch = %id, kind = %kind, value = effect.value(), "updated branch");
            return Ok(Some(id));
        }

        let id = BranchId(self.next_branch);
        self.next_branch += 1;
        let anchor = self.free_anchor(terminal);
        if anchor != terminal {
            self.grid.claim_for_branch(anchor, id);
        }
        self.branches.push(Branch {
            id,
            parent: path,
            effect,
            attached_to: terminal,
            anchor,
        });
        debug!(branch = %id, path = %path, kind = %kind, %anchor, "created branch");
        Ok(Some(id))
    }

    /// First unclaimed neighbour of `terminal`, or `terminal` when boxed in.
    fn free_anchor(&self, terminal: Coord) -> Coord {
        terminal
            .neighbors()
            .into_iter()
            .find(|&c| {
                self.grid
                    .get(c)
                    .is_some_and(|h| !h.is_occupied() && !h.is_reserved_terrain())
            })
            .unwrap_or(terminal)
    }

    pub fn set_param(&mut self, id: PathId, param: PathParam) -> Result<(), RegistryError> {
        let check = |name: &'static str, v: f64| {
            if v.is_finite() {
                Ok(v)
            } else {
                Err(RegistryError::InvalidValue { param: name, value: v })
            }
        };

        let path = self.paths.get_mut(&id).ok_or(RegistryError::UnknownPath(id))?;
        let mut effect_update = None;
        match param {
            PathParam::Volume(v) => path.volume = check("volume", v)?.clamp(0.0, 1.0),
            PathParam::Pan(v) => path.pan = check("pan", v)?.clamp(-12.0, 12.0),
            PathParam::Probability(v) => path.probability = check("probability", v)?.clamp(0.0, 1.0),
            PathParam::Chaos(v) => effect_update = Some((EffectKind::Chaos, check("chaos", v)?)),
            PathParam::Distortion(v) => {
                effect_update = Some((EffectKind::Distortion, check("distortion", v)?))
            }
            PathParam::PitchShift(v) => {
                effect_update = Some((EffectKind::PitchShift, check("pitch_shift", v)?))
            }
            PathParam::Solo(on) => {
                path.solo = on;
                if on {
                    path.bypass = false;
                }
            }
            PathParam::Bypass(on) => {
                path.bypass = on;
                if on {
                    path.solo = false;
                }
            }
            PathParam::Randomization { effect, range } => {
                check("random_min", range.min)?;
                check("random_max", range.max)?;
                path.randomization.set(effect, range);
            }
        }

        if let Some((effect, value)) = effect_update {
            path.set_effect(effect, value);
            let stored = path.effect(effect);
            // keep an attached effect branch in step with the field
            let kind = BranchKind::Effect(effect);
            if let Some(existing) = self.find_branch(id, kind).map(Branch::id) {
                if stored.abs() < f64::EPSILON {
                    self.delete_branch(existing)?;
                } else if let Some(branch) = self.branches.iter_mut().find(|b| b.id == existing) {
                    branch.effect = BranchEffect::new(kind, stored);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::effects::UtilityKind;

    fn c(q: i32, r: i32) -> Coord {
        Coord::new(q, r)
    }

    fn registry() -> Registry {
        Registry::new(HexGrid::hexagon(3), 1)
    }

    const SPEED: BranchKind = BranchKind::Utility(UtilityKind::Speed);

    #[test]
    fn test_commit_claims_hexes() {
        let mut reg = registry();
        let id = reg.commit_path(&[c(3, 0), c(2, 0), c(1, 0)]).unwrap();
        let path = reg.path(id).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.terminal(), c(1, 0));
        for coord in path.sequence() {
            let hex = reg.grid().get(*coord).unwrap();
            assert!(hex.is_path);
            assert_eq!(hex.path_id, Some(id));
        }
    }

    #[test]
    fn test_commit_rejects_invalid_routes() {
        let mut reg = registry();
        assert_eq!(reg.commit_path(&[]), Err(RegistryError::EmptyRoute));
        assert_eq!(
            reg.commit_path(&[c(3, 0), c(1, 0)]),
            Err(RegistryError::NotAdjacent(c(3, 0), c(1, 0)))
        );
        assert_eq!(
            reg.commit_path(&[c(9, 9)]),
            Err(RegistryError::UnknownHex(c(9, 9)))
        );
        assert_eq!(
            reg.commit_path(&[c(1, 0), c(0, 0)]),
            Err(RegistryError::Unusable(c(0, 0)))
        );
        assert_eq!(
            reg.commit_path(&[c(2, 0), c(1, 0), c(2, 0)]),
            Err(RegistryError::RepeatedHex(c(2, 0)))
        );
        assert_eq!(reg.path_count(), 0);
        assert!(reg.grid().iter().all(|h| !h.is_occupied()));
    }

    #[test]
    fn test_stale_route_is_rejected() {
        let mut reg = registry();
        let route = vec![c(3, 0), c(2, 0), c(1, 0)];
        reg.set_draft(&route);
        assert!(reg.grid().get(c(2, 0)).unwrap().is_draft);
        // another commit lands on the drafted hexes first
        reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        assert!(reg.draft().is_empty());
        assert_eq!(reg.commit_path(&route), Err(RegistryError::Occupied(c(3, 0))));
    }

    #[test]
    fn test_reservation_buffer_blocks_commit() {
        let mut reg = registry();
        reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        // (2,-1) touches the first path's terminal
        assert_eq!(
            reg.commit_path(&[c(3, -2), c(2, -1)]),
            Err(RegistryError::Reserved(c(2, -1)))
        );
    }

    #[test]
    fn test_no_overlap_between_paths() {
        let mut reg = registry();
        let a = reg.commit_path(&[c(-3, 0), c(-2, 0)]).unwrap();
        let b = reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        let sa: HashSet<_> = reg.path(a).unwrap().sequence().iter().collect();
        let sb: HashSet<_> = reg.path(b).unwrap().sequence().iter().collect();
        assert!(sa.is_disjoint(&sb));
        assert!(reg.commit_path(&[c(-3, 1), c(-2, 0)]).is_err());
    }

    #[test]
    fn test_delete_path_cascades() {
        let mut reg = registry();
        let id = reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        let b1 = reg.upsert_branch(id, BranchEffect::Speed { rate: 2.0 }).unwrap().unwrap();
        let b2 = reg.upsert_branch(id, BranchEffect::Offset { amount: 0.5 }).unwrap().unwrap();
        let anchor = reg.branch(b1).unwrap().anchor();
        assert_ne!(anchor, c(2, 0));
        assert_eq!(reg.grid().get(anchor).unwrap().branch_id, Some(b1));

        let removed = reg.delete_path(id).unwrap();
        assert_eq!(removed, vec![b1, b2]);
        assert!(reg.branches().is_empty());
        assert!(reg.grid().iter().all(|h| !h.is_occupied()));
        assert_eq!(reg.delete_path(id), Err(RegistryError::UnknownPath(id)));
    }

    #[test]
    fn test_upsert_updates_instead_of_duplicating() {
        let mut reg = registry();
        let id = reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        let first = reg.upsert_branch(id, BranchEffect::Speed { rate: 2.0 }).unwrap();
        let second = reg.upsert_branch(id, BranchEffect::Speed { rate: 4.0 }).unwrap();
        assert_eq!(first, second);
        assert_eq!(reg.branches().len(), 1);
        assert_eq!(reg.find_branch(id, SPEED).unwrap().effect().value(), 4.0);
    }

    #[test]
    fn test_neutral_value_removes_branch() {
        let mut reg = registry();
        let id = reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        let branch = reg.upsert_branch(id, BranchEffect::Speed { rate: 2.0 }).unwrap().unwrap();
        let anchor = reg.branch(branch).unwrap().anchor();

        assert_eq!(reg.upsert_branch(id, BranchEffect::Speed { rate: 1.0 }).unwrap(), None);
        assert!(reg.find_branch(id, SPEED).is_none());
        assert!(reg.grid().get(anchor).unwrap().branch_id.is_none());

        // neutral on a path without the branch is a no-op
        assert_eq!(reg.upsert_branch(id, BranchEffect::Offset { amount: 0.0 }).unwrap(), None);
        assert!(reg.branches().is_empty());
    }

    #[test]
    fn test_effect_branch_mirrors_path_field() {
        let mut reg = registry();
        let id = reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        reg.upsert_branch(id, BranchEffect::Chaos { amount: 0.5 }).unwrap();
        assert_eq!(reg.path(id).unwrap().effect(EffectKind::Chaos), 0.5);

        reg.set_param(id, PathParam::Chaos(0.25)).unwrap();
        let kind = BranchKind::Effect(EffectKind::Chaos);
        assert_eq!(reg.find_branch(id, kind).unwrap().effect().value(), 0.25);

        reg.set_param(id, PathParam::Chaos(0.0)).unwrap();
        assert!(reg.find_branch(id, kind).is_none());
    }

    #[test]
    fn test_solo_bypass_exclusive() {
        let mut reg = registry();
        let id = reg.commit_path(&[c(3, 0), c(2, 0)]).unwrap();
        reg.set_param(id, PathParam::Bypass(true)).unwrap();
        reg.set_param(id, PathParam::Solo(true)).unwrap();
        let p = reg.path(id).unwrap();
        assert!(p.solo() && !p.bypass());

        reg.set_param(id, PathParam::Bypass(true)).unwrap();
        let p = reg.path(id).unwrap();
        assert!(p.bypass() && !p.solo());
    }

    #[test]
    fn test_set_param_clamps_and_rejects_nan() {
        let mut reg = registry();
        let id = reg.commit_path(&[c(3, 0)]).unwrap();
        reg.set_param(id, PathParam::Pan(40.0)).unwrap();
        reg.set_param(id, PathParam::Volume(-1.0)).unwrap();
        let p = reg.path(id).unwrap();
        assert_eq!(p.pan(), 12.0);
        assert_eq!(p.volume(), 0.0);
        assert!(matches!(
            reg.set_param(id, PathParam::Probability(f64::NAN)),
            Err(RegistryError::InvalidValue { .. })
        ));
        assert_eq!(
            reg.set_param(PathId(99), PathParam::Solo(true)),
            Err(RegistryError::UnknownPath(PathId(99)))
        );
    }
}
