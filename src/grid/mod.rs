/// Hex board state - coordinates, per-hex attributes and route search
///
/// Hexes are never removed from a board; committing or deleting paths only
/// flips their attributes.
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GridError;

pub mod coord;
pub mod pathfinder;

pub use coord::{Coord, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub u32);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path-{}", self.0)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hex {
    coord: Coord,
    pub(crate) is_path: bool,
    pub is_hidden: bool,
    pub is_outer_ring: bool,
    pub is_main_hex: bool,
    pub is_center_ring: bool,
    pub(crate) is_draft: bool,
    pub(crate) path_id: Option<PathId>,
    pub(crate) branch_id: Option<BranchId>,
    pub sample_name: Option<String>,
}

impl Hex {
    fn new(coord: Coord) -> Self {
        Self {
            coord,
            is_path: false,
            is_hidden: false,
            is_outer_ring: false,
            is_main_hex: false,
            is_center_ring: false,
            is_draft: false,
            path_id: None,
            branch_id: None,
            sample_name: None,
        }
    }

    pub fn coord(&self) -> Coord {
        self.coord
    }

    pub fn is_path(&self) -> bool {
        self.is_path
    }

    pub fn is_draft(&self) -> bool {
        self.is_draft
    }

    pub fn path_id(&self) -> Option<PathId> {
        self.path_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    /// Claimed by a committed path, a branch, or the route being drafted.
    pub fn is_occupied(&self) -> bool {
        self.is_path || self.path_id.is_some() || self.branch_id.is_some() || self.is_draft
    }

    /// Structural exclusions that no route may pass through.
    pub fn is_reserved_terrain(&self) -> bool {
        self.is_hidden || self.is_main_hex || self.is_center_ring
    }

    /// Drop path and branch ownership. Samples and board flags stay.
    fn release(&mut self) {
        self.is_path = false;
        self.is_draft = false;
        self.path_id = None;
        self.branch_id = None;
    }
}

#[derive(Debug, Clone, Default)]
pub struct HexGrid {
    hexes: Vec<Hex>,
    index: HashMap<Coord, usize>,
}

impl HexGrid {
    /// Hexagon-shaped board around the origin. The origin is the main hex and
    /// the outermost ring holds the entry points for new paths.
    pub fn hexagon(radius: u32) -> Self {
        let mut grid = Self::from_coords(Coord::ORIGIN.within(radius));
        for hex in &mut grid.hexes {
            let d = hex.coord.distance(Coord::ORIGIN);
            hex.is_main_hex = d == 0;
            hex.is_outer_ring = radius > 0 && d == radius;
        }
        grid
    }

    /// Board with exactly the given coordinates and no flags set. Duplicate
    /// coordinates are ignored; enumeration order follows first appearance.
    pub fn from_coords<I>(coords: I) -> Self
    where
        I: IntoIterator<Item = Coord>,
    {
        let mut grid = Self::default();
        for coord in coords {
            if grid.index.contains_key(&coord) {
                continue;
            }
            grid.index.insert(coord, grid.hexes.len());
            grid.hexes.push(Hex::new(coord));
        }
        grid
    }

    pub fn len(&self) -> usize {
        self.hexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hexes.is_empty()
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.index.contains_key(&coord)
    }

    pub fn get(&self, coord: Coord) -> Option<&Hex> {
        self.index.get(&coord).map(|&i| &self.hexes[i])
    }

    /// Ownership is only changed through the registry, so this stays in the crate.
    pub(crate) fn get_mut(&mut self, coord: Coord) -> Option<&mut Hex> {
        match self.index.get(&coord) {
            Some(&i) => self.hexes.get_mut(i),
            None => None,
        }
    }

    fn hex_mut(&mut self, coord: Coord) -> Result<&mut Hex, GridError> {
        self.get_mut(coord).ok_or(GridError::UnknownHex(coord))
    }

    /// Hexes in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = &Hex> {
        self.hexes.iter()
    }

    pub fn main_hex(&self) -> Option<Coord> {
        self.hexes.iter().find(|h| h.is_main_hex).map(Hex::coord)
    }

    /// Outer-ring hexes in enumeration order.
    pub fn outer_ring(&self) -> Vec<Coord> {
        self.hexes
            .iter()
            .filter(|h| h.is_outer_ring)
            .map(Hex::coord)
            .collect()
    }

    pub fn set_hidden(&mut self, coord: Coord, value: bool) -> Result<(), GridError> {
        self.hex_mut(coord)?.is_hidden = value;
        Ok(())
    }

    pub fn set_center_ring(&mut self, coord: Coord, value: bool) -> Result<(), GridError> {
        self.hex_mut(coord)?.is_center_ring = value;
        Ok(())
    }

    pub fn set_outer_ring(&mut self, coord: Coord, value: bool) -> Result<(), GridError> {
        self.hex_mut(coord)?.is_outer_ring = value;
        Ok(())
    }

    /// Moves the main-hex flag to `coord`; a board has at most one main hex.
    pub fn set_main(&mut self, coord: Coord) -> Result<(), GridError> {
        if !self.contains(coord) {
            return Err(GridError::UnknownHex(coord));
        }
        for hex in &mut self.hexes {
            hex.is_main_hex = hex.coord == coord;
        }
        Ok(())
    }

    pub fn assign_sample(&mut self, coord: Coord, sample: Option<String>) -> Result<(), GridError> {
        self.hex_mut(coord)?.sample_name = sample;
        Ok(())
    }

    pub(crate) fn set_draft(&mut self, coord: Coord, value: bool) {
        if let Some(hex) = self.get_mut(coord) {
            hex.is_draft = value;
        }
    }

    pub(crate) fn claim_for_path(&mut self, coord: Coord, id: PathId) {
        if let Some(hex) = self.get_mut(coord) {
            hex.is_path = true;
            hex.is_draft = false;
            hex.path_id = Some(id);
        }
    }

    pub(crate) fn claim_for_branch(&mut self, coord: Coord, id: BranchId) {
        if let Some(hex) = self.get_mut(coord) {
            hex.branch_id = Some(id);
        }
    }

    /// Resets every hex that references `path` or one of `branches`.
    pub(crate) fn release_owned(&mut self, path: PathId, branches: &[BranchId]) -> usize {
        let mut released = 0;
        for hex in &mut self.hexes {
            let owns_path = hex.path_id == Some(path);
            let owns_branch = hex.branch_id.is_some_and(|b| branches.contains(&b));
            if owns_path {
                hex.release();
                released += 1;
            } else if owns_branch {
                hex.branch_id = None;
                released += 1;
            }
        }
        released
    }

    pub(crate) fn release_branch(&mut self, branch: BranchId) {
        for hex in &mut self.hexes {
            if hex.branch_id == Some(branch) {
                hex.branch_id = None;
            }
        }
    }

    pub(crate) fn clear_drafts(&mut self) {
        for hex in &mut self.hexes {
            hex.is_draft = false;
        }
    }
}
