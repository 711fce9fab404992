/// Axial hex coordinates and direction math
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six hex neighbour directions.
///
/// The declaration order is the search order used everywhere a deterministic
/// walk over neighbours is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    East,
    NorthEast,
    North,
    West,
    SouthWest,
    South,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::East,
        Direction::NorthEast,
        Direction::North,
        Direction::West,
        Direction::SouthWest,
        Direction::South,
    ];

    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::East => (1, 0),
            Direction::NorthEast => (1, -1),
            Direction::North => (0, -1),
            Direction::West => (-1, 0),
            Direction::SouthWest => (-1, 1),
            Direction::South => (0, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub q: i32,
    pub r: i32,
}

impl Coord {
    pub const ORIGIN: Coord = Coord { q: 0, r: 0 };

    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// Third cube coordinate, implied by `q + r + s == 0`.
    pub fn s(self) -> i32 {
        -self.q - self.r
    }

    pub fn step(self, direction: Direction) -> Coord {
        let (dq, dr) = direction.offset();
        Coord::new(self.q + dq, self.r + dr)
    }

    /// Neighbours in [`Direction::ALL`] order.
    pub fn neighbors(self) -> [Coord; 6] {
        Direction::ALL.map(|d| self.step(d))
    }

    pub fn distance(self, other: Coord) -> u32 {
        let dq = (self.q - other.q).unsigned_abs();
        let dr = (self.r - other.r).unsigned_abs();
        let ds = (self.s() - other.s()).unsigned_abs();
        dq.max(dr).max(ds)
    }

    pub fn is_adjacent(self, other: Coord) -> bool {
        self.distance(other) == 1
    }

    /// All coordinates within `radius` steps, including `self`.
    pub fn within(self, radius: u32) -> Vec<Coord> {
        let n = radius as i32;
        let mut out = Vec::new();
        for dq in -n..=n {
            let r_min = (-n).max(-dq - n);
            let r_max = n.min(-dq + n);
            for dr in r_min..=r_max {
                out.push(Coord::new(self.q + dq, self.r + dr));
            }
        }
        out
    }
}

impl From<(i32, i32)> for Coord {
    fn from((q, r): (i32, i32)) -> Self {
        Coord::new(q, r)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.q, self.r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbors_follow_direction_order() {
        let n = Coord::ORIGIN.neighbors();
        assert_eq!(n[0], Coord::new(1, 0));
        assert_eq!(n[1], Coord::new(1, -1));
        assert_eq!(n[2], Coord::new(0, -1));
        assert_eq!(n[3], Coord::new(-1, 0));
        assert_eq!(n[4], Coord::new(-1, 1));
        assert_eq!(n[5], Coord::new(0, 1));
    }

    #[test]
    fn test_distance() {
        assert_eq!(Coord::new(2, 0).distance(Coord::ORIGIN), 2);
        assert_eq!(Coord::new(1, -1).distance(Coord::ORIGIN), 1);
        assert_eq!(Coord::new(2, -1).distance(Coord::new(-1, 2)), 3);
        for n in Coord::new(3, -2).neighbors() {
            assert!(n.is_adjacent(Coord::new(3, -2)));
        }
    }

    #[test]
    fn test_within_counts() {
        assert_eq!(Coord::ORIGIN.within(0).len(), 1);
        assert_eq!(Coord::ORIGIN.within(1).len(), 7);
        assert_eq!(Coord::ORIGIN.within(3).len(), 37);
    }
}
