/// Route search over a hex board
///
/// Plain breadth-first search: every edge costs one step and neighbours are
/// expanded in [`Direction::ALL`](super::Direction::ALL) order, so equal-length
/// routes always resolve the same way. An unreachable goal is an empty route,
/// never an error.
use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;

use super::{Coord, Hex, HexGrid};

/// Hexes no new route may touch: committed path hexes, branch anchors, and
/// everything within `reservation_radius` of a path's terminal hex. The main
/// hex is shared by every path and never falls inside a terminal buffer.
pub fn blocked_set<I>(grid: &HexGrid, terminals: I, reservation_radius: u32) -> HashSet<Coord>
where
    I: IntoIterator<Item = Coord>,
{
    let mut blocked: HashSet<Coord> = grid
        .iter()
        .filter(|h| h.is_path || h.path_id.is_some() || h.branch_id.is_some())
        .map(Hex::coord)
        .collect();
    for terminal in terminals {
        blocked.extend(
            terminal
                .within(reservation_radius)
                .into_iter()
                .filter(|c| grid.get(*c).is_some_and(|h| !h.is_main_hex)),
        );
    }
    blocked
}

/// Hexes a route may pass through between its endpoints.
fn passable(hex: &Hex, blocked: &HashSet<Coord>) -> bool {
    !hex.is_reserved_terrain() && !hex.is_occupied() && !blocked.contains(&hex.coord())
}

/// Shortest route from `start` to `goal`, both inclusive.
///
/// The endpoints are exempt from the terrain and occupancy exclusions (a route
/// may end on the main hex) but not from `blocked`.
pub fn find_route(grid: &HexGrid, start: Coord, goal: Coord, blocked: &HashSet<Coord>) -> Vec<Coord> {
    if !grid.contains(start) || !grid.contains(goal) {
        return Vec::new();
    }
    if blocked.contains(&start) || blocked.contains(&goal) {
        return Vec::new();
    }
    if start == goal {
        return vec![start];
    }

    let mut came_from: HashMap<Coord, Coord> = HashMap::new();
    let mut queue = VecDeque::new();
    came_from.insert(start, start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        if current == goal {
            break;
        }
        for next in current.neighbors() {
            if came_from.contains_key(&next) {
                continue;
            }
            let Some(hex) = grid.get(next) else {
                continue;
            };
            if next != goal && !passable(hex, blocked) {
                continue;
            }
            came_from.insert(next, current);
            queue.push_back(next);
        }
    }

    if !came_from.contains_key(&goal) {
        trace!(%start, %goal, "no route");
        return Vec::new();
    }

    let mut route = vec![goal];
    let mut cursor = goal;
    while cursor != start {
        cursor = came_from[&cursor];
        route.push(cursor);
    }
    route.reverse();
    route
}

/// A hex that can be the first hex of a new path.
fn usable_entry(grid: &HexGrid, coord: Coord, blocked: &HashSet<Coord>) -> bool {
    grid.get(coord)
        .is_some_and(|h| h.is_outer_ring && passable(h, blocked))
}

/// Shortest route to `goal` from any unused outer-ring entry point.
///
/// Ties go to the entry that comes first in board enumeration order.
pub fn select_candidate(grid: &HexGrid, goal: Coord, blocked: &HashSet<Coord>) -> Vec<Coord> {
    match grid.get(goal) {
        Some(hex) if passable(hex, blocked) => {}
        _ => return Vec::new(),
    }

    let mut best: Vec<Coord> = Vec::new();
    for entry in grid.outer_ring() {
        if !usable_entry(grid, entry, blocked) {
            continue;
        }
        let route = find_route(grid, entry, goal, blocked);
        if route.is_empty() {
            continue;
        }
        if best.is_empty() || route.len() < best.len() {
            best = route;
        }
    }
    best
}

/// True when some unused outer-ring hex can still reach the main hex.
pub fn can_commit_more_paths(grid: &HexGrid, blocked: &HashSet<Coord>) -> bool {
    let Some(main) = grid.main_hex() else {
        return false;
    };
    grid.outer_ring()
        .into_iter()
        .filter(|&entry| usable_entry(grid, entry, blocked))
        .any(|entry| !find_route(grid, entry, main, blocked).is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::PathId;

    fn c(q: i32, r: i32) -> Coord {
        Coord::new(q, r)
    }

    #[test]
    fn test_scenario_three_hex_route() {
        let mut grid = HexGrid::hexagon(2);
        for coord in grid.outer_ring() {
            grid.set_outer_ring(coord, coord == c(2, 0)).unwrap();
        }
        let route = find_route(&grid, c(2, 0), c(0, 0), &HashSet::new());
        assert_eq!(route, vec![c(2, 0), c(1, 0), c(0, 0)]);
    }

    #[test]
    fn test_route_is_deterministic() {
        let grid = HexGrid::hexagon(4);
        let blocked: HashSet<Coord> = [c(1, 0), c(0, 1)].into_iter().collect();
        let a = find_route(&grid, c(4, -2), c(-3, 3), &blocked);
        let b = find_route(&grid, c(4, -2), c(-3, 3), &blocked);
        assert!(!a.is_empty());
        assert_eq!(a, b);
        assert_eq!(a.len() as u32, c(4, -2).distance(c(-3, 3)) + 1);
    }

    #[test]
    fn test_equal_length_tie_break_prefers_earlier_direction() {
        // Two shortest routes from (0,0) to (1,1): via (1,0) east first, or via (0,1).
        let grid = HexGrid::from_coords(Coord::ORIGIN.within(2));
        let route = find_route(&grid, c(0, 0), c(1, 1), &HashSet::new());
        assert_eq!(route, vec![c(0, 0), c(1, 0), c(1, 1)]);
    }

    #[test]
    fn test_route_avoids_flags_and_blocked() {
        let mut grid = HexGrid::from_coords([c(0, 0), c(1, 0), c(2, 0), c(1, -1), c(2, -1)]);
        grid.set_hidden(c(1, 0), true).unwrap();
        let route = find_route(&grid, c(0, 0), c(2, 0), &HashSet::new());
        assert_eq!(route, vec![c(0, 0), c(1, -1), c(2, -1), c(2, 0)]);

        let blocked: HashSet<Coord> = [c(2, -1)].into_iter().collect();
        assert!(find_route(&grid, c(0, 0), c(2, 0), &blocked).is_empty());
    }

    #[test]
    fn test_unknown_or_blocked_endpoints() {
        let grid = HexGrid::hexagon(1);
        assert!(find_route(&grid, c(5, 5), c(0, 0), &HashSet::new()).is_empty());
        let blocked: HashSet<Coord> = [c(0, 0)].into_iter().collect();
        assert!(find_route(&grid, c(1, 0), c(0, 0), &blocked).is_empty());
        assert_eq!(find_route(&grid, c(1, 0), c(1, 0), &HashSet::new()), vec![c(1, 0)]);
    }

    #[test]
    fn test_blocked_set_includes_reservation_buffer() {
        let mut grid = HexGrid::hexagon(3);
        grid.claim_for_path(c(3, 0), PathId(1));
        grid.claim_for_path(c(2, 0), PathId(1));
        let blocked = blocked_set(&grid, [c(2, 0)], 1);
        assert!(blocked.contains(&c(3, 0)));
        for n in c(2, 0).neighbors() {
            assert!(blocked.contains(&n));
        }
        assert!(!blocked.contains(&c(0, 0)));
        // buffer never leaks off the board
        assert!(blocked.iter().all(|b| grid.contains(*b)));
    }

    #[test]
    fn test_terminal_buffer_spares_main_hex() {
        let mut grid = HexGrid::hexagon(4);
        let route = [c(4, 0), c(3, 0), c(2, 0), c(1, 0)];
        for coord in route {
            grid.claim_for_path(coord, PathId(0));
        }
        let blocked = blocked_set(&grid, [c(1, 0)], 1);
        assert!(!blocked.contains(&Coord::ORIGIN));
        assert!(blocked.contains(&c(1, -1)));
        assert!(blocked.contains(&c(0, 1)));
        assert!(can_commit_more_paths(&grid, &blocked));
        assert_eq!(find_route(&grid, c(-4, 0), Coord::ORIGIN, &blocked).len(), 5);
    }

    #[test]
    fn test_select_candidate_picks_shortest_entry() {
        let grid = HexGrid::hexagon(3);
        let route = select_candidate(&grid, c(2, 0), &HashSet::new());
        assert_eq!(route.len(), 2);
        assert_eq!(route.last(), Some(&c(2, 0)));
        assert_eq!(route[0].distance(Coord::ORIGIN), 3);
        // (2,1), (3,-1) and (3,0) are all one step away; (2,1) enumerates first
        assert_eq!(route[0], c(2, 1));
    }

    #[test]
    fn test_select_candidate_rejects_occupied_goal() {
        let mut grid = HexGrid::hexagon(2);
        grid.claim_for_path(c(1, 0), PathId(1));
        assert!(select_candidate(&grid, c(1, 0), &HashSet::new()).is_empty());
        assert!(select_candidate(&grid, Coord::ORIGIN, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_can_commit_more_paths() {
        let grid = HexGrid::hexagon(2);
        assert!(can_commit_more_paths(&grid, &HashSet::new()));

        // wall off the main hex completely
        let blocked: HashSet<Coord> = Coord::ORIGIN.neighbors().into_iter().collect();
        assert!(!can_commit_more_paths(&grid, &blocked));

        let no_main = HexGrid::from_coords(Coord::ORIGIN.within(2));
        assert!(!can_commit_more_paths(&no_main, &HashSet::new()));
    }
}
