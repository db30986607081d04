use crate::config::RoadConfig;
use crate::graph::cost_millis;
use crate::terrain::TerrainQuery;
use bevy::prelude::*;
use pathfinding::prelude::astar;
use serde::{Deserialize, Serialize};

/// One sample of a concrete route, not yet renderable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPoint {
    pub position: Vec3,
    pub ground_height: f32,
    pub slope_deg: f32,
    pub water: bool,
}

/// Ordered terrain-aware route between two planned endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePath {
    pub points: Vec<PathPoint>,
}

impl RoutePath {
    pub fn length(&self) -> f32 {
        self.points
            .windows(2)
            .map(|w| w[0].position.distance(w[1].position))
            .sum()
    }
}

/// Result of one routing attempt
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    Found { path: RoutePath, relaxed: bool },
    /// Search space exhausted even after the relaxed retry; the edge is
    /// skipped, never faked with a straight line through bad terrain
    NoRoute,
}

/// Coarse search grid over the corridor between two endpoints.
///
/// The corridor bounds running time; the cell size coarsens deterministically
/// when the corridor would exceed the configured cell budget.
#[derive(Debug, Clone, Copy)]
struct Corridor {
    min_x: f32,
    min_z: f32,
    cols: i32,
    rows: i32,
    cell: f32,
}

impl Corridor {
    fn new(start: Vec3, goal: Vec3, config: &RoadConfig) -> Self {
        let margin = config.corridor_margin;
        let min_x = start.x.min(goal.x) - margin;
        let max_x = start.x.max(goal.x) + margin;
        let min_z = start.z.min(goal.z) - margin;
        let max_z = start.z.max(goal.z) + margin;

        let mut cell = config.cell_size;
        let span_x = max_x - min_x;
        let span_z = max_z - min_z;
        let cells = (span_x / cell) * (span_z / cell);
        if cells > config.max_corridor_cells as f32 {
            cell *= (cells / config.max_corridor_cells as f32).sqrt();
        }

        Self {
            min_x,
            min_z,
            cols: (span_x / cell).ceil() as i32 + 1,
            rows: (span_z / cell).ceil() as i32 + 1,
            cell,
        }
    }

    fn contains(&self, ix: i32, iz: i32) -> bool {
        ix >= 0 && iz >= 0 && ix < self.cols && iz < self.rows
    }

    fn center(&self, ix: i32, iz: i32) -> (f32, f32) {
        (
            self.min_x + (ix as f32 + 0.5) * self.cell,
            self.min_z + (iz as f32 + 0.5) * self.cell,
        )
    }

    fn snap(&self, p: Vec3) -> (i32, i32) {
        (
            (((p.x - self.min_x) / self.cell - 0.5).round() as i32).clamp(0, self.cols - 1),
            (((p.z - self.min_z) / self.cell - 0.5).round() as i32).clamp(0, self.rows - 1),
        )
    }
}

/// Terrain cost field parameters for one search attempt
struct CostModel {
    max_slope_deg: f32,
    impassable_ratio: f32,
    allow_bridges: bool,
    bridge_toll: f32,
}

impl CostModel {
    fn strict(config: &RoadConfig) -> Self {
        Self {
            max_slope_deg: config.max_slope_deg,
            impassable_ratio: 1.5,
            allow_bridges: config.allow_bridges,
            bridge_toll: config.bridge_cost_multiplier * config.cell_size,
        }
    }

    /// Relaxed retry after exhaustion: caps are doubled, bridges stay as
    /// configured (a disallowed bridge never becomes allowed)
    fn relaxed(config: &RoadConfig) -> Self {
        Self {
            max_slope_deg: config.max_slope_deg * 2.0,
            impassable_ratio: 1.5,
            allow_bridges: config.allow_bridges,
            bridge_toll: config.bridge_cost_multiplier * config.cell_size,
        }
    }

    /// Traversal cost of stepping onto a cell, `None` when impassable.
    /// Slope cost grows cubically and cuts off past the impassable ratio;
    /// entering water from land pays the flat bridge toll so the optimizer
    /// prefers short, necessary crossings.
    fn step_cost(
        &self,
        step_len: f32,
        slope_deg: f32,
        from_water: bool,
        to_water: bool,
    ) -> Option<u64> {
        let ratio = slope_deg / self.max_slope_deg;
        if ratio > self.impassable_ratio {
            return None;
        }
        let mut cost = step_len * (1.0 + 4.0 * ratio * ratio * ratio);
        if to_water {
            if !self.allow_bridges {
                return None;
            }
            cost *= 2.0;
            if !from_water {
                cost += self.bridge_toll;
            }
        }
        Some(cost_millis(cost))
    }
}

/// Computes concrete terrain-aware routes for planned edges.
///
/// Identical inputs produce a bit-identical path: costs are integer-scaled,
/// neighbor expansion order is fixed, and no unseeded randomness exists.
pub struct Pathfinder<'a, T: TerrainQuery> {
    terrain: &'a T,
    config: &'a RoadConfig,
}

impl<'a, T: TerrainQuery> Pathfinder<'a, T> {
    pub fn new(terrain: &'a T, config: &'a RoadConfig) -> Self {
        Self { terrain, config }
    }

    pub fn find_route(&self, start: Vec3, goal: Vec3) -> RouteOutcome {
        let corridor = Corridor::new(start, goal, self.config);

        if let Some(path) = self.search(&corridor, start, goal, &CostModel::strict(self.config)) {
            return RouteOutcome::Found {
                path,
                relaxed: false,
            };
        }

        debug!(
            "Route exhausted between ({:.0},{:.0}) and ({:.0},{:.0}); retrying relaxed",
            start.x, start.z, goal.x, goal.z
        );
        if let Some(path) = self.search(&corridor, start, goal, &CostModel::relaxed(self.config)) {
            return RouteOutcome::Found {
                path,
                relaxed: true,
            };
        }

        warn!(
            "No route between ({:.0},{:.0}) and ({:.0},{:.0}) after relaxed retry",
            start.x, start.z, goal.x, goal.z
        );
        RouteOutcome::NoRoute
    }

    fn search(
        &self,
        corridor: &Corridor,
        start: Vec3,
        goal: Vec3,
        model: &CostModel,
    ) -> Option<RoutePath> {
        const DIRECTIONS: [(i32, i32); 8] = [
            (-1, 0),
            (1, 0),
            (0, -1),
            (0, 1),
            (-1, -1),
            (1, 1),
            (-1, 1),
            (1, -1),
        ];

        let start_cell = corridor.snap(start);
        let goal_cell = corridor.snap(goal);
        let (gx, gz) = corridor.center(goal_cell.0, goal_cell.1);

        let successors = |&(ix, iz): &(i32, i32)| {
            let (x, z) = corridor.center(ix, iz);
            let from_water = self.terrain.is_water_at(x, z);
            let mut out = Vec::with_capacity(8);
            for (dx, dz) in DIRECTIONS {
                let (nx, nz) = (ix + dx, iz + dz);
                if !corridor.contains(nx, nz) {
                    continue;
                }
                let (wx, wz) = corridor.center(nx, nz);
                // Endpoint cells are always enterable so a settlement on a
                // steep knoll still gets its road
                if (nx, nz) == goal_cell {
                    let step = if dx != 0 && dz != 0 {
                        corridor.cell * std::f32::consts::SQRT_2
                    } else {
                        corridor.cell
                    };
                    out.push(((nx, nz), cost_millis(step)));
                    continue;
                }
                let Some(slope) = self.terrain.slope_deg_at(wx, wz) else {
                    continue;
                };
                let to_water = self.terrain.is_water_at(wx, wz);
                let step = if dx != 0 && dz != 0 {
                    corridor.cell * std::f32::consts::SQRT_2
                } else {
                    corridor.cell
                };
                if let Some(cost) = model.step_cost(step, slope, from_water, to_water) {
                    out.push(((nx, nz), cost));
                }
            }
            out
        };

        let heuristic = |&(ix, iz): &(i32, i32)| {
            let (x, z) = corridor.center(ix, iz);
            cost_millis(((x - gx).powi(2) + (z - gz).powi(2)).sqrt())
        };

        let (cells, _cost) = astar(&start_cell, successors, heuristic, |c| *c == goal_cell)?;
        Some(self.assemble(corridor, start, goal, &cells))
    }

    fn assemble(
        &self,
        corridor: &Corridor,
        start: Vec3,
        goal: Vec3,
        cells: &[(i32, i32)],
    ) -> RoutePath {
        let mut points: Vec<PathPoint> = Vec::with_capacity(cells.len());
        for (i, &(ix, iz)) in cells.iter().enumerate() {
            let (mut x, mut z) = corridor.center(ix, iz);
            // Endpoints snap back to the exact settlement positions
            if i == 0 {
                x = start.x;
                z = start.z;
            } else if i == cells.len() - 1 {
                x = goal.x;
                z = goal.z;
            }
            let ground = self.terrain.height_at(x, z).unwrap_or(0.0);
            let slope = self.terrain.slope_deg_at(x, z).unwrap_or(0.0);
            points.push(PathPoint {
                position: Vec3::new(x, ground, z),
                ground_height: ground,
                slope_deg: slope,
                water: self.terrain.is_water_at(x, z),
            });
        }
        if points.len() == 1 {
            // Degenerate single-cell route: keep both endpoints
            let ground = self.terrain.height_at(goal.x, goal.z).unwrap_or(0.0);
            points.push(PathPoint {
                position: Vec3::new(goal.x, ground, goal.z),
                ground_height: ground,
                slope_deg: 0.0,
                water: self.terrain.is_water_at(goal.x, goal.z),
            });
        }
        RoutePath { points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::HeightField;

    fn flat_terrain() -> HeightField {
        HeightField::flat(256, 256, 4.0, 0.0).unwrap()
    }

    /// Terrain with a square lake centered at the origin.
    /// Everything else is flat dry land at height 5.
    fn lake_terrain(lake_half_cells: i32) -> HeightField {
        let size = 256u32;
        let mut heights = Vec::with_capacity((size * size) as usize);
        let mid = size as i32 / 2;
        for z in 0..size as i32 {
            for x in 0..size as i32 {
                let in_lake =
                    (x - mid).abs() < lake_half_cells && (z - mid).abs() < lake_half_cells;
                heights.push(if in_lake { -10.0 } else { 5.0 });
            }
        }
        HeightField::new(size, size, heights, 4.0, 0.0).unwrap()
    }

    /// Terrain with a sheer north-south cliff wall at x=0, with a gap opening
    /// far to the north
    fn cliff_terrain() -> HeightField {
        let size = 256u32;
        let mut heights = Vec::with_capacity((size * size) as usize);
        for z in 0..size as i32 {
            for x in 0..size as i32 {
                let wall = (x - 128).abs() < 2 && z > 40;
                heights.push(if wall { 200.0 } else { 0.0 });
            }
        }
        HeightField::new(size, size, heights, 4.0, -100.0).unwrap()
    }

    #[test]
    fn test_straight_route_on_flat_ground() {
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let pathfinder = Pathfinder::new(&terrain, &config);

        let start = Vec3::new(-200.0, 0.0, 0.0);
        let goal = Vec3::new(200.0, 0.0, 0.0);
        match pathfinder.find_route(start, goal) {
            RouteOutcome::Found { path, relaxed } => {
                assert!(!relaxed);
                assert!(path.points.len() >= 2);
                assert_eq!(path.points[0].position.x, start.x);
                assert_eq!(path.points.last().unwrap().position.x, goal.x);
                // Flat ground: route should be within a few percent of the chord
                assert!(path.length() < 440.0, "length {}", path.length());
            }
            RouteOutcome::NoRoute => panic!("flat route must exist"),
        }
    }

    #[test]
    fn test_route_never_crosses_water_without_bridges() {
        let terrain = lake_terrain(20);
        let config = RoadConfig {
            allow_bridges: false,
            ..Default::default()
        };
        let pathfinder = Pathfinder::new(&terrain, &config);

        let start = Vec3::new(-300.0, 5.0, 0.0);
        let goal = Vec3::new(300.0, 5.0, 0.0);
        match pathfinder.find_route(start, goal) {
            RouteOutcome::Found { path, .. } => {
                for p in &path.points {
                    assert!(!p.water, "route sampled a water cell at {:?}", p.position);
                }
                // Detour around the lake is longer than the chord
                assert!(path.length() > 600.0);
            }
            RouteOutcome::NoRoute => panic!("land detour around the lake exists"),
        }
    }

    /// Terrain split by a north-south river covering the whole map
    fn river_terrain(river_half_cells: i32) -> HeightField {
        let size = 256u32;
        let mut heights = Vec::with_capacity((size * size) as usize);
        for _z in 0..size as i32 {
            for x in 0..size as i32 {
                let in_river = (x - 128).abs() < river_half_cells;
                heights.push(if in_river { -10.0 } else { 5.0 });
            }
        }
        HeightField::new(size, size, heights, 4.0, 0.0).unwrap()
    }

    #[test]
    fn test_bridge_crossing_allowed_when_configured() {
        // The river spans every corridor the search could take, so the only
        // way across is over water
        let terrain = river_terrain(10);
        let config = RoadConfig::default();
        let pathfinder = Pathfinder::new(&terrain, &config);

        let start = Vec3::new(-300.0, 5.0, 0.0);
        let goal = Vec3::new(300.0, 5.0, 0.0);
        match pathfinder.find_route(start, goal) {
            RouteOutcome::Found { path, relaxed } => {
                assert!(!relaxed);
                assert!(path.points.iter().any(|p| p.water));
            }
            RouteOutcome::NoRoute => panic!("bridged route must exist"),
        }
    }

    #[test]
    fn test_no_route_on_sealed_island() {
        // Settlement ringed by water, bridges off: both attempts exhaust
        let size = 128u32;
        let mut heights = Vec::with_capacity((size * size) as usize);
        for z in 0..size as i32 {
            for x in 0..size as i32 {
                let island = (x - 64).abs() < 4 && (z - 64).abs() < 4;
                let far_land = (x - 64).abs() > 40 || (z - 64).abs() > 40;
                heights.push(if island || far_land { 5.0 } else { -10.0 });
            }
        }
        let terrain = HeightField::new(size, size, heights, 4.0, 0.0).unwrap();
        let config = RoadConfig {
            allow_bridges: false,
            ..Default::default()
        };
        let pathfinder = Pathfinder::new(&terrain, &config);

        let outcome = pathfinder.find_route(Vec3::new(0.0, 5.0, 0.0), Vec3::new(220.0, 5.0, 0.0));
        assert!(matches!(outcome, RouteOutcome::NoRoute));
    }

    #[test]
    fn test_cliff_forces_detour() {
        let terrain = cliff_terrain();
        let config = RoadConfig::default();
        let pathfinder = Pathfinder::new(&terrain, &config);

        // Cliff wall sits between the endpoints; the gap opens to the north
        let start = Vec3::new(-120.0, 0.0, -300.0);
        let goal = Vec3::new(120.0, 0.0, -300.0);
        match pathfinder.find_route(start, goal) {
            RouteOutcome::Found { path, .. } => {
                for p in &path.points[1..path.points.len() - 1] {
                    assert!(
                        p.slope_deg < config.max_slope_deg * 1.5,
                        "route climbed impassable slope {} at {:?}",
                        p.slope_deg,
                        p.position
                    );
                }
                // Must detour toward the gap rather than go straight
                assert!(path.length() > 260.0);
            }
            RouteOutcome::NoRoute => panic!("detour through the cliff gap exists"),
        }
    }

    #[test]
    fn test_route_is_deterministic() {
        let terrain = lake_terrain(12);
        let config = RoadConfig {
            seed: 7,
            ..Default::default()
        };
        let pathfinder = Pathfinder::new(&terrain, &config);
        let start = Vec3::new(-250.0, 5.0, 30.0);
        let goal = Vec3::new(250.0, 5.0, -30.0);

        let RouteOutcome::Found { path: a, .. } = pathfinder.find_route(start, goal) else {
            panic!("route exists");
        };
        let RouteOutcome::Found { path: b, .. } = pathfinder.find_route(start, goal) else {
            panic!("route exists");
        };
        assert_eq!(a.points.len(), b.points.len());
        for (pa, pb) in a.points.iter().zip(&b.points) {
            assert_eq!(pa.position, pb.position);
        }
    }

    #[test]
    fn test_identical_endpoints_yield_two_point_path() {
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let pathfinder = Pathfinder::new(&terrain, &config);
        let p = Vec3::new(10.0, 0.0, 10.0);
        match pathfinder.find_route(p, p) {
            RouteOutcome::Found { path, .. } => assert_eq!(path.points.len(), 2),
            RouteOutcome::NoRoute => panic!("trivial route must exist"),
        }
    }
}
