use crate::errors::{RoadError, RoadResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use validator::Validate;

/// Configuration for a full road-network generation pass.
///
/// All randomized tie-breaking and jitter flows from `seed`; two passes with
/// the same config and terrain produce bit-identical networks.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RoadConfig {
    /// Drives all randomized tie-breaking and jitter
    pub seed: u64,

    /// When false, water cells become impassable instead of tolled
    pub allow_bridges: bool,

    /// Apply smoothing to raw grid paths
    pub smooth: bool,

    /// Base road width in world units, before the class multiplier
    #[validate(range(min = 0.5, max = 50.0))]
    pub width: f32,

    /// Maximum comfortable slope in degrees; cost grows superlinearly past it
    #[validate(range(min = 1.0, max = 85.0))]
    pub max_slope_deg: f32,

    /// Flat toll charged when a route steps from land onto water
    #[validate(range(min = 0.0, max = 1000.0))]
    pub bridge_cost_multiplier: f32,

    /// Pathfinding grid cell size in world units
    #[validate(range(min = 0.5, max = 64.0))]
    pub cell_size: f32,

    /// Margin added around the start-goal chord when sizing the search corridor
    #[validate(range(min = 8.0, max = 2048.0))]
    pub corridor_margin: f32,

    /// Hard bound on corridor cell count; cell size is coarsened to fit
    #[validate(range(min = 256, max = 4_194_304))]
    pub max_corridor_cells: u32,

    /// Moving-average smoothing passes over the raw grid path
    #[validate(range(min = 0, max = 16))]
    pub smoothing_passes: u32,

    /// Maximum lateral drift a smoothed point may take from the raw corridor
    #[validate(range(min = 0.1, max = 64.0))]
    pub lateral_tolerance: f32,

    /// Water crossings shorter than this become fords instead of bridges
    #[validate(range(min = 0.0, max = 512.0))]
    pub ford_min_length: f32,

    /// Bridge deck height above the water surface
    #[validate(range(min = 0.5, max = 30.0))]
    pub bridge_deck_clearance: f32,

    /// Maximum non-MST edges the cost optimizer may add back
    #[validate(range(min = 0, max = 32))]
    pub extra_edge_budget: u32,

    /// A non-MST edge is economically viable when its cost is below this
    /// fraction of the existing network route between its endpoints
    #[validate(range(min = 0.05, max = 0.95))]
    pub extra_edge_viability: f32,

    /// Road surface must sit within this distance of the carved terrain
    #[validate(range(min = 0.001, max = 2.0))]
    pub clearance_epsilon: f32,

    /// Bounded retries for the elevation correction loop
    #[validate(range(min = 1, max = 16))]
    pub carve_max_passes: u32,

    /// Nodes or path crossings closer than this merge into one node
    #[validate(range(min = 0.5, max = 64.0))]
    pub intersection_merge_radius: f32,

    /// Densest cross-section spacing on tight curves
    #[validate(range(min = 0.25, max = 32.0))]
    pub tess_min_step: f32,

    /// Sparsest cross-section spacing on straight runs
    #[validate(range(min = 1.0, max = 128.0))]
    pub tess_max_step: f32,

    /// Combined endpoint demand at or above this yields a highway
    #[validate(range(min = 0.0))]
    pub highway_demand: f32,

    /// Combined endpoint demand below this yields a local road
    #[validate(range(min = 0.0))]
    pub local_demand: f32,
}

impl Default for RoadConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            allow_bridges: true,
            smooth: true,
            width: 4.0,
            max_slope_deg: 30.0,
            bridge_cost_multiplier: 8.0,
            cell_size: 4.0,
            corridor_margin: 120.0,
            max_corridor_cells: 262_144,
            smoothing_passes: 2,
            lateral_tolerance: 6.0,
            ford_min_length: 12.0,
            bridge_deck_clearance: 3.0,
            extra_edge_budget: 2,
            extra_edge_viability: 0.35,
            clearance_epsilon: 0.05,
            carve_max_passes: 4,
            intersection_merge_radius: 6.0,
            tess_min_step: 2.0,
            tess_max_step: 12.0,
            highway_demand: 40_000.0,
            local_demand: 5_000.0,
        }
    }
}

impl RoadConfig {
    /// Validate field ranges plus the cross-field constraints validator
    /// attributes cannot express.
    pub fn validated(self) -> RoadResult<Self> {
        self.validate().map_err(|e| RoadError::InvalidConfig {
            reason: e.to_string(),
        })?;
        if self.tess_min_step > self.tess_max_step {
            return Err(RoadError::InvalidConfig {
                reason: format!(
                    "tess_min_step {} exceeds tess_max_step {}",
                    self.tess_min_step, self.tess_max_step
                ),
            });
        }
        if self.local_demand > self.highway_demand {
            return Err(RoadError::InvalidConfig {
                reason: format!(
                    "local_demand {} exceeds highway_demand {}",
                    self.local_demand, self.highway_demand
                ),
            });
        }
        Ok(self)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> RoadResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RoadError::ConfigFileNotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = fs::read_to_string(path)?;
        let config: RoadConfig = toml::from_str(&contents)?;
        config.validated()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> RoadResult<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }
}
