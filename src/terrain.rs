use crate::errors::{RoadError, RoadResult};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Read-only terrain sampling interface consumed by every pipeline stage.
///
/// Implementations must be side-effect-free: the pathfinder fans out across
/// worker threads and samples concurrently.
pub trait TerrainQuery: Sync {
    /// Interpolated ground height at a world position, `None` outside coverage
    fn height_at(&self, x: f32, z: f32) -> Option<f32>;

    /// Ground slope in degrees at a world position
    fn slope_deg_at(&self, x: f32, z: f32) -> Option<f32>;

    /// Water classification at a world position
    fn is_water_at(&self, x: f32, z: f32) -> bool;
}

/// Heightmap-backed terrain grid.
///
/// Heights are a flattened row-major 2D array, `scale` world units per grid
/// cell, centered around the world origin. Cells at or below `water_level`
/// are classified as water.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HeightField {
    #[validate(range(min = 1, max = 4096))]
    pub width: u32,
    #[validate(range(min = 1, max = 4096))]
    pub height: u32,
    pub heights: Vec<f32>,
    #[validate(range(min = 0.1, max = 100.0))]
    pub scale: f32,
    pub water_level: f32,
}

impl HeightField {
    pub fn new(
        width: u32,
        height: u32,
        heights: Vec<f32>,
        scale: f32,
        water_level: f32,
    ) -> RoadResult<Self> {
        let expected = (width * height) as usize;
        if heights.len() != expected {
            return Err(RoadError::InvalidTerrainData {
                reason: format!(
                    "Heights array size {} does not match dimensions {}x{} (expected {})",
                    heights.len(),
                    width,
                    height,
                    expected
                ),
            });
        }
        let field = Self {
            width,
            height,
            heights,
            scale,
            water_level,
        };
        field
            .validate()
            .map_err(|_| RoadError::InvalidTerrainData {
                reason: "Height field validation failed".to_string(),
            })?;
        Ok(field)
    }

    /// Create flat terrain for testing
    pub fn flat(width: u32, height: u32, scale: f32, base_height: f32) -> RoadResult<Self> {
        let heights = vec![base_height; (width * height) as usize];
        Self::new(width, height, heights, scale, base_height - 100.0)
    }

    /// Convert world coordinates to grid coordinates, accounting for centering
    pub fn world_to_grid(&self, world_x: f32, world_z: f32) -> (f32, f32) {
        let half_w = self.width as f32 * self.scale / 2.0;
        let half_h = self.height as f32 * self.scale / 2.0;
        ((world_x + half_w) / self.scale, (world_z + half_h) / self.scale)
    }

    /// Convert grid coordinates to world coordinates, accounting for centering
    pub fn grid_to_world(&self, grid_x: f32, grid_z: f32) -> (f32, f32) {
        let half_w = self.width as f32 * self.scale / 2.0;
        let half_h = self.height as f32 * self.scale / 2.0;
        (grid_x * self.scale - half_w, grid_z * self.scale - half_h)
    }

    /// Height at an exact grid position (no interpolation)
    pub fn height_at_grid(&self, x: u32, z: u32) -> Option<f32> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.heights.get((z * self.width + x) as usize).copied()
    }

    pub fn set_height_at_grid(&mut self, x: u32, z: u32, value: f32) {
        if x < self.width && z < self.height {
            let index = (z * self.width + x) as usize;
            self.heights[index] = value;
        }
    }

    /// World-space bounds as (min_x, min_z, max_x, max_z)
    pub fn world_bounds(&self) -> (f32, f32, f32, f32) {
        let half_w = self.width as f32 * self.scale / 2.0;
        let half_h = self.height as f32 * self.scale / 2.0;
        (-half_w, -half_h, half_w, half_h)
    }

    fn bilinear(&self, grid_x: f32, grid_z: f32) -> Option<f32> {
        if grid_x < 0.0
            || grid_z < 0.0
            || grid_x >= (self.width - 1) as f32
            || grid_z >= (self.height - 1) as f32
        {
            return None;
        }

        let x0 = grid_x.floor() as u32;
        let z0 = grid_z.floor() as u32;
        let fx = grid_x.fract();
        let fz = grid_z.fract();

        let h00 = self.height_at_grid(x0, z0)?;
        let h10 = self.height_at_grid(x0 + 1, z0)?;
        let h01 = self.height_at_grid(x0, z0 + 1)?;
        let h11 = self.height_at_grid(x0 + 1, z0 + 1)?;

        let h0 = h00 * (1.0 - fx) + h10 * fx;
        let h1 = h01 * (1.0 - fx) + h11 * fx;
        Some(h0 * (1.0 - fz) + h1 * fz)
    }
}

impl TerrainQuery for HeightField {
    fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        let (gx, gz) = self.world_to_grid(x, z);
        self.bilinear(gx, gz)
    }

    fn slope_deg_at(&self, x: f32, z: f32) -> Option<f32> {
        // Central-difference gradient over half a cell in each axis
        let h = self.scale / 2.0;
        let hx0 = self.height_at(x - h, z).or_else(|| self.height_at(x, z))?;
        let hx1 = self.height_at(x + h, z).or_else(|| self.height_at(x, z))?;
        let hz0 = self.height_at(x, z - h).or_else(|| self.height_at(x, z))?;
        let hz1 = self.height_at(x, z + h).or_else(|| self.height_at(x, z))?;

        let dx = (hx1 - hx0) / self.scale;
        let dz = (hz1 - hz0) / self.scale;
        let gradient = (dx * dx + dz * dz).sqrt();
        Some(gradient.atan().to_degrees())
    }

    fn is_water_at(&self, x: f32, z: f32) -> bool {
        self.height_at(x, z)
            .map(|h| h <= self.water_level)
            .unwrap_or(false)
    }
}

/// Noise-based demo heightfields for the generator binary and tests
pub mod presets {
    use super::HeightField;
    use crate::errors::RoadResult;
    use noise::{MultiFractal, NoiseFn, Perlin, RidgedMulti};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TerrainPreset {
        Flat,
        Hills,
        Mountains,
        Valleys,
    }

    impl TerrainPreset {
        pub fn from_name(name: &str) -> Option<Self> {
            match name {
                "flat" => Some(Self::Flat),
                "hills" => Some(Self::Hills),
                "mountains" => Some(Self::Mountains),
                "valleys" => Some(Self::Valleys),
                _ => None,
            }
        }
    }

    pub fn generate(
        preset: TerrainPreset,
        seed: u32,
        width: u32,
        height: u32,
        scale: f32,
    ) -> RoadResult<HeightField> {
        let total = (width * height) as usize;
        let mut heights = Vec::with_capacity(total);

        match preset {
            TerrainPreset::Flat => heights.resize(total, 0.0),
            TerrainPreset::Hills => {
                let perlin = Perlin::new(seed);
                for z in 0..height {
                    for x in 0..width {
                        let wx = x as f64 * scale as f64 * 0.01;
                        let wz = z as f64 * scale as f64 * 0.01;
                        let mut value = 0.0;
                        let mut amplitude = 15.0;
                        let mut frequency = 1.0;
                        for _ in 0..4 {
                            value += perlin.get([wx * frequency, wz * frequency]) * amplitude;
                            amplitude *= 0.5;
                            frequency *= 2.0;
                        }
                        heights.push(value as f32);
                    }
                }
            }
            TerrainPreset::Mountains => {
                let ridged = RidgedMulti::<Perlin>::new(seed)
                    .set_octaves(5)
                    .set_frequency(0.005);
                for z in 0..height {
                    for x in 0..width {
                        let wx = x as f64 * scale as f64;
                        let wz = z as f64 * scale as f64;
                        heights.push((ridged.get([wx, wz]) * 40.0) as f32);
                    }
                }
            }
            TerrainPreset::Valleys => {
                let ridged = RidgedMulti::<Perlin>::new(seed)
                    .set_octaves(4)
                    .set_frequency(0.008);
                for z in 0..height {
                    for x in 0..width {
                        let wx = x as f64 * scale as f64;
                        let wz = z as f64 * scale as f64;
                        heights.push((ridged.get([wx, wz]) * -25.0) as f32);
                    }
                }
            }
        }

        // Water sits below the 20th percentile of generated heights, except on
        // flat terrain which stays dry
        let water_level = match preset {
            TerrainPreset::Flat => -100.0,
            _ => {
                let mut sorted: Vec<f32> = heights.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                sorted[sorted.len() / 5]
            }
        };

        HeightField::new(width, height, heights, scale, water_level)
    }
}

#[cfg(test)]
mod tests {
    use super::presets::{TerrainPreset, generate};
    use super::*;

    #[test]
    fn test_height_field_creation() {
        let field = HeightField::new(2, 2, vec![0.0, 1.0, 2.0, 3.0], 1.0, -10.0).unwrap();
        assert_eq!(field.width, 2);
        assert_eq!(field.heights.len(), 4);
    }

    #[test]
    fn test_height_field_invalid_size() {
        let result = HeightField::new(2, 2, vec![0.0, 1.0, 2.0], 1.0, -10.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_coordinate_round_trip() {
        let field = HeightField::flat(8, 8, 2.0, 0.0).unwrap();
        let (gx, gz) = field.world_to_grid(0.0, 0.0);
        assert_eq!((gx, gz), (4.0, 4.0));
        let (wx, wz) = field.grid_to_world(gx, gz);
        assert_eq!((wx, wz), (0.0, 0.0));
    }

    #[test]
    fn test_bilinear_height_sampling() {
        let heights = vec![
            0.0, 1.0, 2.0, //
            3.0, 4.0, 5.0, //
            6.0, 7.0, 8.0,
        ];
        let field = HeightField::new(3, 3, heights, 1.0, -10.0).unwrap();

        // Exact grid corner
        assert_eq!(field.height_at(-1.5, -1.5), Some(0.0));
        // Center of the grid interpolates the middle cells
        assert_eq!(field.height_at(0.0, 0.0), Some(6.0));
        // Out of bounds
        assert_eq!(field.height_at(-3.0, 0.0), None);
    }

    #[test]
    fn test_slope_on_flat_and_ramp() {
        let flat = HeightField::flat(16, 16, 1.0, 5.0).unwrap();
        let slope = flat.slope_deg_at(0.0, 0.0).unwrap();
        assert!(slope.abs() < 0.01);

        // 45-degree ramp: height rises one unit per unit of x
        let mut heights = Vec::new();
        for _z in 0..16 {
            for x in 0..16 {
                heights.push(x as f32);
            }
        }
        let ramp = HeightField::new(16, 16, heights, 1.0, -10.0).unwrap();
        let slope = ramp.slope_deg_at(0.0, 0.0).unwrap();
        assert!((slope - 45.0).abs() < 1.0, "expected ~45 degrees, got {slope}");
    }

    #[test]
    fn test_water_classification() {
        let mut field = HeightField::flat(8, 8, 1.0, 1.0).unwrap();
        field.water_level = 0.0;
        assert!(!field.is_water_at(0.0, 0.0));
        field.water_level = 2.0;
        assert!(field.is_water_at(0.0, 0.0));
    }

    #[test]
    fn test_presets_deterministic() {
        let a = generate(TerrainPreset::Hills, 42, 32, 32, 4.0).unwrap();
        let b = generate(TerrainPreset::Hills, 42, 32, 32, 4.0).unwrap();
        assert_eq!(a.heights, b.heights);
        assert_eq!(a.water_level, b.water_level);

        let c = generate(TerrainPreset::Hills, 43, 32, 32, 4.0).unwrap();
        assert_ne!(a.heights, c.heights);
    }
}
