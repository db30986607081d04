use crate::terrain::{HeightField, TerrainQuery};
use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

/// One settlement as supplied by the external settlement provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub position: Vec3,
    pub population: u32,
    pub importance: f32,
}

impl Settlement {
    pub fn new(position: Vec3, population: u32, importance: f32) -> Self {
        Self {
            position,
            population,
            importance,
        }
    }

    /// Demand contribution used for road class breakpoints
    pub fn demand(&self) -> f32 {
        self.population as f32 * self.importance.max(0.0)
    }
}

/// External collaborator interface: lists the settlements roads must serve
pub trait SettlementProvider {
    fn list(&self) -> Vec<Settlement>;
}

/// In-memory provider for tests and the generator binary
#[derive(Debug, Clone, Default)]
pub struct StaticSettlements {
    settlements: Vec<Settlement>,
}

impl StaticSettlements {
    pub fn new(settlements: Vec<Settlement>) -> Self {
        Self { settlements }
    }
}

impl SettlementProvider for StaticSettlements {
    fn list(&self) -> Vec<Settlement> {
        self.settlements.clone()
    }
}

/// Scatter settlements onto suitable ground for demo worlds.
///
/// Candidate positions are drawn from a seeded ring sweep around the map
/// center and accepted when dry, gently sloped, and clear of earlier picks.
pub fn scatter_settlements(
    field: &HeightField,
    count: u32,
    seed: u64,
    max_slope_deg: f32,
) -> Vec<Settlement> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut settlements: Vec<Settlement> = Vec::new();

    let (min_x, min_z, max_x, max_z) = field.world_bounds();
    let extent = (max_x - min_x).min(max_z - min_z) * 0.5;
    let min_spacing = extent * 0.25 / (count.max(1) as f32).sqrt();

    let mut attempts = 0;
    const MAX_ATTEMPTS: u32 = 4000;

    while settlements.len() < count as usize && attempts < MAX_ATTEMPTS {
        attempts += 1;

        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = rng.gen_range(0.0..extent * 0.85);
        let x = angle.cos() * distance;
        let z = angle.sin() * distance;

        let Some(height) = field.height_at(x, z) else {
            continue;
        };
        if field.is_water_at(x, z) {
            continue;
        }
        let Some(slope) = field.slope_deg_at(x, z) else {
            continue;
        };
        if slope > max_slope_deg {
            continue;
        }
        if settlements
            .iter()
            .any(|s| (s.position.x - x).hypot(s.position.z - z) < min_spacing)
        {
            continue;
        }

        let population = rng.gen_range(500..50_000);
        let importance = rng.gen_range(0.2..1.0);
        settlements.push(Settlement::new(
            Vec3::new(x, height, z),
            population,
            importance,
        ));
    }

    if settlements.len() < count as usize {
        warn!(
            "Only placed {} of {} requested settlements after {} attempts",
            settlements.len(),
            count,
            attempts
        );
    }

    settlements
}
