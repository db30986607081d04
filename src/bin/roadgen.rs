use clap::Parser;
use roadweaver::config::RoadConfig;
use roadweaver::errors::{RoadError, RoadResult};
use roadweaver::manager::{GeneratedRoads, RoadSystemManager};
use roadweaver::settlement::scatter_settlements;
use roadweaver::terrain::presets::{TerrainPreset, generate};

#[derive(Parser, Clone)]
#[command(name = "roadgen")]
#[command(about = "Generate a road network over procedural terrain")]
struct Args {
    /// Terrain size in grid cells (format: WIDTHxHEIGHT)
    #[arg(long, default_value = "256x256")]
    size: String,

    /// Terrain scale (world units per grid cell)
    #[arg(long, default_value = "4.0")]
    scale: f32,

    /// Terrain type preset (flat, hills, mountains, valleys)
    #[arg(long, default_value = "hills")]
    terrain_type: String,

    /// Number of settlements to scatter
    #[arg(long, default_value = "6")]
    settlements: u32,

    /// Random seed for reproducible generation
    #[arg(long)]
    seed: Option<u64>,

    /// Road generation config file (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<String>,

    /// Output file path for the generated network
    #[arg(long, default_value = "road_network.bin")]
    output: String,

    /// Write the effective config next to the output and exit
    #[arg(long)]
    dump_config: bool,
}

fn parse_size(size: &str) -> RoadResult<(u32, u32)> {
    let parts: Vec<&str> = size.split('x').collect();
    if parts.len() != 2 {
        return Err(RoadError::InvalidConfig {
            reason: format!("Size must be WIDTHxHEIGHT, got '{size}'"),
        });
    }
    let width = parts[0].parse().map_err(|_| RoadError::InvalidConfig {
        reason: format!("Invalid width '{}'", parts[0]),
    })?;
    let height = parts[1].parse().map_err(|_| RoadError::InvalidConfig {
        reason: format!("Invalid height '{}'", parts[1]),
    })?;
    Ok((width, height))
}

fn main() -> RoadResult<()> {
    let args = Args::parse();

    let (width, height) = parse_size(&args.size)?;
    let preset =
        TerrainPreset::from_name(&args.terrain_type).ok_or_else(|| RoadError::InvalidConfig {
            reason: format!(
                "Unknown terrain type '{}' (expected flat, hills, mountains, valleys)",
                args.terrain_type
            ),
        })?;

    let mut config = match &args.config {
        Some(path) => RoadConfig::load_from_file(path)?,
        None => RoadConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    if args.dump_config {
        let path = format!("{}.toml", args.output.trim_end_matches(".bin"));
        config.save_to_file(&path)?;
        println!("Wrote effective config to {path}");
        return Ok(());
    }

    println!("Generating {} terrain: {}x{} at scale {}", args.terrain_type, width, height, args.scale);
    let terrain = generate(preset, config.seed as u32, width, height, args.scale)?;

    let settlements = scatter_settlements(&terrain, args.settlements, config.seed, config.max_slope_deg);
    println!("Placed {} settlements (requested {})", settlements.len(), args.settlements);

    let manager = RoadSystemManager::new(config)?;
    let result = manager.generate(&terrain, &settlements)?;

    result.network.save_to_file(std::path::Path::new(&args.output))?;
    print_summary(&result, &args.output);
    Ok(())
}

fn print_summary(result: &GeneratedRoads, output: &str) {
    let report = &result.report;
    println!("Road network saved to: {output}");
    println!("\nGeneration summary:");
    println!(
        "  Network: {} nodes, {} segments, {:.0} world units of road",
        result.network.nodes.len(),
        result.network.segments.len(),
        result.network.total_length()
    );
    println!(
        "  Routing: {}/{} planned edges routed ({} relaxed, {} unroutable)",
        report.routed, report.planned_edges, report.relaxed_routes, report.no_route_edges
    );
    println!(
        "  Structures: {} bridges, {} fords, {} intersections",
        report.bridge_count, report.ford_count, report.intersections_created
    );
    println!(
        "  Terrain: {} samples carved, {} segments unclamped",
        report.carved_samples, report.unclamped_segments
    );
    println!(
        "  Meshes: {} segment strips, {} junction patches",
        result.meshes.segment_count(),
        result.meshes.junction_count()
    );
    println!(
        "  Navigation: {} nodes, {} directed edges",
        result.nav.node_count(),
        result.nav.edge_count()
    );

    if !report.failures.is_empty() {
        println!("  Recorded failures:");
        for failure in &report.failures {
            println!("    {:?}: {}", failure.settlement, failure.reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("128x64").unwrap(), (128, 64));
        assert!(parse_size("128").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn test_end_to_end_small_map() {
        let terrain = generate(TerrainPreset::Hills, 5, 64, 64, 4.0).unwrap();
        let settlements = scatter_settlements(&terrain, 3, 5, 30.0);
        if settlements.len() < 2 {
            return;
        }
        let manager = RoadSystemManager::new(RoadConfig::default()).unwrap();
        let result = manager.generate(&terrain, &settlements).unwrap();
        assert_eq!(
            result.report.routed + result.report.no_route_edges,
            result.report.planned_edges
        );
    }
}
