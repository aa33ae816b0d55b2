//! Example: acquire elevation for a map area and derive hillshade/contours.
//!
//! Usage: cargo run --example acquire_terrain -- --hillshade --contours -o data/lumsden
//!
//! Defaults to the Lumsden, Aberdeenshire test area.

use clap::Parser;
use localmap_dem::{telemetry, CancelToken, Orchestrator, TerrainConfig, TerrainPipeline, TerrainSettings};
use localmap_geo::BoundingBox;
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "acquire_terrain")]
#[command(about = "Fetch, cache and merge elevation tiles for a bounding box")]
struct Args {
    #[arg(long, default_value_t = 57.37, allow_hyphen_values = true)]
    north: f64,
    #[arg(long, default_value_t = 57.26, allow_hyphen_values = true)]
    south: f64,
    #[arg(long, default_value_t = -2.82, allow_hyphen_values = true)]
    east: f64,
    #[arg(long, default_value_t = -2.95, allow_hyphen_values = true)]
    west: f64,

    /// Elevation source (srtm, aster, os_terrain, eu_dem)
    #[arg(long, default_value = "srtm")]
    source: String,

    /// Edge buffer in kilometres
    #[arg(long, default_value_t = 1.0)]
    buffer_km: f64,

    /// Output resolution in metres
    #[arg(long, default_value_t = 30.0)]
    resolution: f64,

    /// Refuse synthetic terrain when no real data can be obtained
    #[arg(long)]
    no_synthetic: bool,

    #[arg(long)]
    hillshade: bool,

    #[arg(long)]
    contours: bool,

    /// Contour interval in metres
    #[arg(long, default_value_t = 10.0)]
    contour_interval: f64,

    /// Output directory
    #[arg(short, long, default_value = "data")]
    output_dir: PathBuf,

    /// Acquisition config (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
    telemetry::describe_metrics();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => TerrainConfig::load(path)?,
        None => TerrainConfig::default(),
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })?;

    let mut settings = TerrainSettings::default();
    settings.elevation.source = args.source.clone();
    settings.elevation.buffer_km = args.buffer_km;
    settings.elevation.resolution_m = args.resolution;
    settings.elevation.allow_synthetic_fallback = !args.no_synthetic;
    settings.hillshading.enabled = args.hillshade;
    settings.contours.enabled = args.contours;
    settings.contours.interval = args.contour_interval;
    settings.contours.major_interval = args.contour_interval * 5.0;

    let bbox = BoundingBox::new(args.north, args.south, args.east, args.west)?;
    let request = settings.to_request(&bbox, args.output_dir.join("elevation.tif"))?;

    println!("Acquiring {} elevation for {}", args.source, bbox);
    println!("Tile cache: {}", config.cache_dir.display());
    let start = Instant::now();

    let orchestrator = Orchestrator::from_config(&config)?.with_cancel_token(cancel);
    let pipeline = TerrainPipeline::new(orchestrator);
    let outputs = pipeline.run(&request, &settings.derivative_spec(), &args.output_dir)?;

    let report = &outputs.acquisition;
    println!(
        "Elevation: {} ({}, {} m) in {:.2}s",
        report.product.raster_path.display(),
        report.product.source_used,
        report.product.resolution_m,
        start.elapsed().as_secs_f64()
    );
    if let Some(original) = report.substituted_from {
        println!("  {} does not cover this area, substituted", original.name());
    }
    println!(
        "  tiles: {} ({} cached, {} fetched)",
        report.tiles_total, report.cache_hits, report.tiles_fetched
    );

    match &outputs.hillshade {
        Some(Ok(hillshade)) => println!("Hillshade: {} (opacity {})", hillshade.path.display(), hillshade.opacity),
        Some(Err(e)) => println!("Hillshade skipped: {}", e),
        None => {}
    }
    match &outputs.contours {
        Some(Ok(contours)) => println!(
            "Contours: {} (every {} m, major every {} m)",
            contours.path.display(),
            contours.interval_m,
            contours.major_interval_m
        ),
        Some(Err(e)) => println!("Contours skipped: {}", e),
        None => {}
    }

    Ok(())
}
