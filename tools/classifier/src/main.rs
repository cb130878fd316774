/// Polygon colour classifier: assigns each polygon the legend category whose
/// reference colour best matches the raster values sampled inside it.
///
/// Either samples the raster itself (`--raster`) or reuses points written by
/// the sampler (`--points`). Writes the classified polygons as GeoJSON and
/// prints the class distribution.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use polychrome_core::config::PipelineConfig;
use polychrome_core::legend::{load_legend, LegendSchema};
use polychrome_core::persist::{read_polygons, read_sample_points, PointSchema};
use polychrome_core::pipeline::{format_duration, Pipeline};
use polychrome_core::raster::load_tiff;
use polychrome_core::sampler::{InsetBuffer, RandomPointGenerator};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "classifier",
    about = "Classify polygons by the legend colour closest to their sampled raster values"
)]
struct Args {
    /// Polygon dataset (GeoJSON FeatureCollection)
    #[arg(long)]
    polygons: PathBuf,

    /// Legend table (JSON array of objects with id, label and colour fields)
    #[arg(long)]
    legend: PathBuf,

    /// Multi-band raster to sample (TIFF with a .tfw/.wld world file)
    #[arg(long, required_unless_present = "points", conflicts_with = "points")]
    raster: Option<PathBuf>,

    /// Pre-sampled points written by `sampler`
    #[arg(long)]
    points: Option<PathBuf>,

    /// World file, if not next to the raster
    #[arg(long)]
    world_file: Option<PathBuf>,

    /// No-data value, overriding the one stored in the TIFF
    #[arg(long)]
    nodata: Option<f32>,

    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Colour distance below which a point matches a category
    #[arg(long)]
    threshold: Option<f64>,

    /// Points per unit area
    #[arg(long, conflicts_with = "points_per_polygon")]
    density: Option<f64>,

    /// Fixed number of points per polygon
    #[arg(long)]
    points_per_polygon: Option<u32>,

    /// Inward buffer applied before sampling
    #[arg(long)]
    buffer: Option<f64>,

    /// Seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Add per-category statistics to the output
    #[arg(long)]
    stats: bool,

    /// Also print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Output GeoJSON (overrides the config's output_path)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    // ── Configuration ────────────────────────────────────────────────────────

    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(t) = args.threshold {
        cfg.distance_threshold = t;
    }
    if let Some(d) = args.density {
        cfg.point_density = Some(d);
        cfg.fixed_point_count = None;
    }
    if let Some(n) = args.points_per_polygon {
        cfg.fixed_point_count = Some(n);
        cfg.point_density = None;
    }
    if let Some(b) = args.buffer {
        cfg.buffer_distance = b;
    }
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }
    if args.stats {
        cfg.write_statistics = true;
    }
    if let Some(out) = &args.output {
        cfg.output_path = out.clone();
    }
    let cfg = cfg.validate().context("Invalid configuration")?;

    // ── Inputs ───────────────────────────────────────────────────────────────

    let (polygons, mut skipped) = read_polygons(&args.polygons, &cfg.polygon_id_field)
        .with_context(|| format!("Cannot read polygons from {}", args.polygons.display()))?;
    let (legend, legend_skipped) = load_legend(&args.legend, &LegendSchema::from_config(&cfg))
        .with_context(|| format!("Cannot read legend from {}", args.legend.display()))?;
    skipped.extend(legend_skipped);
    info!(polygons = polygons.len(), categories = legend.len(), "inputs loaded");

    // ── Run ──────────────────────────────────────────────────────────────────

    let pipeline = Pipeline::new(&cfg);
    let mut run = match (&args.points, &args.raster) {
        (Some(points_path), _) => {
            let schema = PointSchema {
                polygon_id_field: cfg.polygon_id_field.clone(),
                channel_fields: cfg.channel_field_names.clone(),
            };
            let (points, point_skipped) = read_sample_points(points_path, &schema)
                .with_context(|| format!("Cannot read points from {}", points_path.display()))?;
            skipped.extend(point_skipped);
            pipeline.classify_points(&polygons, &legend, points)?
        }
        (None, Some(raster_path)) => {
            let raster = load_tiff(raster_path, args.world_file.as_deref(), args.nodata)
                .with_context(|| format!("Cannot load raster {}", raster_path.display()))?;
            let mut generator =
                RandomPointGenerator::new(cfg.sampler.seed, cfg.sampler.max_tries_per_point);
            pipeline.run(&polygons, &legend, &raster, &InsetBuffer, &mut generator)?
        }
        (None, None) => bail!("either --raster or --points is required"),
    };
    run.summary.skipped.splice(0..0, skipped);

    let written = pipeline
        .write(&run, &polygons, &legend)
        .with_context(|| format!("Cannot write {}", cfg.output_path.display()))?;

    // ── Report ───────────────────────────────────────────────────────────────

    print!("{}", run.summary);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&run.summary)?);
    }
    info!(
        written,
        output = %cfg.output_path.display(),
        elapsed = %format_duration(pipeline.elapsed()),
        "classification complete"
    );
    Ok(())
}
