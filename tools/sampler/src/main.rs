/// Point sampler: scatters random points inside each polygon, reads the
/// raster bands under every point and writes the points as GeoJSON.
///
/// The output is the `--points` input of the classifier, so sampling can be
/// inspected or reused across classification runs.
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use polychrome_core::config::{band_fields, PipelineConfig, DEFAULT_BAND_PREFIX};
use polychrome_core::extract::extract_values;
use polychrome_core::persist::{read_polygons, write_sample_points, PointSchema};
use polychrome_core::raster::load_tiff;
use polychrome_core::sampler::{sample_polygons, InsetBuffer, RandomPointGenerator};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sampler",
    about = "Place random sample points in polygons and read raster band values at each point"
)]
struct Args {
    /// Polygon dataset (GeoJSON FeatureCollection)
    #[arg(long)]
    polygons: PathBuf,

    /// Multi-band raster (TIFF with a .tfw/.wld world file)
    #[arg(long)]
    raster: PathBuf,

    /// World file, if not next to the raster
    #[arg(long)]
    world_file: Option<PathBuf>,

    /// No-data value, overriding the one stored in the TIFF
    #[arg(long)]
    nodata: Option<f32>,

    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Points per unit area
    #[arg(long, conflicts_with = "points_per_polygon")]
    density: Option<f64>,

    /// Fixed number of points per polygon
    #[arg(long)]
    points_per_polygon: Option<u32>,

    /// Minimum distance between points of one polygon
    #[arg(long)]
    min_spacing: Option<f64>,

    /// Inward buffer applied before sampling
    #[arg(long)]
    buffer: Option<f64>,

    /// Seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Number of raster bands to read
    #[arg(long)]
    bands: Option<NonZeroUsize>,

    /// Prefix of the band value fields
    #[arg(long, default_value = DEFAULT_BAND_PREFIX)]
    band_prefix: String,

    /// Polygon id field
    #[arg(long)]
    id_field: Option<String>,

    /// Output GeoJSON
    #[arg(short, long, default_value = "sample_points.geojson")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(d) = args.density {
        cfg.point_density = Some(d);
        cfg.fixed_point_count = None;
    }
    if let Some(n) = args.points_per_polygon {
        cfg.fixed_point_count = Some(n);
        cfg.point_density = None;
    }
    if let Some(s) = args.min_spacing {
        cfg.min_point_spacing = s;
    }
    if let Some(b) = args.buffer {
        cfg.buffer_distance = b;
    }
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }
    if let Some(f) = args.id_field {
        cfg.polygon_id_field = f;
    }
    let mut cfg = cfg.validate().context("Invalid configuration")?;
    // Legend fields play no part in sampling, so the band count is free here.
    let bands = args.bands.map_or(cfg.channel_count(), NonZeroUsize::get);
    if args.bands.is_some() || args.band_prefix != DEFAULT_BAND_PREFIX {
        cfg.channel_field_names = band_fields(&args.band_prefix, bands);
    }

    let (polygons, skipped) = read_polygons(&args.polygons, &cfg.polygon_id_field)
        .with_context(|| format!("Cannot read polygons from {}", args.polygons.display()))?;
    let raster = load_tiff(&args.raster, args.world_file.as_deref(), args.nodata)
        .with_context(|| format!("Cannot load raster {}", args.raster.display()))?;

    let mut generator = RandomPointGenerator::new(cfg.sampler.seed, cfg.sampler.max_tries_per_point);
    let sampled = sample_polygons(&polygons, &cfg.sampler, &InsetBuffer, &mut generator)?;
    let points = extract_values(&sampled.points, &raster, cfg.channel_count())?;

    let schema = PointSchema {
        polygon_id_field: cfg.polygon_id_field.clone(),
        channel_fields: cfg.channel_field_names.clone(),
    };
    write_sample_points(&args.output, &points, &schema)
        .with_context(|| format!("Cannot write {}", args.output.display()))?;

    let valid = points.iter().filter(|p| p.is_valid()).count();
    let n_skipped = skipped.len() + sampled.skipped.len();
    if n_skipped > 0 {
        warn!(polygons = n_skipped, "polygons skipped");
    }
    info!(
        polygons = polygons.len(),
        points = points.len(),
        valid,
        output = %args.output.display(),
        "sampling complete"
    );
    Ok(())
}
