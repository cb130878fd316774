//! Pipeline orchestrator: runs the stages in order, each one materialising a
//! new collection from the previous stage's output.
//!
//!   1. Sampling      polygons → sample points
//!   2. Extraction    sample points → points with band values
//!   3. Distances     readings × legend → retained distances
//!   4. Classification  aggregates → one category per polygon
//!
//! A [`CancelFlag`] is checked before each stage, never inside one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::aggregate::{aggregate_polygons, PolygonAggregate};
use crate::classify::{classify_all, ClassificationResult};
use crate::config::ValidatedConfig;
use crate::distance::{compute_distances, PointDistance};
use crate::error::{Error, Result};
use crate::extract::extract_values;
use crate::legend::Legend;
use crate::persist::{write_classified, ClassifiedOutput};
use crate::polygon::PolygonRecord;
use crate::raster::RasterSampler;
use crate::report::RunSummary;
use crate::sample::SamplePoint;
use crate::sampler::{sample_polygons, PointGenerator, PolygonBuffer};

/// Cooperative cancellation shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `HHh:MMm:SSs`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}h:{:02}m:{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Everything a run produced, stage by stage.
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub points: Vec<SamplePoint>,
    pub distances: Vec<PointDistance>,
    pub aggregates: Vec<PolygonAggregate>,
    pub results: Vec<ClassificationResult>,
    pub summary: RunSummary,
}

pub struct Pipeline<'a> {
    config: &'a ValidatedConfig,
    cancel: CancelFlag,
    started: Instant,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ValidatedConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
            started: Instant::now(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Time since the pipeline was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn checkpoint(&self, stage: &'static str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(stage));
        }
        Ok(())
    }

    fn stage_done(&self, stage: &str) {
        info!(elapsed = %format_duration(self.started.elapsed()), "{stage} done");
    }

    fn check_legend(&self, legend: &Legend) -> Result<()> {
        if legend.channel_count() != self.config.channel_count() {
            return Err(Error::config(format!(
                "legend has {} channels but {} channel fields are configured",
                legend.channel_count(),
                self.config.channel_count()
            )));
        }
        Ok(())
    }

    /// Sample points in `polygons`, read their colours from `raster` and
    /// classify.
    pub fn run(
        &self,
        polygons: &[PolygonRecord],
        legend: &Legend,
        raster: &dyn RasterSampler,
        buffer: &dyn PolygonBuffer,
        generator: &mut dyn PointGenerator,
    ) -> Result<PipelineRun> {
        self.check_legend(legend)?;

        self.checkpoint("sampling")?;
        let sampled = sample_polygons(polygons, &self.config.sampler, buffer, generator)?;
        info!(points = sampled.points.len(), skipped = sampled.skipped.len(), "sample points placed");
        self.stage_done("sampling");

        self.checkpoint("extraction")?;
        let points = extract_values(&sampled.points, raster, self.config.channel_count())?;
        self.stage_done("extraction");

        let mut run = self.classify_points(polygons, legend, points)?;
        run.summary.skipped.splice(0..0, sampled.skipped);
        Ok(run)
    }

    /// Classify polygons from already sampled points.
    pub fn classify_points(
        &self,
        polygons: &[PolygonRecord],
        legend: &Legend,
        points: Vec<SamplePoint>,
    ) -> Result<PipelineRun> {
        self.check_legend(legend)?;

        self.checkpoint("distances")?;
        let distances = compute_distances(&points, legend, self.config.threshold);
        info!(records = distances.len(), threshold = self.config.threshold.value(), "distances computed");
        self.stage_done("distances");

        self.checkpoint("classification")?;
        let usable: Vec<_> = polygons
            .iter()
            .filter(|p| p.check_geometry().is_ok())
            .map(|p| &p.id)
            .collect();
        let aggregates = aggregate_polygons(usable, &points, &distances, legend);
        let results = classify_all(&aggregates);
        self.stage_done("classification");

        let mut summary = RunSummary {
            polygons_in: polygons.len(),
            sample_points: points.len(),
            valid_points: points.iter().filter(|p| p.is_valid()).count(),
            matching_records: distances.len(),
            ..RunSummary::default()
        };
        summary.record_results(&results, legend);

        Ok(PipelineRun { points, distances, aggregates, results, summary })
    }

    /// Persist a finished run to the configured output path.
    pub fn write(&self, run: &PipelineRun, polygons: &[PolygonRecord], legend: &Legend) -> Result<usize> {
        let out = ClassifiedOutput {
            polygons,
            results: &run.results,
            legend,
            aggregates: self.config.write_statistics.then_some(run.aggregates.as_slice()),
            id_field: &self.config.polygon_id_field,
        };
        let n = write_classified(&self.config.output_path, &out)?;
        self.stage_done("writing");
        Ok(n)
    }
}
