//! Sample point placement inside polygons.
//!
//! Two seams stand in for the GIS services the pipeline relies on:
//! [`PolygonBuffer`] shrinks a polygon to the region eligible for samples and
//! [`PointGenerator`] scatters points inside that region.

use geo::{BoundingRect, Contains, Coord, EuclideanDistance, Point, Polygon, Rect};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::SamplerSettings;
use crate::error::{Error, Result};
use crate::polygon::PolygonRecord;
use crate::report::{SkipKind, Skipped};
use crate::sample::SamplePoint;

/// Area eligible for sample points: a polygon minus an inward margin.
#[derive(Debug, Clone)]
pub struct SamplingRegion {
    polygon: Polygon<f64>,
    inset: f64,
    bounds: Rect<f64>,
}

impl SamplingRegion {
    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn contains(&self, p: Point<f64>) -> bool {
        if !self.polygon.contains(&p) {
            return false;
        }
        if self.inset <= 0.0 {
            return true;
        }
        let rings = std::iter::once(self.polygon.exterior()).chain(self.polygon.interiors());
        rings.into_iter().all(|r| p.euclidean_distance(r) >= self.inset)
    }
}

/// Polygon-buffering service. Only inward (negative) buffers are needed.
pub trait PolygonBuffer {
    /// Region left after moving every ring `distance` inward, or `None` when
    /// nothing is left.
    fn buffer(&self, polygon: &Polygon<f64>, distance: f64) -> Result<Option<SamplingRegion>>;
}

/// Inward buffer by rejection: a location qualifies when it lies inside the
/// polygon and at least `distance` from every ring.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsetBuffer;

impl PolygonBuffer for InsetBuffer {
    fn buffer(&self, polygon: &Polygon<f64>, distance: f64) -> Result<Option<SamplingRegion>> {
        let bounds = polygon
            .bounding_rect()
            .ok_or_else(|| Error::service("buffer", "polygon has no extent"))?;
        if bounds.width() <= 2.0 * distance || bounds.height() <= 2.0 * distance {
            return Ok(None);
        }
        let shrunk = Rect::new(
            bounds.min() + Coord { x: distance, y: distance },
            bounds.max() - Coord { x: distance, y: distance },
        );
        Ok(Some(SamplingRegion {
            polygon: polygon.clone(),
            inset: distance,
            bounds: shrunk,
        }))
    }
}

/// Random-point service.
pub trait PointGenerator {
    /// Up to `count` points inside `region`, pairwise at least `min_spacing`
    /// apart. May return fewer when the region is too small to fit them.
    fn generate(
        &mut self,
        region: &SamplingRegion,
        count: usize,
        min_spacing: f64,
    ) -> Result<Vec<Point<f64>>>;
}

/// Uniform rejection sampling inside the region's bounding rectangle.
pub struct RandomPointGenerator {
    rng: StdRng,
    max_tries_per_point: u32,
}

impl RandomPointGenerator {
    pub fn new(seed: Option<u64>, max_tries_per_point: u32) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            max_tries_per_point: max_tries_per_point.max(1),
        }
    }
}

impl PointGenerator for RandomPointGenerator {
    fn generate(
        &mut self,
        region: &SamplingRegion,
        count: usize,
        min_spacing: f64,
    ) -> Result<Vec<Point<f64>>> {
        let b = region.bounds();
        let (min, max) = (b.min(), b.max());
        let mut out: Vec<Point<f64>> = Vec::with_capacity(count);
        let budget = count.saturating_mul(self.max_tries_per_point as usize);
        let spacing2 = min_spacing * min_spacing;

        for _ in 0..budget {
            if out.len() == count {
                break;
            }
            let p = Point::new(
                self.rng.gen_range(min.x..=max.x),
                self.rng.gen_range(min.y..=max.y),
            );
            if !region.contains(p) {
                continue;
            }
            let crowded = spacing2 > 0.0
                && out.iter().any(|q| {
                    let (dx, dy) = (p.x() - q.x(), p.y() - q.y());
                    dx * dx + dy * dy < spacing2
                });
            if !crowded {
                out.push(p);
            }
        }
        Ok(out)
    }
}

/// Sampler output: new points plus the polygons that were left out.
#[derive(Debug, Default)]
pub struct SamplingOutput {
    pub points: Vec<SamplePoint>,
    pub skipped: Vec<Skipped>,
}

/// Place sample points in every usable polygon.
///
/// Invalid geometries are skipped and reported. A polygon whose point count
/// rounds to zero, whose buffered region is empty, or in which the generator
/// could not place a single point gets no points and ends up unclassified.
/// Generator and buffer errors abort the run.
pub fn sample_polygons(
    polygons: &[PolygonRecord],
    settings: &SamplerSettings,
    buffer: &dyn PolygonBuffer,
    generator: &mut dyn PointGenerator,
) -> Result<SamplingOutput> {
    let mut out = SamplingOutput::default();
    let mut next_id = 0u64;

    for poly in polygons {
        if let Err(reason) = poly.check_geometry() {
            warn!(polygon = %poly.id, %reason, "skipping invalid polygon");
            out.skipped.push(Skipped::new(SkipKind::Polygon, poly.id.to_string(), reason));
            continue;
        }

        let count = settings.mode.point_count(poly.area());
        if count == 0 {
            debug!(polygon = %poly.id, area = poly.area(), "area below sampling resolution");
            continue;
        }

        let Some(region) = buffer.buffer(&poly.geometry, settings.buffer_distance)? else {
            warn!(
                polygon = %poly.id,
                buffer = settings.buffer_distance,
                "inward buffer leaves no sampling area"
            );
            continue;
        };

        let locations = generator.generate(&region, count, settings.min_spacing)?;
        if locations.is_empty() {
            // Thin or rotated shapes can pass the bounding-box check and
            // still have no location far enough from every ring.
            warn!(
                polygon = %poly.id,
                buffer = settings.buffer_distance,
                requested = count,
                "no sample point fits inside the buffered polygon"
            );
            continue;
        }
        if locations.len() < count {
            debug!(polygon = %poly.id, placed = locations.len(), requested = count, "fewer points than requested");
        }

        for location in locations {
            let mut p = SamplePoint::new(next_id, poly.id.clone(), location);
            p.attributes = poly.attributes.clone();
            out.points.push(p);
            next_id += 1;
        }
    }
    Ok(out)
}
