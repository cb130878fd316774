//! Colour-space distance between sample readings and legend colours.

use crate::error::{Error, Result};
use crate::legend::Legend;
use crate::sample::SamplePoint;

/// Strictly positive, finite distance cut-off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(Error::config(format!(
                "distance_threshold must be a positive number, got {value}"
            )))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// A retained (point, category) distance below the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointDistance {
    pub point_id: u64,
    pub category_id: i64,
    pub distance: f64,
}

/// Euclidean distance over paired channels. Channel order matters.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn point_distances(point: &SamplePoint, legend: &Legend, threshold: Threshold) -> Vec<PointDistance> {
    let Some(reading) = point.reading() else {
        return Vec::new();
    };
    legend
        .iter()
        .filter_map(|c| {
            let d = euclidean_distance(&reading, &c.color);
            (d < threshold.value()).then_some(PointDistance {
                point_id: point.id,
                category_id: c.id,
                distance: d,
            })
        })
        .collect()
}

/// Distances below `threshold` for every valid point and legend category,
/// in point order then legend order. Points with a missing channel or a
/// channel count different from the legend's produce nothing.
pub fn compute_distances(
    points: &[SamplePoint],
    legend: &Legend,
    threshold: Threshold,
) -> Vec<PointDistance> {
    let usable = |p: &&SamplePoint| p.channels.len() == legend.channel_count();

    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        points
            .par_iter()
            .filter(usable)
            .flat_map_iter(|p| point_distances(p, legend, threshold))
            .collect()
    }
    #[cfg(not(feature = "threading"))]
    {
        points
            .iter()
            .filter(usable)
            .flat_map(|p| point_distances(p, legend, threshold))
            .collect()
    }
}
