//! Per-polygon statistics over retained distances.
//!
//! For every (polygon, category) pair:
//!   matching_count  retained distances of that category in the polygon
//!   min / avg       over those distances
//!   match_percent   matching_count × 100 / total_valid
//!   proportion      match_percent − min_distance
//!
//! `proportion` mixes a percentage with a raw colour distance. The weighting
//! is kept as-is; any change to the score needs a product decision.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::distance::PointDistance;
use crate::legend::Legend;
use crate::polygon::FeatureId;
use crate::sample::SamplePoint;

/// Statistics of one legend category inside one polygon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub category_id: i64,
    pub matching_count: usize,
    pub min_distance: Option<f64>,
    pub avg_distance: Option<f64>,
    pub match_percent: Option<f64>,
    /// Undefined (not zero) when nothing matched or no reading was valid.
    pub proportion: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonAggregate {
    pub polygon_id: FeatureId,
    /// Every sample point of the polygon, valid or not.
    pub total_points: usize,
    /// Sample points with a full colour reading.
    pub total_valid: usize,
    /// One entry per legend category, in legend order.
    pub categories: Vec<CategoryStats>,
}

#[derive(Default)]
struct Acc {
    count: usize,
    sum: f64,
    min: f64,
}

impl Acc {
    fn push(&mut self, d: f64) {
        self.min = if self.count == 0 { d } else { self.min.min(d) };
        self.sum += d;
        self.count += 1;
    }
}

struct PolygonAcc {
    total_points: usize,
    total_valid: usize,
    per_category: Vec<Acc>,
}

impl PolygonAcc {
    fn new(categories: usize) -> Self {
        Self {
            total_points: 0,
            total_valid: 0,
            per_category: (0..categories).map(|_| Acc::default()).collect(),
        }
    }
}

fn finish(polygon_id: FeatureId, acc: PolygonAcc, legend: &Legend) -> PolygonAggregate {
    let total_valid = acc.total_valid;
    let categories = legend
        .iter()
        .zip(acc.per_category)
        .map(|(c, a)| {
            let defined = a.count > 0 && total_valid > 0;
            let min_distance = (a.count > 0).then_some(a.min);
            let avg_distance = (a.count > 0).then(|| a.sum / a.count as f64);
            let match_percent = defined.then(|| a.count as f64 * 100.0 / total_valid as f64);
            let proportion = match (match_percent, min_distance) {
                (Some(pct), Some(min)) => Some(pct - min),
                _ => None,
            };
            CategoryStats {
                category_id: c.id,
                matching_count: a.count,
                min_distance,
                avg_distance,
                match_percent,
                proportion,
            }
        })
        .collect();
    PolygonAggregate {
        polygon_id,
        total_points: acc.total_points,
        total_valid,
        categories,
    }
}

fn accumulate(
    points: &[SamplePoint],
    distances: &[PointDistance],
    legend: &Legend,
    groups: &mut BTreeMap<FeatureId, PolygonAcc>,
) {
    let mut owner: HashMap<u64, &FeatureId> = HashMap::with_capacity(points.len());
    for p in points {
        owner.insert(p.id, &p.polygon_id);
        let acc = groups.entry(p.polygon_id.clone()).or_insert_with(|| PolygonAcc::new(legend.len()));
        acc.total_points += 1;
        if p.is_valid() {
            acc.total_valid += 1;
        }
    }

    for d in distances {
        let (Some(pid), Some(ci)) = (owner.get(&d.point_id), legend.index_of(d.category_id)) else {
            continue;
        };
        if let Some(acc) = groups.get_mut(*pid) {
            acc.per_category[ci].push(d.distance);
        }
    }
}

/// Group points and distances by polygon id. Output is sorted by polygon id.
///
/// Distances whose point or category is unknown are ignored.
pub fn aggregate(
    points: &[SamplePoint],
    distances: &[PointDistance],
    legend: &Legend,
) -> Vec<PolygonAggregate> {
    let mut groups = BTreeMap::new();
    accumulate(points, distances, legend, &mut groups);
    groups
        .into_iter()
        .map(|(id, acc)| finish(id, acc, legend))
        .collect()
}

/// Like [`aggregate`], but restricted to `polygon_ids`: every listed polygon
/// gets an aggregate, so polygons that received no sample points still reach
/// the classifier, and points of unlisted polygons are ignored.
pub fn aggregate_polygons<'a>(
    polygon_ids: impl IntoIterator<Item = &'a FeatureId>,
    points: &[SamplePoint],
    distances: &[PointDistance],
    legend: &Legend,
) -> Vec<PolygonAggregate> {
    let mut groups: BTreeMap<FeatureId, PolygonAcc> = polygon_ids
        .into_iter()
        .map(|id| (id.clone(), PolygonAcc::new(legend.len())))
        .collect();
    let known: BTreeSet<FeatureId> = groups.keys().cloned().collect();
    accumulate(points, distances, legend, &mut groups);
    groups
        .into_iter()
        .filter(|(id, _)| known.contains(id))
        .map(|(id, acc)| finish(id, acc, legend))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legend::LegendCategory;
    use approx::assert_relative_eq;
    use geo::Point;

    fn legend() -> Legend {
        Legend::new(vec![
            LegendCategory::new(1, "A", [0.0, 0.0, 0.0]),
            LegendCategory::new(2, "B", [255.0, 255.0, 255.0]),
        ])
        .unwrap()
    }

    fn valid(id: u64, poly: i64) -> SamplePoint {
        SamplePoint::new(id, FeatureId::Int(poly), Point::new(0.0, 0.0))
            .with_channels([Some(1.0), Some(1.0), Some(1.0)])
    }

    fn nodata(id: u64, poly: i64) -> SamplePoint {
        SamplePoint::new(id, FeatureId::Int(poly), Point::new(0.0, 0.0))
            .with_channels([None, None, None])
    }

    fn dist(point_id: u64, category_id: i64, distance: f64) -> PointDistance {
        PointDistance { point_id, category_id, distance }
    }

    #[test]
    fn seven_of_ten_matching_scores_sixty() {
        let points: Vec<_> = (0..10).map(|i| valid(i, 1)).collect();
        let mut distances: Vec<_> = (0..7).map(|i| dist(i, 1, 10.0)).collect();
        distances.extend((7..10).map(|i| dist(i, 2, 50.0)));

        let agg = aggregate(&points, &distances, &legend());
        assert_eq!(agg.len(), 1);
        let p1 = &agg[0];
        assert_eq!(p1.total_valid, 10);
        assert_eq!(p1.categories[0].matching_count, 7);
        assert_relative_eq!(p1.categories[0].avg_distance.unwrap(), 10.0);
        assert_relative_eq!(p1.categories[0].match_percent.unwrap(), 70.0);
        assert_relative_eq!(p1.categories[0].proportion.unwrap(), 60.0);
        assert_relative_eq!(p1.categories[1].proportion.unwrap(), -20.0);
    }

    #[test]
    fn min_and_average_are_tracked_separately() {
        let points: Vec<_> = (0..4).map(|i| valid(i, 1)).collect();
        let distances = vec![dist(0, 1, 4.0), dist(1, 1, 8.0), dist(2, 1, 12.0)];
        let agg = aggregate(&points, &distances, &legend());
        let a = &agg[0].categories[0];
        assert_eq!(a.min_distance, Some(4.0));
        assert_relative_eq!(a.avg_distance.unwrap(), 8.0);
        assert_relative_eq!(a.proportion.unwrap(), 75.0 - 4.0);
    }

    #[test]
    fn no_valid_points_leaves_every_proportion_undefined() {
        let points = vec![nodata(0, 2), nodata(1, 2)];
        let agg = aggregate(&points, &[], &legend());
        assert_eq!(agg[0].total_points, 2);
        assert_eq!(agg[0].total_valid, 0);
        assert!(agg[0].categories.iter().all(|c| c.proportion.is_none()));
    }

    #[test]
    fn unmatched_category_is_undefined_not_zero() {
        let points = vec![valid(0, 1)];
        let agg = aggregate(&points, &[dist(0, 1, 3.0)], &legend());
        assert_eq!(agg[0].categories[1].matching_count, 0);
        assert!(agg[0].categories[1].proportion.is_none());
        assert!(agg[0].categories[1].min_distance.is_none());
    }

    #[test]
    fn total_valid_never_exceeds_point_count() {
        let points = vec![valid(0, 1), nodata(1, 1), valid(2, 3), nodata(3, 3), nodata(4, 3)];
        for a in aggregate(&points, &[], &legend()) {
            assert!(a.total_valid <= a.total_points);
        }
    }

    #[test]
    fn groups_are_sorted_and_kept_apart() {
        let points = vec![valid(0, 9), valid(1, 3), valid(2, 9)];
        let distances = vec![dist(0, 1, 1.0), dist(1, 2, 2.0), dist(2, 1, 3.0)];
        let agg = aggregate(&points, &distances, &legend());
        assert_eq!(agg[0].polygon_id, FeatureId::Int(3));
        assert_eq!(agg[1].polygon_id, FeatureId::Int(9));
        assert_eq!(agg[1].categories[0].matching_count, 2);
        assert_eq!(agg[0].categories[0].matching_count, 0);
    }

    #[test]
    fn polygons_without_points_still_get_an_aggregate() {
        let ids = [FeatureId::Int(1), FeatureId::Int(2)];
        let points = vec![valid(0, 1)];
        let agg = aggregate_polygons(&ids, &points, &[dist(0, 1, 2.0)], &legend());
        assert_eq!(agg.len(), 2);
        assert_eq!(agg[1].polygon_id, FeatureId::Int(2));
        assert_eq!(agg[1].total_points, 0);
    }

    #[test]
    fn points_of_unlisted_polygons_are_ignored() {
        let ids = [FeatureId::Int(1)];
        let points = vec![valid(0, 1), valid(1, 5)];
        let agg = aggregate_polygons(&ids, &points, &[dist(1, 1, 2.0)], &legend());
        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0].total_points, 1);
    }
}
