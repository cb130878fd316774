//! Category assignment from per-polygon aggregates.

use serde::{Deserialize, Serialize};

use crate::aggregate::PolygonAggregate;
use crate::legend::UNCLASSIFIED;
use crate::polygon::FeatureId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub polygon_id: FeatureId,
    /// Assigned legend id, or [`UNCLASSIFIED`].
    pub category_id: i64,
}

impl ClassificationResult {
    pub fn is_classified(&self) -> bool {
        self.category_id != UNCLASSIFIED
    }
}

/// Category with the highest defined proportion score.
///
/// Undefined scores never win; with none defined the polygon is
/// [`UNCLASSIFIED`]. Equal maxima go to the smallest category id.
pub fn classify(aggregate: &PolygonAggregate) -> i64 {
    let mut best: Option<(i64, f64)> = None;
    for stats in &aggregate.categories {
        let Some(score) = stats.proportion else {
            continue;
        };
        best = match best {
            None => Some((stats.category_id, score)),
            Some((id, top)) if score > top || (score == top && stats.category_id < id) => {
                Some((stats.category_id, score))
            }
            keep => keep,
        };
    }
    best.map_or(UNCLASSIFIED, |(id, _)| id)
}

pub fn classify_all(aggregates: &[PolygonAggregate]) -> Vec<ClassificationResult> {
    aggregates
        .iter()
        .map(|a| ClassificationResult {
            polygon_id: a.polygon_id.clone(),
            category_id: classify(a),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, CategoryStats};
    use crate::distance::{compute_distances, Threshold};
    use crate::legend::{Legend, LegendCategory};
    use crate::sample::SamplePoint;
    use geo::Point;

    fn stats(category_id: i64, proportion: Option<f64>) -> CategoryStats {
        CategoryStats {
            category_id,
            matching_count: proportion.map_or(0, |_| 1),
            min_distance: proportion.map(|_| 0.0),
            avg_distance: proportion.map(|_| 0.0),
            match_percent: proportion,
            proportion,
        }
    }

    fn agg(categories: Vec<CategoryStats>, total_valid: usize) -> PolygonAggregate {
        PolygonAggregate {
            polygon_id: FeatureId::Int(1),
            total_points: total_valid,
            total_valid,
            categories,
        }
    }

    #[test]
    fn highest_proportion_wins() {
        let a = agg(vec![stats(1, Some(60.0)), stats(2, Some(-20.0))], 10);
        assert_eq!(classify(&a), 1);
    }

    #[test]
    fn negative_score_still_beats_undefined() {
        let a = agg(vec![stats(1, None), stats(2, Some(-20.0))], 10);
        assert_eq!(classify(&a), 2);
    }

    #[test]
    fn all_undefined_is_unclassified() {
        let a = agg(vec![stats(1, None), stats(2, None)], 0);
        assert_eq!(classify(&a), UNCLASSIFIED);
    }

    #[test]
    fn exact_tie_goes_to_lowest_id() {
        let a = agg(vec![stats(4, Some(12.5)), stats(2, Some(12.5)), stats(7, Some(3.0))], 8);
        assert_eq!(classify(&a), 2);
    }

    #[test]
    fn tie_from_integer_inputs_is_deterministic() {
        // Two categories equidistant from a mid-grey reading: each matches
        // every point at the same distance, so both proportions are equal.
        let legend = Legend::new(vec![
            LegendCategory::new(5, "darker", [90.0, 100.0, 100.0]),
            LegendCategory::new(3, "lighter", [110.0, 100.0, 100.0]),
        ])
        .unwrap();
        let points: Vec<_> = (0..4)
            .map(|i| {
                SamplePoint::new(i, FeatureId::Int(1), Point::new(0.0, 0.0))
                    .with_channels([Some(100.0), Some(100.0), Some(100.0)])
            })
            .collect();
        let distances = compute_distances(&points, &legend, Threshold::new(65.0).unwrap());
        assert_eq!(distances.len(), 8);
        let aggs = aggregate(&points, &distances, &legend);
        let p = &aggs[0].categories;
        assert!((p[0].proportion.unwrap() - p[1].proportion.unwrap()).abs() < 1e-6);
        assert_eq!(classify(&aggs[0]), 3);
    }

    #[test]
    fn reclassifying_is_idempotent() {
        let aggs = vec![
            agg(vec![stats(1, Some(5.0)), stats(2, Some(9.0))], 3),
            agg(vec![stats(1, None), stats(2, None)], 0),
        ];
        assert_eq!(classify_all(&aggs), classify_all(&aggs));
        assert_eq!(classify_all(&aggs)[1].category_id, UNCLASSIFIED);
    }
}
