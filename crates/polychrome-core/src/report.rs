//! Run summary: skipped records and the final class distribution.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::classify::ClassificationResult;
use crate::legend::{Legend, UNCLASSIFIED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    Polygon,
    Point,
    LegendRow,
}

/// A record dropped during loading or sampling, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub kind: SkipKind,
    pub id: String,
    pub reason: String,
}

impl Skipped {
    pub fn new(kind: SkipKind, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub polygons_in: usize,
    pub sample_points: usize,
    pub valid_points: usize,
    pub matching_records: usize,
    pub skipped: Vec<Skipped>,
    /// Polygons per assigned category id, unclassified included.
    pub distribution: BTreeMap<i64, usize>,
    /// Labels for the ids in `distribution`.
    pub labels: BTreeMap<i64, String>,
}

impl RunSummary {
    pub fn skipped_count(&self, kind: SkipKind) -> usize {
        self.skipped.iter().filter(|s| s.kind == kind).count()
    }

    pub fn record_results(&mut self, results: &[ClassificationResult], legend: &Legend) {
        self.distribution.clear();
        for r in results {
            *self.distribution.entry(r.category_id).or_default() += 1;
        }
        self.labels = self
            .distribution
            .keys()
            .map(|&id| {
                let label = legend
                    .label(id)
                    .map(str::to_owned)
                    .unwrap_or_else(|| "unclassified".into());
                (id, label)
            })
            .collect();
    }

    pub fn unclassified(&self) -> usize {
        self.distribution.get(&UNCLASSIFIED).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "polygons in:        {}", self.polygons_in)?;
        writeln!(f, "sample points:      {} ({} valid)", self.sample_points, self.valid_points)?;
        writeln!(f, "matching distances: {}", self.matching_records)?;
        writeln!(
            f,
            "skipped:            {} polygons, {} points, {} legend rows",
            self.skipped_count(SkipKind::Polygon),
            self.skipped_count(SkipKind::Point),
            self.skipped_count(SkipKind::LegendRow),
        )?;
        writeln!(f, "{:>8}  {:<24} {:>8}", "category", "label", "polygons")?;
        writeln!(f, "{}", "-".repeat(42))?;
        for (id, n) in &self.distribution {
            let label = self.labels.get(id).map(String::as_str).unwrap_or("");
            writeln!(f, "{id:>8}  {label:<24} {n:>8}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legend::LegendCategory;
    use crate::polygon::FeatureId;

    #[test]
    fn distribution_counts_unclassified() {
        let legend = Legend::new(vec![LegendCategory::new(1, "red roof", [255.0, 0.0, 0.0])]).unwrap();
        let results = vec![
            ClassificationResult { polygon_id: FeatureId::Int(1), category_id: 1 },
            ClassificationResult { polygon_id: FeatureId::Int(2), category_id: UNCLASSIFIED },
            ClassificationResult { polygon_id: FeatureId::Int(3), category_id: 1 },
        ];
        let mut summary = RunSummary::default();
        summary.record_results(&results, &legend);
        assert_eq!(summary.distribution[&1], 2);
        assert_eq!(summary.unclassified(), 1);
        let text = summary.to_string();
        assert!(text.contains("red roof"));
        assert!(text.contains("unclassified"));
    }
}
