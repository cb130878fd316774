//! Reference legend: category id → label + reference colour.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::ValidatedConfig;
use crate::error::{Error, Result};
use crate::polygon::FeatureId;
use crate::report::{SkipKind, Skipped};

/// Reserved category id for polygons no legend entry could be assigned to.
pub const UNCLASSIFIED: i64 = -999;

/// Upper bound of a reference channel value (8-bit colour).
pub const CHANNEL_MAX: f64 = 255.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LegendCategory {
    pub id: i64,
    pub label: String,
    /// Reference colour, one value per channel.
    pub color: Vec<f64>,
}

impl LegendCategory {
    pub fn new(id: i64, label: impl Into<String>, color: impl Into<Vec<f64>>) -> Self {
        Self {
            id,
            label: label.into(),
            color: color.into(),
        }
    }
}

/// Non-empty set of categories with unique ids, kept sorted by id.
///
/// Iteration order is the tie-break order used by the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Legend {
    categories: Vec<LegendCategory>,
    channels: usize,
}

impl Legend {
    pub fn new(mut categories: Vec<LegendCategory>) -> Result<Self> {
        if categories.is_empty() {
            return Err(Error::config("legend has no categories"));
        }
        categories.sort_by_key(|c| c.id);
        if let Some(dup) = categories.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(Error::config(format!("duplicate legend id {}", dup[0].id)));
        }
        if categories.iter().any(|c| c.id == UNCLASSIFIED) {
            return Err(Error::config(format!(
                "legend id {UNCLASSIFIED} is reserved for unclassified polygons"
            )));
        }
        let channels = categories[0].color.len();
        if channels == 0 {
            return Err(Error::config("legend colours have no channels"));
        }
        if let Some(c) = categories.iter().find(|c| c.color.len() != channels) {
            return Err(Error::config(format!(
                "legend id {} has {} channels, expected {channels}",
                c.id,
                c.color.len()
            )));
        }
        Ok(Self { categories, channels })
    }

    pub fn categories(&self) -> &[LegendCategory] {
        &self.categories
    }

    pub fn iter(&self) -> impl Iterator<Item = &LegendCategory> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn get(&self, id: i64) -> Option<&LegendCategory> {
        self.categories
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|i| &self.categories[i])
    }

    /// Position of `id` in legend order.
    pub fn index_of(&self, id: i64) -> Option<usize> {
        self.categories.binary_search_by_key(&id, |c| c.id).ok()
    }

    pub fn label(&self, id: i64) -> Option<&str> {
        self.get(id).map(|c| c.label.as_str())
    }
}

/// Legend field names, bound once against the legend table.
#[derive(Debug, Clone)]
pub struct LegendSchema {
    pub id_field: String,
    pub label_field: String,
    pub channel_fields: Vec<String>,
}

impl LegendSchema {
    pub fn from_config(cfg: &ValidatedConfig) -> Self {
        Self {
            id_field: cfg.legend_id_field.clone(),
            label_field: cfg.legend_label_field.clone(),
            channel_fields: cfg.legend_channel_fields.clone(),
        }
    }

    /// Fail if a field is absent from every row: that is a naming mistake in
    /// the configuration rather than a bad record.
    fn bind(&self, rows: &[Map<String, Value>]) -> Result<()> {
        let expected = std::iter::once(&self.id_field)
            .chain(std::iter::once(&self.label_field))
            .chain(self.channel_fields.iter());
        for name in expected {
            if !rows.iter().any(|r| r.contains_key(name)) {
                return Err(Error::config(format!("legend has no field `{name}`")));
            }
        }
        Ok(())
    }

    fn parse_row(&self, row: &Map<String, Value>) -> std::result::Result<LegendCategory, String> {
        let id = match row.get(&self.id_field) {
            Some(v) => match FeatureId::from_value(v) {
                Some(FeatureId::Int(id)) => id,
                _ => return Err(format!("`{}` is not an integer: {v}", self.id_field)),
            },
            None => return Err(format!("missing `{}`", self.id_field)),
        };
        let label = match row.get(&self.label_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => return Err(format!("missing `{}`", self.label_field)),
            Some(other) => other.to_string(),
        };
        let mut color = Vec::with_capacity(self.channel_fields.len());
        for name in &self.channel_fields {
            let v = row
                .get(name)
                .and_then(Value::as_f64)
                .ok_or_else(|| format!("id {id}: `{name}` missing or not numeric"))?;
            if !(0.0..=CHANNEL_MAX).contains(&v) {
                return Err(format!("id {id}: `{name}` = {v} outside 0..={CHANNEL_MAX}"));
            }
            color.push(v);
        }
        Ok(LegendCategory { id, label, color })
    }
}

/// Build a legend from a JSON array of flat records, skipping bad rows.
pub fn legend_from_rows(
    rows: &[Map<String, Value>],
    schema: &LegendSchema,
) -> Result<(Legend, Vec<Skipped>)> {
    schema.bind(rows)?;
    let mut categories = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        match schema.parse_row(row) {
            Ok(c) => categories.push(c),
            Err(reason) => {
                warn!(row = i, %reason, "skipping legend row");
                skipped.push(Skipped::new(SkipKind::LegendRow, format!("row {i}"), reason));
            }
        }
    }
    if categories.is_empty() {
        return Err(Error::input("no usable legend rows"));
    }
    Ok((Legend::new(categories)?, skipped))
}

/// Read a legend JSON file (`[{"fid": 1, "r": .., "g": .., "b": .., "txt": ".."}, ...]`).
pub fn load_legend(path: &Path, schema: &LegendSchema) -> Result<(Legend, Vec<Skipped>)> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::input(format!("cannot read legend {}: {e}", path.display())))?;
    let rows: Vec<Map<String, Value>> = serde_json::from_str(&text)
        .map_err(|e| Error::input(format!("cannot parse legend {}: {e}", path.display())))?;
    legend_from_rows(&rows, schema)
}
