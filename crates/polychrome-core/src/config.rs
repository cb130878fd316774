//! Run configuration: serde-loadable defaults, validated once before processing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::distance::Threshold;
use crate::error::{Error, Result};

/// Points per map unit² used when neither density nor count is configured.
pub const DEFAULT_POINT_DENSITY: f64 = 0.5;
/// Colour-space distance below which a sample counts as matching.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 65.0;
/// Inward buffer applied before sampling, in map units.
pub const DEFAULT_BUFFER_DISTANCE: f64 = 1.0;
/// Candidate locations tried per requested point before giving up.
pub const DEFAULT_MAX_TRIES_PER_POINT: u32 = 10;
/// Prefix of the sampled band fields (`band_1`, `band_2`, ...).
pub const DEFAULT_BAND_PREFIX: &str = "band_";

/// User-facing configuration as read from JSON and CLI flags.
///
/// Every field has a default, so a config file only needs the values it
/// changes. Call [`PipelineConfig::validate`] before running anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Points per unit area. Mutually exclusive with `fixed_point_count`.
    pub point_density: Option<f64>,
    /// Fixed number of points per polygon.
    pub fixed_point_count: Option<u32>,
    pub distance_threshold: f64,
    pub min_point_spacing: f64,
    pub buffer_distance: f64,
    pub max_tries_per_point: u32,
    /// Seed for the point generator; `None` draws from entropy.
    pub seed: Option<u64>,
    /// Sampled value fields, in channel order.
    pub channel_field_names: Vec<String>,
    pub polygon_id_field: String,
    pub legend_id_field: String,
    pub legend_label_field: String,
    /// Reference colour fields of the legend, in channel order.
    pub legend_channel_fields: Vec<String>,
    /// Add per-category counts and distances to every output feature.
    pub write_statistics: bool,
    pub output_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            point_density: None,
            fixed_point_count: None,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            min_point_spacing: 0.0,
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
            max_tries_per_point: DEFAULT_MAX_TRIES_PER_POINT,
            seed: None,
            channel_field_names: band_fields(DEFAULT_BAND_PREFIX, 3),
            polygon_id_field: "id".into(),
            legend_id_field: "fid".into(),
            legend_label_field: "txt".into(),
            legend_channel_fields: vec!["r".into(), "g".into(), "b".into()],
            write_statistics: false,
            output_path: PathBuf::from("classified.geojson"),
        }
    }
}

/// Field names for `n` sampled bands: `prefix1 .. prefixN`.
pub fn band_fields(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{prefix}{i}")).collect()
}

/// How many points to place in a polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMode {
    /// `round(area × density)` points.
    Density(f64),
    Fixed(u32),
}

impl SamplingMode {
    pub fn point_count(&self, area: f64) -> usize {
        match *self {
            SamplingMode::Density(d) => {
                let n = (area * d).round();
                if n.is_finite() && n > 0.0 { n as usize } else { 0 }
            }
            SamplingMode::Fixed(n) => n as usize,
        }
    }
}

/// Sampler-facing subset of a validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    pub mode: SamplingMode,
    pub min_spacing: f64,
    pub buffer_distance: f64,
    pub max_tries_per_point: u32,
    pub seed: Option<u64>,
}

/// Configuration after every option has been checked.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub sampler: SamplerSettings,
    pub threshold: Threshold,
    pub channel_field_names: Vec<String>,
    pub polygon_id_field: String,
    pub legend_id_field: String,
    pub legend_label_field: String,
    pub legend_channel_fields: Vec<String>,
    pub write_statistics: bool,
    pub output_path: PathBuf,
}

impl ValidatedConfig {
    pub fn channel_count(&self) -> usize {
        self.channel_field_names.len()
    }
}

impl PipelineConfig {
    /// Read a JSON config file. Absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("cannot parse config {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<ValidatedConfig> {
        let mode = match (self.point_density, self.fixed_point_count) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "point_density and fixed_point_count are mutually exclusive",
                ))
            }
            (Some(d), None) => {
                if !(d.is_finite() && d > 0.0) {
                    return Err(Error::config(format!("point_density must be positive, got {d}")));
                }
                SamplingMode::Density(d)
            }
            (None, Some(0)) => {
                return Err(Error::config("fixed_point_count must be at least 1"))
            }
            (None, Some(n)) => SamplingMode::Fixed(n),
            (None, None) => SamplingMode::Density(DEFAULT_POINT_DENSITY),
        };

        let threshold = Threshold::new(self.distance_threshold)?;

        if !(self.min_point_spacing.is_finite() && self.min_point_spacing >= 0.0) {
            return Err(Error::config(format!(
                "min_point_spacing must be non-negative, got {}",
                self.min_point_spacing
            )));
        }
        if !(self.buffer_distance.is_finite() && self.buffer_distance >= 0.0) {
            return Err(Error::config(format!(
                "buffer_distance must be non-negative, got {}",
                self.buffer_distance
            )));
        }
        if self.max_tries_per_point == 0 {
            return Err(Error::config("max_tries_per_point must be at least 1"));
        }

        if self.channel_field_names.is_empty() {
            return Err(Error::config("channel_field_names must not be empty"));
        }
        if self.channel_field_names.len() != self.legend_channel_fields.len() {
            return Err(Error::config(format!(
                "{} channel fields configured but legend has {} reference channels",
                self.channel_field_names.len(),
                self.legend_channel_fields.len()
            )));
        }
        for (what, name) in [
            ("polygon_id_field", &self.polygon_id_field),
            ("legend_id_field", &self.legend_id_field),
            ("legend_label_field", &self.legend_label_field),
        ] {
            if name.is_empty() {
                return Err(Error::config(format!("{what} must not be empty")));
            }
        }

        Ok(ValidatedConfig {
            sampler: SamplerSettings {
                mode,
                min_spacing: self.min_point_spacing,
                buffer_distance: self.buffer_distance,
                max_tries_per_point: self.max_tries_per_point,
                seed: self.seed,
            },
            threshold,
            channel_field_names: self.channel_field_names.clone(),
            polygon_id_field: self.polygon_id_field.clone(),
            legend_id_field: self.legend_id_field.clone(),
            legend_label_field: self.legend_label_field.clone(),
            legend_channel_fields: self.legend_channel_fields.clone(),
            write_statistics: self.write_statistics,
            output_path: self.output_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_to_density_mode() {
        let cfg = PipelineConfig::default().validate().unwrap();
        assert_eq!(cfg.sampler.mode, SamplingMode::Density(DEFAULT_POINT_DENSITY));
        assert_eq!(cfg.threshold.value(), 65.0);
        assert_eq!(cfg.channel_field_names, vec!["band_1", "band_2", "band_3"]);
    }

    #[test]
    fn zero_threshold_is_a_configuration_error() {
        let cfg = PipelineConfig { distance_threshold: 0.0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn density_and_count_are_exclusive() {
        let cfg = PipelineConfig {
            point_density: Some(1.0),
            fixed_point_count: Some(25),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn channel_count_mismatch_is_rejected() {
        let cfg = PipelineConfig {
            channel_field_names: band_fields("band_", 4),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn negative_spacing_is_rejected() {
        let cfg = PipelineConfig { min_point_spacing: -1.0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn density_point_count_rounds() {
        let mode = SamplingMode::Density(0.5);
        assert_eq!(mode.point_count(10.0), 5);
        assert_eq!(mode.point_count(0.9), 0);
        assert_eq!(mode.point_count(1.0), 1);
        assert_eq!(SamplingMode::Fixed(25).point_count(0.0), 25);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"fixed_point_count": 25, "seed": 7}"#).unwrap();
        let v = cfg.validate().unwrap();
        assert_eq!(v.sampler.mode, SamplingMode::Fixed(25));
        assert_eq!(v.sampler.seed, Some(7));
        assert_eq!(v.legend_id_field, "fid");
    }
}
