//! Colour classification of polygons from sampled raster values.
//!
//! Points are scattered inside each polygon, their band values read from an
//! image, compared with a legend of reference colours, and every polygon is
//! assigned the category that best matches its points.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod distance;
pub mod error;
pub mod extract;
pub mod legend;
pub mod persist;
pub mod pipeline;
pub mod polygon;
pub mod raster;
pub mod report;
pub mod sample;
pub mod sampler;

pub use classify::ClassificationResult;
pub use config::{PipelineConfig, ValidatedConfig};
pub use error::{Error, Result};
pub use legend::{Legend, LegendCategory, UNCLASSIFIED};
pub use pipeline::{CancelFlag, Pipeline, PipelineRun};
pub use polygon::{FeatureId, PolygonRecord};
pub use report::RunSummary;
pub use sample::SamplePoint;
