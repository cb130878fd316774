use geo::Point;
use serde_json::{Map, Value};

use crate::polygon::FeatureId;

/// A location inside a polygon, probing the raster underneath.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    pub id: u64,
    pub polygon_id: FeatureId,
    pub location: Point<f64>,
    /// One entry per raster band; `None` where the raster has no data.
    /// Empty until the extractor has run.
    pub channels: Vec<Option<f64>>,
    /// Attributes copied from the parent polygon.
    pub attributes: Map<String, Value>,
}

impl SamplePoint {
    pub fn new(id: u64, polygon_id: FeatureId, location: Point<f64>) -> Self {
        Self {
            id,
            polygon_id,
            location,
            channels: Vec::new(),
            attributes: Map::new(),
        }
    }

    pub fn with_channels(mut self, channels: impl Into<Vec<Option<f64>>>) -> Self {
        self.channels = channels.into();
        self
    }

    /// The colour reading if every channel is present.
    pub fn reading(&self) -> Option<Vec<f64>> {
        if self.channels.is_empty() {
            return None;
        }
        self.channels.iter().copied().collect()
    }

    pub fn is_valid(&self) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|c| c.is_some())
    }
}
