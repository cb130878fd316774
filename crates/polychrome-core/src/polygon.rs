//! Input polygons and their identifiers.

use std::fmt;

use geo::{Area, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable identifier of an input feature: the polygon dataset's id column may
/// hold integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Int(i64),
    Text(String),
}

impl FeatureId {
    /// Interpret a JSON attribute value as an id. Integral floats are accepted
    /// because many GIS exports write integer columns as `1.0`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(FeatureId::Int).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| FeatureId::Int(f as i64))
            }),
            Value::String(s) if !s.is_empty() => Some(FeatureId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FeatureId::Int(i) => Value::from(*i),
            FeatureId::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Int(i) => write!(f, "{i}"),
            FeatureId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FeatureId {
    fn from(v: i64) -> Self {
        FeatureId::Int(v)
    }
}

impl From<&str> for FeatureId {
    fn from(v: &str) -> Self {
        FeatureId::Text(v.to_owned())
    }
}

/// One input polygon. Never mutated once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRecord {
    pub id: FeatureId,
    pub geometry: Polygon<f64>,
    /// Remaining attributes, carried through to sample points and output.
    pub attributes: Map<String, Value>,
}

impl PolygonRecord {
    pub fn new(id: impl Into<FeatureId>, geometry: Polygon<f64>) -> Self {
        Self {
            id: id.into(),
            geometry,
            attributes: Map::new(),
        }
    }

    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Reject geometries the sampler cannot work with. Returns the reason.
    pub fn check_geometry(&self) -> Result<(), String> {
        let exterior = self.geometry.exterior();
        if exterior.0.len() < 4 {
            return Err(format!("exterior ring has {} coordinates", exterior.0.len()));
        }
        let rings = std::iter::once(exterior).chain(self.geometry.interiors());
        for ring in rings {
            if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err("non-finite coordinate".into());
            }
        }
        let area = self.area();
        if !(area > 0.0) {
            return Err(format!("degenerate area {area}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn feature_id_accepts_integral_floats() {
        assert_eq!(FeatureId::from_value(&serde_json::json!(7.0)), Some(FeatureId::Int(7)));
        assert_eq!(FeatureId::from_value(&serde_json::json!(7.5)), None);
        assert_eq!(FeatureId::from_value(&serde_json::json!("b-12")), Some("b-12".into()));
        assert_eq!(FeatureId::from_value(&Value::Null), None);
    }

    #[test]
    fn square_is_valid() {
        let p = PolygonRecord::new(
            1,
            polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)],
        );
        assert!(p.check_geometry().is_ok());
        assert_eq!(p.area(), 4.0);
    }

    #[test]
    fn collinear_ring_is_rejected() {
        let p = PolygonRecord::new(
            2,
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
        );
        assert!(p.check_geometry().is_err());
    }
}
