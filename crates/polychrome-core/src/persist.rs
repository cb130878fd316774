//! GeoJSON reading and atomic writing of points and classified polygons.
//!
//! Every write goes to a temporary file in the destination directory and is
//! renamed over the target at the end, so a failed run never leaves a
//! half-written dataset and a rerun replaces the previous output.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use geo::{Coord, LineString, Point, Polygon};
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::aggregate::PolygonAggregate;
use crate::classify::ClassificationResult;
use crate::error::{Error, Result};
use crate::legend::Legend;
use crate::polygon::{FeatureId, PolygonRecord};
use crate::report::{SkipKind, Skipped};
use crate::sample::SamplePoint;

/// Property holding the generated id of a sample point.
pub const POINT_ID_FIELD: &str = "point_id";
/// Property holding the assigned category id.
pub const CATEGORY_FIELD: &str = "category";
pub const CATEGORY_LABEL_FIELD: &str = "category_label";

// ── Geometry conversion ───────────────────────────────────────────────────────

fn coord(v: &Value) -> Option<Coord<f64>> {
    let a = v.as_array()?;
    match a.as_slice() {
        [x, y, ..] => Some(Coord { x: x.as_f64()?, y: y.as_f64()? }),
        _ => None,
    }
}

fn ring(v: &Value) -> Option<LineString<f64>> {
    v.as_array()?.iter().map(coord).collect::<Option<Vec<_>>>().map(LineString::new)
}

fn polygon_rings(v: &Value) -> Option<Polygon<f64>> {
    let mut rings = v.as_array()?.iter().map(ring).collect::<Option<Vec<_>>>()?.into_iter();
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}

/// Polygon from a GeoJSON geometry object. Single-part MultiPolygons are
/// accepted since many exporters always write the multi type.
fn polygon_from_geojson(geometry: &Value) -> std::result::Result<Polygon<f64>, String> {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    let coords = geometry.get("coordinates").ok_or("geometry has no coordinates")?;
    match kind {
        "Polygon" => polygon_rings(coords).ok_or_else(|| "malformed Polygon coordinates".into()),
        "MultiPolygon" => match coords.as_array().map(Vec::as_slice) {
            Some([single]) => {
                polygon_rings(single).ok_or_else(|| "malformed MultiPolygon coordinates".into())
            }
            Some(parts) => Err(format!("MultiPolygon with {} parts", parts.len())),
            None => Err("malformed MultiPolygon coordinates".into()),
        },
        other => Err(format!("unsupported geometry type `{other}`")),
    }
}

fn ring_to_geojson(r: &LineString<f64>) -> Value {
    Value::Array(r.coords().map(|c| json!([c.x, c.y])).collect())
}

fn polygon_to_geojson(p: &Polygon<f64>) -> Value {
    let rings: Vec<Value> = std::iter::once(p.exterior())
        .chain(p.interiors())
        .map(ring_to_geojson)
        .collect();
    json!({ "type": "Polygon", "coordinates": rings })
}

fn point_to_geojson(p: &Point<f64>) -> Value {
    json!({ "type": "Point", "coordinates": [p.x(), p.y()] })
}

fn point_from_geojson(geometry: &Value) -> Option<Point<f64>> {
    if geometry.get("type").and_then(Value::as_str) != Some("Point") {
        return None;
    }
    coord(geometry.get("coordinates")?).map(Point::from)
}

// ── File plumbing ─────────────────────────────────────────────────────────────

fn read_features(path: &Path) -> Result<Vec<Value>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::input(format!("cannot read {}: {e}", path.display())))?;
    let doc: Value = serde_json::from_str(&text)
        .map_err(|e| Error::input(format!("cannot parse {}: {e}", path.display())))?;
    match doc.get("features") {
        Some(Value::Array(features)) => Ok(features.clone()),
        _ => Err(Error::input(format!("{} is not a FeatureCollection", path.display()))),
    }
}

fn properties(feature: &Value) -> Map<String, Value> {
    match feature.get("properties") {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    }
}

fn feature_collection(features: Vec<Value>) -> Value {
    json!({ "type": "FeatureCollection", "features": features })
}

/// Write `doc` to `path` through a sibling temporary file.
pub fn write_json_atomic(path: &Path, doc: &Value) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| Error::persist(dir, e))?;
    let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::persist(dir, e))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut w, doc).map_err(|e| Error::persist(path, e.into()))?;
        w.flush().map_err(|e| Error::persist(path, e))?;
    }
    tmp.as_file().sync_all().map_err(|e| Error::persist(path, e))?;
    // Dropping the temp file on any earlier return removes it.
    tmp.persist(path).map_err(|e| Error::persist(path, e.error))?;
    Ok(())
}

// ── Polygons ──────────────────────────────────────────────────────────────────

/// Read polygon features, skipping records without a usable id or geometry.
///
/// The id comes from the `id_field` property, falling back to the feature's
/// top-level `id`. Duplicate ids keep the first occurrence.
pub fn read_polygons(path: &Path, id_field: &str) -> Result<(Vec<PolygonRecord>, Vec<Skipped>)> {
    let features = read_features(path)?;
    polygons_from_features(&features, id_field)
}

fn polygons_from_features(
    features: &[Value],
    id_field: &str,
) -> Result<(Vec<PolygonRecord>, Vec<Skipped>)> {
    let has_field = |f: &Value| {
        f.get("properties").and_then(|p| p.get(id_field)).is_some() || f.get("id").is_some()
    };
    if !features.is_empty() && !features.iter().any(has_field) {
        return Err(Error::config(format!("polygon dataset has no field `{id_field}`")));
    }

    let mut polygons = Vec::with_capacity(features.len());
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();
    for (i, f) in features.iter().enumerate() {
        let mut attributes = properties(f);
        let id = attributes
            .remove(id_field)
            .as_ref()
            .or(f.get("id"))
            .and_then(FeatureId::from_value);
        let Some(id) = id else {
            warn!(feature = i, "polygon without id");
            skipped.push(Skipped::new(SkipKind::Polygon, format!("feature {i}"), format!("missing `{id_field}`")));
            continue;
        };
        if !seen.insert(id.clone()) {
            warn!(polygon = %id, "duplicate polygon id");
            skipped.push(Skipped::new(SkipKind::Polygon, id.to_string(), "duplicate id"));
            continue;
        }
        let geometry = match f.get("geometry").map(polygon_from_geojson) {
            Some(Ok(g)) => g,
            Some(Err(reason)) => {
                warn!(polygon = %id, %reason, "unusable geometry");
                skipped.push(Skipped::new(SkipKind::Polygon, id.to_string(), reason));
                continue;
            }
            None => {
                warn!(polygon = %id, "missing geometry");
                skipped.push(Skipped::new(SkipKind::Polygon, id.to_string(), "missing geometry"));
                continue;
            }
        };
        let record = PolygonRecord { id, geometry, attributes };
        if let Err(reason) = record.check_geometry() {
            warn!(polygon = %record.id, %reason, "invalid geometry");
            skipped.push(Skipped::new(SkipKind::Polygon, record.id.to_string(), reason));
            continue;
        }
        polygons.push(record);
    }
    if polygons.is_empty() {
        return Err(Error::input("no usable polygons"));
    }
    Ok((polygons, skipped))
}

// ── Sample points ─────────────────────────────────────────────────────────────

/// Field names of a sampled-points dataset, bound before reading records.
#[derive(Debug, Clone)]
pub struct PointSchema {
    pub polygon_id_field: String,
    pub channel_fields: Vec<String>,
}

/// Write sampled points with parent attributes, parent id and band values.
pub fn write_sample_points(
    path: &Path,
    points: &[SamplePoint],
    schema: &PointSchema,
) -> Result<()> {
    let features = points
        .iter()
        .map(|p| {
            let mut props = p.attributes.clone();
            props.insert(schema.polygon_id_field.clone(), p.polygon_id.to_value());
            props.insert(POINT_ID_FIELD.into(), Value::from(p.id));
            for (name, v) in schema.channel_fields.iter().zip(&p.channels) {
                props.insert(name.clone(), v.map_or(Value::Null, Value::from));
            }
            json!({
                "type": "Feature",
                "geometry": point_to_geojson(&p.location),
                "properties": props,
            })
        })
        .collect();
    write_json_atomic(path, &feature_collection(features))?;
    info!(path = %path.display(), points = points.len(), "sample points written");
    Ok(())
}

/// Read a sampled-points dataset. `null` channel values mark no-data; a
/// record missing a channel key altogether is skipped.
pub fn read_sample_points(
    path: &Path,
    schema: &PointSchema,
) -> Result<(Vec<SamplePoint>, Vec<Skipped>)> {
    let features = read_features(path)?;
    points_from_features(&features, schema)
}

fn points_from_features(
    features: &[Value],
    schema: &PointSchema,
) -> Result<(Vec<SamplePoint>, Vec<Skipped>)> {
    let all_props: Vec<Map<String, Value>> = features.iter().map(properties).collect();
    let expected = std::iter::once(&schema.polygon_id_field).chain(&schema.channel_fields);
    for name in expected {
        if !all_props.is_empty() && !all_props.iter().any(|p| p.contains_key(name)) {
            return Err(Error::config(format!("sample points have no field `{name}`")));
        }
    }

    let mut points = Vec::with_capacity(features.len());
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();
    for (i, (f, mut props)) in features.iter().zip(all_props).enumerate() {
        let id = props
            .remove(POINT_ID_FIELD)
            .and_then(|v| v.as_u64())
            .unwrap_or(i as u64);
        let parsed = (|| -> std::result::Result<SamplePoint, String> {
            if !seen.insert(id) {
                return Err("duplicate point id".to_string());
            }
            let polygon_id = props
                .remove(&schema.polygon_id_field)
                .as_ref()
                .and_then(FeatureId::from_value)
                .ok_or_else(|| format!("missing `{}`", schema.polygon_id_field))?;
            let location = f
                .get("geometry")
                .and_then(point_from_geojson)
                .ok_or("missing or non-point geometry")?;
            let mut channels = Vec::with_capacity(schema.channel_fields.len());
            for name in &schema.channel_fields {
                match props.remove(name) {
                    Some(Value::Null) => channels.push(None),
                    Some(v) => channels.push(Some(
                        v.as_f64().ok_or_else(|| format!("`{name}` is not numeric"))?,
                    )),
                    None => return Err(format!("missing `{name}`")),
                }
            }
            let mut p = SamplePoint::new(id, polygon_id, location).with_channels(channels);
            p.attributes = std::mem::take(&mut props);
            Ok(p)
        })();
        match parsed {
            Ok(p) => points.push(p),
            Err(reason) => {
                warn!(point = id, %reason, "skipping sample point");
                skipped.push(Skipped::new(SkipKind::Point, id.to_string(), reason));
            }
        }
    }
    if points.is_empty() {
        return Err(Error::input("no usable sample points"));
    }
    Ok((points, skipped))
}

// ── Classified polygons ───────────────────────────────────────────────────────

/// Everything needed to write the classified dataset.
pub struct ClassifiedOutput<'a> {
    pub polygons: &'a [PolygonRecord],
    pub results: &'a [ClassificationResult],
    pub legend: &'a Legend,
    /// Per-polygon statistics to include, when requested.
    pub aggregates: Option<&'a [PolygonAggregate]>,
    pub id_field: &'a str,
}

fn statistics(props: &mut Map<String, Value>, agg: &PolygonAggregate) {
    props.insert("c_total".into(), Value::from(agg.total_points));
    props.insert("c_valid".into(), Value::from(agg.total_valid));
    let opt = |v: Option<f64>| v.map_or(Value::Null, Value::from);
    for c in &agg.categories {
        let id = c.category_id;
        props.insert(format!("c_{id}"), Value::from(c.matching_count));
        props.insert(format!("min_{id}"), opt(c.min_distance));
        props.insert(format!("avg_{id}"), opt(c.avg_distance));
        props.insert(format!("pct_{id}"), opt(c.match_percent));
    }
}

/// Join results back onto their polygons and write them. Polygons without a
/// result (skipped earlier) are left out.
pub fn write_classified(path: &Path, out: &ClassifiedOutput<'_>) -> Result<usize> {
    let by_id: HashMap<&FeatureId, i64> =
        out.results.iter().map(|r| (&r.polygon_id, r.category_id)).collect();
    let aggs: HashMap<&FeatureId, &PolygonAggregate> = out
        .aggregates
        .unwrap_or_default()
        .iter()
        .map(|a| (&a.polygon_id, a))
        .collect();

    let features: Vec<Value> = out
        .polygons
        .iter()
        .filter_map(|poly| {
            let category = *by_id.get(&poly.id)?;
            let mut props = Map::new();
            props.insert(out.id_field.to_owned(), poly.id.to_value());
            props.extend(poly.attributes.clone());
            if let Some(agg) = aggs.get(&poly.id) {
                statistics(&mut props, agg);
            }
            props.insert(CATEGORY_FIELD.into(), Value::from(category));
            props.insert(
                CATEGORY_LABEL_FIELD.into(),
                out.legend.label(category).map_or(Value::Null, Value::from),
            );
            Some(json!({
                "type": "Feature",
                "geometry": polygon_to_geojson(&poly.geometry),
                "properties": props,
            }))
        })
        .collect();

    let n = features.len();
    write_json_atomic(path, &feature_collection(features))?;
    info!(path = %path.display(), polygons = n, "classified polygons written");
    Ok(n)
}

/// Read (polygon id, category id) pairs back from a classified dataset.
pub fn read_classified(path: &Path, id_field: &str) -> Result<Vec<ClassificationResult>> {
    read_features(path)?
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let props = properties(f);
            let polygon_id = props
                .get(id_field)
                .and_then(FeatureId::from_value)
                .ok_or_else(|| Error::input(format!("feature {i}: missing `{id_field}`")))?;
            let category_id = props
                .get(CATEGORY_FIELD)
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::input(format!("feature {i}: missing `{CATEGORY_FIELD}`")))?;
            Ok(ClassificationResult { polygon_id, category_id })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legend::{LegendCategory, UNCLASSIFIED};
    use geo::polygon;

    fn square(id: impl Into<FeatureId>, x0: f64) -> PolygonRecord {
        PolygonRecord::new(
            id,
            polygon![(x: x0, y: 0.0), (x: x0 + 4.0, y: 0.0), (x: x0 + 4.0, y: 4.0), (x: x0, y: 4.0)],
        )
    }

    fn legend() -> Legend {
        Legend::new(vec![
            LegendCategory::new(1, "red", [255.0, 0.0, 0.0]),
            LegendCategory::new(2, "grey", [128.0, 128.0, 128.0]),
        ])
        .unwrap()
    }

    fn write(path: &Path, polygons: &[PolygonRecord], results: &[ClassificationResult]) {
        let legend = legend();
        let out = ClassifiedOutput {
            polygons,
            results,
            legend: &legend,
            aggregates: None,
            id_field: "osm_id",
        };
        write_classified(path, &out).unwrap();
    }

    #[test]
    fn classified_output_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.geojson");
        let polygons = vec![square(10, 0.0), square("way/7", 10.0), square(3, 20.0)];
        let results = vec![
            ClassificationResult { polygon_id: FeatureId::Int(10), category_id: 2 },
            ClassificationResult { polygon_id: "way/7".into(), category_id: UNCLASSIFIED },
            ClassificationResult { polygon_id: FeatureId::Int(3), category_id: 1 },
        ];
        write(&path, &polygons, &results);
        assert_eq!(read_classified(&path, "osm_id").unwrap(), results);

        let (back, skipped) = read_polygons(&path, "osm_id").unwrap();
        assert!(skipped.is_empty());
        assert_eq!(back[0].geometry, polygons[0].geometry);
        assert_eq!(back[2].attributes["category_label"], "red");
        assert_eq!(back[1].attributes["category_label"], Value::Null);
    }

    #[test]
    fn rewriting_replaces_the_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.geojson");
        let polygons = vec![square(1, 0.0), square(2, 10.0)];
        write(&path, &polygons, &[
            ClassificationResult { polygon_id: FeatureId::Int(1), category_id: 1 },
            ClassificationResult { polygon_id: FeatureId::Int(2), category_id: 1 },
        ]);
        write(&path, &polygons[..1], &[ClassificationResult { polygon_id: FeatureId::Int(1), category_id: 2 }]);

        let back = read_classified(&path, "osm_id").unwrap();
        assert_eq!(back, vec![ClassificationResult { polygon_id: FeatureId::Int(1), category_id: 2 }]);
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temporary files must not survive");
    }

    #[test]
    fn write_into_missing_directory_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.geojson");
        write(&path, &[square(1, 0.0)], &[ClassificationResult { polygon_id: FeatureId::Int(1), category_id: 1 }]);
        assert!(path.exists());
    }

    #[test]
    fn statistics_are_written_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.geojson");
        let legend = legend();
        let polygons = vec![square(1, 0.0)];
        let results = vec![ClassificationResult { polygon_id: FeatureId::Int(1), category_id: 1 }];
        let aggs = vec![PolygonAggregate {
            polygon_id: FeatureId::Int(1),
            total_points: 5,
            total_valid: 4,
            categories: vec![crate::aggregate::CategoryStats {
                category_id: 1,
                matching_count: 2,
                min_distance: Some(3.0),
                avg_distance: Some(4.0),
                match_percent: Some(50.0),
                proportion: Some(47.0),
            }],
        }];
        let out = ClassifiedOutput {
            polygons: &polygons,
            results: &results,
            legend: &legend,
            aggregates: Some(&aggs),
            id_field: "id",
        };
        write_classified(&path, &out).unwrap();
        let (back, _) = read_polygons(&path, "id").unwrap();
        let props = &back[0].attributes;
        assert_eq!(props["c_total"], 5);
        assert_eq!(props["c_1"], 2);
        assert_eq!(props["pct_1"], 50.0);
    }

    #[test]
    fn bad_polygon_records_are_skipped() {
        let features = vec![
            json!({"type": "Feature", "properties": {"id": 1}, "geometry": {"type": "Point", "coordinates": [0, 0]}}),
            json!({"type": "Feature", "properties": {"name": "x"}, "geometry": null}),
            json!({"type": "Feature", "properties": {"id": 2},
                   "geometry": {"type": "MultiPolygon", "coordinates": [[[[0,0],[1,0],[1,1],[0,1],[0,0]]]]}}),
            json!({"type": "Feature", "properties": {"id": 2},
                   "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}}),
        ];
        let (polys, skipped) = polygons_from_features(&features, "id").unwrap();
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].id, FeatureId::Int(2));
        assert_eq!(skipped.len(), 3);
    }

    #[test]
    fn missing_id_field_everywhere_is_a_configuration_error() {
        let features = vec![json!({"type": "Feature", "properties": {"name": "x"},
            "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}})];
        assert!(matches!(polygons_from_features(&features, "osm_id"), Err(Error::Configuration(_))));
    }

    #[test]
    fn sample_points_round_trip_with_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.geojson");
        let schema = PointSchema {
            polygon_id_field: "id".into(),
            channel_fields: vec!["band_1".into(), "band_2".into(), "band_3".into()],
        };
        let mut a = SamplePoint::new(0, FeatureId::Int(4), Point::new(1.0, 2.0))
            .with_channels([Some(10.0), Some(20.0), Some(30.0)]);
        a.attributes.insert("use".into(), "garage".into());
        let b = SamplePoint::new(1, FeatureId::Int(4), Point::new(3.0, 2.0))
            .with_channels([None, None, None]);
        write_sample_points(&path, &[a.clone(), b.clone()], &schema).unwrap();

        let (back, skipped) = read_sample_points(&path, &schema).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(back, vec![a, b]);
    }

    #[test]
    fn point_missing_a_channel_key_is_skipped() {
        let schema = PointSchema {
            polygon_id_field: "id".into(),
            channel_fields: vec!["band_1".into()],
        };
        let features = vec![
            json!({"type": "Feature", "properties": {"id": 1, "band_1": 5},
                   "geometry": {"type": "Point", "coordinates": [0, 0]}}),
            json!({"type": "Feature", "properties": {"id": 1},
                   "geometry": {"type": "Point", "coordinates": [1, 0]}}),
        ];
        let (points, skipped) = points_from_features(&features, &schema).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(skipped[0].kind, SkipKind::Point);
    }
}
