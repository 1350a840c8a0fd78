use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::fetch;
use crate::pipeline::MapRequest;
use crate::types::{FeatureGeometry, GeometryFeature, TabularRow};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::algorithm::contains::Contains;
use geo::algorithm::winding_order::Winding;
use geo::{LineString, MultiPolygon, Point, Polygon};
use geojson::GeoJson;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::path::Path;
use tracing::{info, warn};

pub async fn load_inputs(
    config: &AppConfig,
    request: &MapRequest,
    client: &reqwest::Client,
) -> Result<(Vec<TabularRow>, Vec<GeometryFeature>)> {
    let rows = match &config.source.tabular_file {
        Some(path) => load_tabular_file(path, config, &request.variable)?,
        None => fetch::fetch_rows(client, &config.source, request).await?,
    };
    info!("Loaded {} tabular rows", rows.len());

    let features = match &config.source.geometry_file {
        Some(path) => load_geometry_file(path)?,
        None => fetch::fetch_features(client, &config.source, request).await?,
    };
    info!("Loaded {} geometry features", features.len());

    Ok((rows, features))
}

fn load_tabular_file(path: &Path, config: &AppConfig, variable: &str) -> Result<Vec<TabularRow>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| anyhow!("Tabular file has no extension: {:?}", path))?;

    match extension.as_str() {
        "csv" => load_csv_rows(path, &config.source.tabular_join_column, variable),
        "json" => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read tabular file: {:?}", path))?;
            let table: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse tabular JSON: {:?}", path))?;
            Ok(parse_census_table(&table, variable, &config.source.geoid_columns)?)
        }
        _ => Err(anyhow!("Unsupported tabular format: {}", extension)),
    }
}

pub fn load_geometry_file(path: &Path) -> Result<Vec<GeometryFeature>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read geometry file: {:?}", path))?;
    let features = parse_geometry(&content)
        .with_context(|| format!("Failed to parse geometry file: {:?}", path))?;
    Ok(features)
}

/// The GEOID joins whichever `geoid_columns` the header carries, in order.
pub fn parse_census_table(
    table: &Value,
    variable: &str,
    geoid_columns: &[String],
) -> Result<Vec<TabularRow>, PipelineError> {
    let rows = table
        .as_array()
        .ok_or_else(|| PipelineError::MalformedTable("expected a JSON array".into()))?;
    let Some((header, body)) = rows.split_first() else {
        return Err(PipelineError::MalformedTable("missing header row".into()));
    };
    let header: Vec<&str> = header
        .as_array()
        .ok_or_else(|| PipelineError::MalformedTable("header is not an array".into()))?
        .iter()
        .map(|h| h.as_str().unwrap_or(""))
        .collect();

    let value_idx = header
        .iter()
        .position(|h| *h == variable)
        .ok_or_else(|| PipelineError::MalformedTable(format!("column '{}' not in header", variable)))?;
    let id_indices: Vec<usize> = geoid_columns
        .iter()
        .filter_map(|col| header.iter().position(|h| h == col))
        .collect();
    if id_indices.is_empty() {
        return Err(PipelineError::MalformedTable(format!(
            "none of the geography columns {:?} are in the header",
            geoid_columns
        )));
    }

    let mut parsed = Vec::with_capacity(body.len());
    for (line, row) in body.iter().enumerate() {
        let cells = row
            .as_array()
            .ok_or_else(|| PipelineError::MalformedTable(format!("row {} is not an array", line + 1)))?;
        let geoid: String = id_indices
            .iter()
            .map(|&i| cells.get(i).map(cell_text).unwrap_or_default())
            .collect();
        let value = cells.get(value_idx).map(coerce_number).unwrap_or(0.0);
        parsed.push(TabularRow { geoid, value });
    }
    Ok(parsed)
}

fn load_csv_rows(path: &Path, join_column: &str, variable: &str) -> Result<Vec<TabularRow>> {
    let file = File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let join_col_idx = headers
        .iter()
        .position(|h| h == join_column)
        .ok_or_else(|| anyhow!("Join column '{}' not found in CSV", join_column))?;
    let value_idx = headers
        .iter()
        .position(|h| h == variable)
        .ok_or_else(|| anyhow!("Variable column '{}' not found in CSV", variable))?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let geoid = record.get(join_col_idx).unwrap_or("").trim();
        if geoid.is_empty() {
            continue;
        }
        let value = record
            .get(value_idx)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);
        rows.push(TabularRow::new(geoid, value));
    }
    Ok(rows)
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn coerce_number(cell: &Value) -> f64 {
    let parsed = match cell {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Parses a boundary response in either GeoJSON or Esri JSON form.
///
/// Both encodings land in the same `GeometryFeature` model: GeoJSON
/// `properties` and Esri `attributes` become the attribute mapping, and
/// polygon shapes become a `FeatureGeometry`. Non-polygon features are
/// dropped with a warning.
pub fn parse_geometry(text: &str) -> Result<Vec<GeometryFeature>, PipelineError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| PipelineError::MalformedGeometry(e.to_string()))?;

    if let Some(err) = value.get("error") {
        return Err(PipelineError::Upstream {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    let is_geojson = value.get("type").and_then(Value::as_str) == Some("FeatureCollection");
    if is_geojson {
        parse_geojson(value)
    } else if value.get("features").is_some() {
        parse_esri(value)
    } else {
        Err(PipelineError::MalformedGeometry(
            "response has no 'features' collection".into(),
        ))
    }
}

fn parse_geojson(value: Value) -> Result<Vec<GeometryFeature>, PipelineError> {
    let collection = match GeoJson::from_json_value(value) {
        Ok(GeoJson::FeatureCollection(fc)) => fc,
        Ok(_) => {
            return Err(PipelineError::MalformedGeometry(
                "GeoJSON must be a FeatureCollection".into(),
            ))
        }
        Err(e) => return Err(PipelineError::MalformedGeometry(e.to_string())),
    };

    let mut features = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            warn!(index, "skipping feature without geometry");
            continue;
        };
        let shape = match geometry.value {
            geojson::Value::Polygon(_) | geojson::Value::MultiPolygon(_) => {
                let converted: geo::Geometry<f64> = geometry
                    .value
                    .try_into()
                    .map_err(|e| PipelineError::MalformedGeometry(format!("{:?}", e)))?;
                match converted {
                    geo::Geometry::Polygon(p) => FeatureGeometry::Polygon(p),
                    geo::Geometry::MultiPolygon(mp) => FeatureGeometry::MultiPolygon(mp),
                    _ => continue,
                }
            }
            _ => {
                warn!(index, "skipping non-polygon feature");
                continue;
            }
        };
        features.push(GeometryFeature::new(shape, feature.properties.unwrap_or_default()));
    }
    Ok(features)
}

#[derive(Debug, Deserialize)]
struct EsriResponse {
    #[serde(default)]
    features: Vec<EsriFeature>,
}

#[derive(Debug, Deserialize)]
struct EsriFeature {
    #[serde(default)]
    attributes: Map<String, Value>,
    geometry: Option<EsriGeometry>,
}

#[derive(Debug, Deserialize)]
struct EsriGeometry {
    #[serde(default)]
    rings: Vec<Vec<Vec<f64>>>,
}

fn parse_esri(value: Value) -> Result<Vec<GeometryFeature>, PipelineError> {
    let response: EsriResponse =
        serde_json::from_value(value).map_err(|e| PipelineError::MalformedGeometry(e.to_string()))?;

    let mut features = Vec::with_capacity(response.features.len());
    for (index, feature) in response.features.into_iter().enumerate() {
        let rings: Vec<LineString<f64>> = feature
            .geometry
            .map(|g| g.rings)
            .unwrap_or_default()
            .into_iter()
            .map(|ring| {
                ring.into_iter()
                    .filter(|c| c.len() >= 2)
                    .map(|c| geo::Coord { x: c[0], y: c[1] })
                    .collect::<Vec<_>>()
            })
            .filter(|coords| !coords.is_empty())
            .map(|coords| {
                let mut ring = LineString::new(coords);
                ring.close();
                ring
            })
            .collect();

        let Some(geometry) = group_rings(rings) else {
            warn!(index, "skipping Esri feature without rings");
            continue;
        };
        features.push(GeometryFeature::new(geometry, feature.attributes));
    }
    Ok(features)
}

/// Esri polygons are a flat ring list: outer rings share the first ring's
/// winding (clockwise) and holes run the other way. Each hole goes to the
/// outer ring containing its first vertex.
fn group_rings(rings: Vec<LineString<f64>>) -> Option<FeatureGeometry> {
    let mut rings = rings.into_iter();
    let first = rings.next()?;
    let outer = first.winding_order();

    let mut shells: Vec<(LineString<f64>, Vec<LineString<f64>>)> = vec![(first, Vec::new())];
    let mut holes = Vec::new();
    for ring in rings {
        match (outer, ring.winding_order()) {
            (Some(outer), Some(order)) if order != outer => holes.push(ring),
            _ => shells.push((ring, Vec::new())),
        }
    }

    for hole in holes {
        let owner = hole.0.first().and_then(|start| {
            let point = Point::from(*start);
            shells
                .iter()
                .position(|(shell, _)| Polygon::new(shell.clone(), Vec::new()).contains(&point))
        });
        match owner {
            Some(i) => shells[i].1.push(hole),
            // Orphaned holes are kept as areas of their own.
            None => shells.push((hole, Vec::new())),
        }
    }

    let mut polygons: Vec<Polygon<f64>> = shells
        .into_iter()
        .map(|(exterior, interiors)| Polygon::new(exterior, interiors))
        .collect();
    if polygons.len() == 1 {
        polygons.pop().map(FeatureGeometry::Polygon)
    } else {
        Some(FeatureGeometry::MultiPolygon(MultiPolygon::new(polygons)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn columns() -> Vec<String> {
        ["state", "county", "tract", "block"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn census_table_builds_block_geoids() {
        let table = json!([
            ["H1_001N", "state", "county", "tract", "block"],
            ["12", "44", "007", "000101", "1000"],
            ["abc", "44", "007", "000101", "1001"],
            [null, "44", "007", "000102", "2000"]
        ]);
        let rows = parse_census_table(&table, "H1_001N", &columns()).unwrap();
        assert_eq!(
            rows,
            vec![
                TabularRow::new("440070001011000", 12.0),
                TabularRow::new("440070001011001", 0.0),
                TabularRow::new("440070001022000", 0.0),
            ]
        );
    }

    #[test]
    fn census_table_skips_absent_geography_columns() {
        let table = json!([["NAME", "P1_001N", "state", "county", "tract"], ["x", "7", "44", "007", "000101"]]);
        let rows = parse_census_table(&table, "P1_001N", &columns()).unwrap();
        assert_eq!(rows, vec![TabularRow::new("44007000101", 7.0)]);
    }

    #[test]
    fn census_table_requires_variable_column() {
        let table = json!([["state", "county"], ["44", "007"]]);
        assert!(matches!(
            parse_census_table(&table, "H1_001N", &columns()),
            Err(PipelineError::MalformedTable(_))
        ));
        assert!(parse_census_table(&json!([]), "H1_001N", &columns()).is_err());
        assert!(parse_census_table(&json!({"rows": []}), "H1_001N", &columns()).is_err());
    }

    #[test]
    fn geojson_polygons_and_multipolygons_ingest() {
        let text = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"GEOID": "A"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 0.0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"GEOID": "B"},
                    "geometry": {"type": "MultiPolygon", "coordinates": [[[[4.0, 4.0], [5.0, 4.0], [5.0, 5.0], [4.0, 4.0]]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"GEOID": "P"},
                    "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}
                }
            ]
        })
        .to_string();

        let features = parse_geometry(&text).unwrap();
        assert_eq!(features.len(), 2);
        assert!(matches!(features[0].geometry, FeatureGeometry::Polygon(_)));
        assert!(matches!(features[1].geometry, FeatureGeometry::MultiPolygon(_)));
        assert_eq!(features[1].attributes["GEOID"], json!("B"));
    }

    #[test]
    fn esri_rings_ingest_as_polygons() {
        // Outer ring clockwise, hole counter-clockwise.
        let text = json!({
            "features": [
                {
                    "attributes": {"GEOID": "A", "STATE": "44"},
                    "geometry": {"rings": [
                        [[0.0, 0.0, 9.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
                        [[0.2, 0.2], [0.3, 0.2], [0.3, 0.3]]
                    ]}
                },
                {"attributes": {"GEOID": "B"}, "geometry": {"rings": []}},
                {"attributes": {"GEOID": "C"}}
            ]
        })
        .to_string();

        let features = parse_geometry(&text).unwrap();
        assert_eq!(features.len(), 1);
        match &features[0].geometry {
            FeatureGeometry::Polygon(p) => {
                assert_eq!(p.exterior().0.len(), 5);
                assert_eq!(p.interiors().len(), 1);
                assert_eq!(p.interiors()[0].0.len(), 4);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
        assert_eq!(features[0].attributes["STATE"], json!("44"));
    }

    #[test]
    fn disjoint_esri_outer_rings_become_a_multi_polygon() {
        let text = json!({
            "features": [{
                "attributes": {"GEOID": "A"},
                "geometry": {"rings": [
                    [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
                    [[5.0, 5.0], [5.0, 6.0], [6.0, 6.0], [6.0, 5.0], [5.0, 5.0]],
                    [[5.2, 5.2], [5.4, 5.2], [5.4, 5.4], [5.2, 5.4], [5.2, 5.2]]
                ]}
            }]
        })
        .to_string();

        let features = parse_geometry(&text).unwrap();
        let FeatureGeometry::MultiPolygon(mp) = &features[0].geometry else {
            panic!("expected a multi-polygon, got {:?}", features[0].geometry);
        };
        assert_eq!(mp.0.len(), 2);
        assert!(mp.0[0].interiors().is_empty());
        assert_eq!(mp.0[1].interiors().len(), 1);

        let shape = features[0].geometry.to_multi_polygon();
        assert!(shape.contains(&Point::new(0.5, 0.5)));
        assert!(shape.contains(&Point::new(5.7, 5.7)));
        assert!(!shape.contains(&Point::new(5.3, 5.3)));
        assert!(!shape.contains(&Point::new(3.0, 3.0)));
    }

    #[test]
    fn arcgis_error_object_is_reported() {
        let text = r#"{"error": {"code": 400, "message": "Invalid query parameters"}}"#;
        match parse_geometry(text) {
            Err(PipelineError::Upstream { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "Invalid query parameters");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn payload_without_features_is_malformed() {
        assert!(matches!(
            parse_geometry(r#"{"type": "Feature"}"#),
            Err(PipelineError::MalformedGeometry(_))
        ));
        assert!(parse_geometry("not json").is_err());
    }

    #[test]
    fn csv_rows_coerce_bad_numbers() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "GEOID,H1_001N\nA,10\nB,n/a\n,5\nC, 3.5").unwrap();

        let rows = load_csv_rows(file.path(), "GEOID", "H1_001N").unwrap();
        assert_eq!(
            rows,
            vec![
                TabularRow::new("A", 10.0),
                TabularRow::new("B", 0.0),
                TabularRow::new("C", 3.5),
            ]
        );
    }
}
