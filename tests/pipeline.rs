//! End-to-end pipeline tests over in-memory inputs and offline fixture files.

use census_choropleth::color::ColorScale;
use census_choropleth::config::{AppConfig, PipelineConfig};
use census_choropleth::pipeline::{build_map, run_pipeline, MapRequest};
use census_choropleth::types::{Centroid, FeatureGeometry, GeometryFeature, TabularRow};
use geo::polygon;
use serde_json::{json, Map};
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn feature(id: &str) -> GeometryFeature {
    let mut attrs = Map::new();
    attrs.insert("GEOID".into(), json!(id));
    GeometryFeature::new(
        FeatureGeometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]),
        attrs,
    )
}

fn offline_config(tabular: &str, geometry: &str) -> AppConfig {
    let mut config = AppConfig::from_toml("").unwrap();
    config.source.tabular_file = Some(fixture(tabular));
    config.source.geometry_file = Some(fixture(geometry));
    config
}

#[test]
fn three_feature_scenario() {
    let rows = vec![TabularRow::new("A", 10.0), TabularRow::new("B", 20.0)];
    let features = vec![feature("A"), feature("B"), feature("C")];

    let layer = run_pipeline(&rows, features, "v", &PipelineConfig::default()).unwrap();

    let values: Vec<f64> = layer
        .features
        .iter()
        .map(|f| f.numeric_attribute("v").unwrap())
        .collect();
    assert_eq!(values, vec![10.0, 20.0, 0.0]);
    assert_eq!((layer.scale.min, layer.scale.max), (0.0, 20.0));
    assert_eq!(
        values.iter().map(|v| layer.scale.ratio(*v)).collect::<Vec<_>>(),
        vec![0.5, 1.0, 0.0]
    );
    assert_eq!(layer.features[0].attributes["fill_color"], json!([128, 128, 0]));
    assert_eq!(layer.features[1].attributes["fill_color"], json!([255, 0, 0]));
    assert_eq!(layer.features[2].attributes["fill_color"], json!([0, 255, 0]));
}

#[test]
fn single_matching_feature_is_degenerate() {
    let rows = vec![TabularRow::new("A", 5.0)];
    let layer = run_pipeline(&rows, vec![feature("A")], "v", &PipelineConfig::default()).unwrap();

    assert_eq!((layer.scale.min, layer.scale.max), (5.0, 5.0));
    assert_eq!(layer.scale.ratio(5.0), 0.0);
    assert_eq!(layer.features[0].attributes["fill_color"], json!([0, 255, 0]));
}

#[test]
fn empty_geometry_set_falls_back() {
    let rows = vec![TabularRow::new("A", 5.0)];
    let layer = run_pipeline(&rows, Vec::new(), "v", &PipelineConfig::default()).unwrap();

    assert!(layer.features.is_empty());
    assert_eq!(layer.center, Centroid { lon: -71.5, lat: 41.7 });
    assert_eq!(
        layer.scale,
        ColorScale::from_values(std::iter::empty(), layer.scale.low, layer.scale.high)
    );
    assert_eq!((layer.scale.min, layer.scale.max), (0.0, 1.0));
}

#[test]
fn rerunning_the_pipeline_on_its_output_is_stable() {
    let rows = vec![TabularRow::new("A", 3.0), TabularRow::new("C", 9.0)];
    let first = run_pipeline(
        &rows,
        vec![feature("A"), feature("B"), feature("C")],
        "v",
        &PipelineConfig::default(),
    )
    .unwrap();
    let second = run_pipeline(&rows, first.features.clone(), "v", &PipelineConfig::default()).unwrap();
    assert_eq!(first.features, second.features);
}

#[tokio::test]
async fn offline_census_table_and_geojson() {
    let config = offline_config("census_blocks.json", "blocks.geojson");
    let request = MapRequest::from_config(&config);

    let layer = build_map(&config, &request, &reqwest::Client::new())
        .await
        .unwrap();

    let by_id: Vec<(String, f64)> = layer
        .features
        .iter()
        .enumerate()
        .map(|(i, f)| {
            (
                f.identifier(i, "GEOID").unwrap(),
                f.numeric_attribute("H1_001N").unwrap(),
            )
        })
        .collect();
    assert_eq!(
        by_id,
        vec![
            ("440070001011000".to_string(), 10.0),
            ("440070001011001".to_string(), 20.0),
            ("440070001011002".to_string(), 0.0),
        ]
    );
    assert_eq!(layer.join.matched, 2);
    assert_eq!(layer.join.unmatched, 1);
    assert!((layer.center.lon + 71.406).abs() < 1e-9);
    assert!((layer.center.lat - 41.824).abs() < 1e-9);
    assert_eq!(layer.features[0].attributes["NAME"], json!("Block 1000"));
}

#[tokio::test]
async fn esri_and_csv_sources_agree_with_geojson() {
    let geojson = offline_config("census_blocks.json", "blocks.geojson");
    let esri = offline_config("blocks.csv", "blocks_esri.json");
    let client = reqwest::Client::new();

    let a = build_map(&geojson, &MapRequest::from_config(&geojson), &client)
        .await
        .unwrap();
    let b = build_map(&esri, &MapRequest::from_config(&esri), &client)
        .await
        .unwrap();

    let colors = |layer: &census_choropleth::pipeline::MapLayer| {
        layer
            .features
            .iter()
            .map(|f| f.attributes["fill_color"].clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(colors(&a), colors(&b));
    assert_eq!(a.scale, b.scale);
}
