use crate::pipeline::MapLayer;
use crate::types::{Centroid, FeatureGeometry, GeometryFeature};
use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct MapDocument {
    pub variable: String,
    pub center: Centroid,
    pub zoom: u8,
    pub min: f64,
    pub max: f64,
    pub features: FeatureCollection,
}

impl MapDocument {
    pub fn new(layer: &MapLayer, zoom: u8) -> Self {
        Self {
            variable: layer.variable.clone(),
            center: layer.center,
            zoom,
            min: layer.scale.min,
            max: layer.scale.max,
            features: to_feature_collection(&layer.features),
        }
    }
}

pub fn to_feature(feature: &GeometryFeature) -> Feature {
    let value = match &feature.geometry {
        FeatureGeometry::Polygon(p) => geojson::Value::from(p),
        FeatureGeometry::MultiPolygon(mp) => geojson::Value::from(mp),
    };
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(feature.attributes.clone()),
        foreign_members: None,
    }
}

pub fn to_feature_collection(features: &[GeometryFeature]) -> FeatureCollection {
    features.iter().map(to_feature).collect()
}

pub fn write_geojson(path: &Path, features: &[GeometryFeature]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
    }
    let out = GeoJson::from(to_feature_collection(features));
    fs::write(path, out.to_string()).with_context(|| format!("Failed to write GeoJSON: {:?}", path))?;
    Ok(())
}
