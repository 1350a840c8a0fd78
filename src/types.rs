use geo::{LineString, MultiPolygon, Polygon};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct TabularRow {
    pub geoid: String,
    pub value: f64,
}

impl TabularRow {
    pub fn new(geoid: impl Into<String>, value: f64) -> Self {
        Self {
            geoid: geoid.into(),
            value,
        }
    }
}

/// Polygon kinds a boundary service can return, resolved once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl FeatureGeometry {
    /// Exterior of the polygon, or of the first polygon of a multi-polygon.
    pub fn first_ring(&self) -> Option<&LineString<f64>> {
        match self {
            FeatureGeometry::Polygon(p) => Some(p.exterior()),
            FeatureGeometry::MultiPolygon(mp) => mp.0.first().map(|p| p.exterior()),
        }
    }

    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        match self {
            FeatureGeometry::Polygon(p) => MultiPolygon::new(vec![p.clone()]),
            FeatureGeometry::MultiPolygon(mp) => mp.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryFeature {
    pub geometry: FeatureGeometry,
    pub attributes: Map<String, Value>,
}

impl GeometryFeature {
    pub fn new(geometry: FeatureGeometry, attributes: Map<String, Value>) -> Self {
        Self {
            geometry,
            attributes,
        }
    }

    // Numeric identifiers are compared by their decimal text.
    pub fn identifier(&self, index: usize, field: &str) -> Result<String, PipelineError> {
        match self.attributes.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(PipelineError::MissingIdentifier {
                index,
                field: field.to_string(),
            }),
        }
    }

    pub fn numeric_attribute(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub fn from_hex(hex: &str) -> Result<Self, PipelineError> {
        let digits = hex.trim_start_matches('#');
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PipelineError::InvalidColor(hex.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| PipelineError::InvalidColor(hex.to_string()))
        };
        Ok(Rgb([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }

    pub fn to_value(self) -> Value {
        Value::from(self.0.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Centroid {
    pub lon: f64,
    pub lat: f64,
}
