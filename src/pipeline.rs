use crate::color::{apply_color_scale, ColorScale};
use crate::config::{AppConfig, PipelineConfig};
use crate::data;
use crate::join::{join_rows, JoinSummary};
use crate::types::{Centroid, GeometryFeature, TabularRow};
use anyhow::Result;
use tracing::info;

pub const MIN_ZOOM: u8 = 5;
pub const MAX_ZOOM: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRequest {
    pub state_fips: String,
    pub county_fips: String,
    pub variable: String,
    pub zoom: u8,
}

impl MapRequest {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            state_fips: config.source.state_fips.clone(),
            county_fips: config.source.county_fips.clone(),
            variable: config.pipeline.variable.clone(),
            zoom: config.output.zoom.clamp(MIN_ZOOM, MAX_ZOOM),
        }
    }

    pub fn with_overrides(
        mut self,
        state_fips: Option<String>,
        county_fips: Option<String>,
        variable: Option<String>,
    ) -> Self {
        if let Some(s) = state_fips {
            self.state_fips = s;
        }
        if let Some(c) = county_fips {
            self.county_fips = c;
        }
        if let Some(v) = variable {
            self.variable = v;
        }
        self
    }

    pub fn with_zoom(mut self, zoom: Option<u8>) -> Self {
        if let Some(z) = zoom {
            self.zoom = z.clamp(MIN_ZOOM, MAX_ZOOM);
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct MapLayer {
    pub variable: String,
    pub features: Vec<GeometryFeature>,
    pub scale: ColorScale,
    pub center: Centroid,
    pub join: JoinSummary,
}

pub fn run_pipeline(
    rows: &[TabularRow],
    mut features: Vec<GeometryFeature>,
    variable: &str,
    config: &PipelineConfig,
) -> Result<MapLayer> {
    let join = join_rows(rows, &mut features, &config.id_field, variable)?;
    let (low, high) = config.ramp()?;
    let scale = apply_color_scale(&mut features, variable, &config.color_attribute, low, high);
    let center = compute_centroid(&features, config.fallback_centroid());
    info!(lon = center.lon, lat = center.lat, "map center");

    Ok(MapLayer {
        variable: variable.to_string(),
        features,
        scale,
        center,
        join,
    })
}

/// Mean of every coordinate on every feature's first ring, or `fallback`
/// when there is none.
pub fn compute_centroid(features: &[GeometryFeature], fallback: Centroid) -> Centroid {
    let (sum_lon, sum_lat, count) = features
        .iter()
        .filter_map(|f| f.geometry.first_ring())
        .flat_map(|ring| ring.coords())
        .fold((0.0, 0.0, 0usize), |(x, y, n), c| (x + c.x, y + c.y, n + 1));

    if count == 0 {
        return fallback;
    }
    Centroid {
        lon: sum_lon / count as f64,
        lat: sum_lat / count as f64,
    }
}

pub async fn build_map(
    config: &AppConfig,
    request: &MapRequest,
    client: &reqwest::Client,
) -> Result<MapLayer> {
    info!(
        state = %request.state_fips,
        county = %request.county_fips,
        variable = %request.variable,
        "building map"
    );
    let (rows, features) = data::load_inputs(config, request, client).await?;
    run_pipeline(&rows, features, &request.variable, &config.pipeline)
}
