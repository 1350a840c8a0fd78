use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::color::{DEFAULT_HIGH, DEFAULT_LOW};
use crate::types::{Centroid, Rgb};

pub const CENSUS_API_KEY_VAR: &str = "CENSUS_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub census_base_url: String,
    pub tigerweb_layer_url: String,
    pub state_fips: String,
    pub county_fips: String,
    pub geography: String,
    /// Header columns concatenated, in order, to form a GEOID.
    pub geoid_columns: Vec<String>,
    pub api_key: Option<String>,
    /// Offline replacements for the two HTTP sources.
    pub tabular_file: Option<PathBuf>,
    pub geometry_file: Option<PathBuf>,
    pub tabular_join_column: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            census_base_url: "https://api.census.gov/data/2020/dec/dhc".to_string(),
            tigerweb_layer_url:
                "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb/tigerWMS_Census2020/MapServer/14"
                    .to_string(),
            state_fips: "44".to_string(),
            county_fips: "007".to_string(),
            geography: "block".to_string(),
            geoid_columns: ["state", "county", "tract", "block"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            api_key: None,
            tabular_file: None,
            geometry_file: None,
            tabular_join_column: "GEOID".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub variable: String,
    pub id_field: String,
    pub color_attribute: String,
    pub low_color: String,
    pub high_color: String,
    /// `[lon, lat]` used when no coordinate can be extracted.
    pub fallback_center: [f64; 2],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variable: "H1_001N".to_string(),
            id_field: "GEOID".to_string(),
            color_attribute: "fill_color".to_string(),
            low_color: hex(DEFAULT_LOW),
            high_color: hex(DEFAULT_HIGH),
            fallback_center: [-71.5, 41.7],
        }
    }
}

impl PipelineConfig {
    pub fn ramp(&self) -> Result<(Rgb, Rgb)> {
        let low = Rgb::from_hex(&self.low_color).context("Invalid pipeline.low_color")?;
        let high = Rgb::from_hex(&self.high_color).context("Invalid pipeline.high_color")?;
        Ok((low, high))
    }

    pub fn fallback_centroid(&self) -> Centroid {
        Centroid {
            lon: self.fallback_center[0],
            lat: self.fallback_center[1],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub geojson: PathBuf,
    pub preview_png: Option<PathBuf>,
    pub preview_width: u32,
    pub preview_height: u32,
    pub zoom: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            geojson: PathBuf::from("output/choropleth.geojson"),
            preview_png: None,
            preview_width: 1024,
            preview_height: 768,
            zoom: 12,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: PathBuf::from("web"),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        if config.source.api_key.is_none() {
            dotenvy::dotenv().ok();
            config.source.api_key = std::env::var(CENSUS_API_KEY_VAR)
                .ok()
                .filter(|k| !k.is_empty());
        }
        config.pipeline.ramp()?;
        Ok(config)
    }
}

fn hex(color: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", color.0[0], color.0[1], color.0[2])
}
