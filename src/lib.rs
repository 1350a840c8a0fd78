//! Census choropleth builder.
//!
//! Joins Census Data API measurements onto TIGERweb boundaries by GEOID,
//! colors each boundary on a linear two-color ramp and hands the result to a
//! GeoJSON file, a PNG preview or the browser dashboard.

pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod fetch;
pub mod join;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod types;
