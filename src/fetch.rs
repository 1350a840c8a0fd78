use crate::config::SourceConfig;
use crate::data::{parse_census_table, parse_geometry};
use crate::pipeline::MapRequest;
use crate::types::{GeometryFeature, TabularRow};
use anyhow::{bail, Context, Result};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::info;

pub fn census_url(source: &SourceConfig, request: &MapRequest) -> Result<Url> {
    let in_clause = format!("state:{};county:{}", request.state_fips, request.county_fips);
    let for_clause = format!("{}:*", source.geography);

    let mut url = Url::parse_with_params(
        &source.census_base_url,
        &[
            ("get", request.variable.as_str()),
            ("for", for_clause.as_str()),
            ("in", in_clause.as_str()),
        ],
    )
    .with_context(|| format!("Invalid census_base_url: {}", source.census_base_url))?;
    if let Some(key) = &source.api_key {
        url.query_pairs_mut().append_pair("key", key);
    }
    Ok(url)
}

pub fn tigerweb_url(source: &SourceConfig, request: &MapRequest) -> Result<Url> {
    let base = format!("{}/query", source.tigerweb_layer_url.trim_end_matches('/'));
    let filter = format!(
        "STATE='{}' AND COUNTY='{}'",
        request.state_fips, request.county_fips
    );
    Url::parse_with_params(
        &base,
        &[
            ("where", filter.as_str()),
            ("outFields", "*"),
            ("outSR", "4326"),
            ("returnGeometry", "true"),
            ("f", "geojson"),
        ],
    )
    .with_context(|| format!("Invalid tigerweb_layer_url: {}", source.tigerweb_layer_url))
}

pub async fn fetch_rows(
    client: &Client,
    source: &SourceConfig,
    request: &MapRequest,
) -> Result<Vec<TabularRow>> {
    let url = census_url(source, request)?;
    info!(url = %redact_key(&url), "fetching census table");

    let body = get_text(client, url, "Census API").await?;
    let table: Value = serde_json::from_str(&body).context("Census API returned invalid JSON")?;
    Ok(parse_census_table(&table, &request.variable, &source.geoid_columns)?)
}

pub async fn fetch_features(
    client: &Client,
    source: &SourceConfig,
    request: &MapRequest,
) -> Result<Vec<GeometryFeature>> {
    let url = tigerweb_url(source, request)?;
    info!(url = %url, "fetching boundaries");

    let body = get_text(client, url, "TIGERweb").await?;
    Ok(parse_geometry(&body)?)
}

async fn get_text(client: &Client, url: Url, service: &str) -> Result<String> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", service))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read {} response", service))?;
    if !status.is_success() {
        bail!("{} returned {}: {}", service, status, body);
    }
    Ok(body)
}

fn redact_key(url: &Url) -> Url {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted
}
