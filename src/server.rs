use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::export::MapDocument;
use crate::pipeline::{build_map, MapLayer, MapRequest};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

pub struct AppState {
    pub config: AppConfig,
    pub client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegionParams {
    state: Option<String>,
    county: Option<String>,
    variable: Option<String>,
    zoom: Option<u8>,
}

impl RegionParams {
    fn into_request(self, config: &AppConfig) -> MapRequest {
        MapRequest::from_config(config)
            .with_overrides(self.state, self.county, self.variable)
            .with_zoom(self.zoom)
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
    state: Option<String>,
    county: Option<String>,
    variable: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    id: Option<String>,
    value: Option<f64>,
    fill_color: Option<Value>,
}

pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Upstream payloads that break the ingestion contract are a gateway problem.
        let status = if self.0.downcast_ref::<PipelineError>().is_some() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        error!("request failed: {:#}", self.0);
        (status, Json(serde_json::json!({ "error": format!("{:#}", self.0) }))).into_response()
    }
}

pub fn router(config: AppConfig) -> Router {
    let static_dir = ServeDir::new(&config.server.static_dir);
    let state = Arc::new(AppState {
        config,
        client: reqwest::Client::new(),
    });

    Router::new()
        .route("/api/map", get(map_handler))
        .route("/api/query", get(query_handler))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    let app = router(config);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegionParams>,
) -> Result<Json<MapDocument>, ApiError> {
    let request = params.into_request(&state.config);
    let layer = build_map(&state.config, &request, &state.client).await?;
    Ok(Json(MapDocument::new(&layer, request.zoom)))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Option<QueryResponse>>, ApiError> {
    let request = MapRequest::from_config(&state.config).with_overrides(
        params.state,
        params.county,
        params.variable,
    );
    let layer = build_map(&state.config, &request, &state.client).await?;
    Ok(Json(locate(&layer, &state.config, params.lon, params.lat)))
}

// One lookup per request, so a bounding-box prefilter beats building an index.
fn locate(layer: &MapLayer, config: &AppConfig, lon: f64, lat: f64) -> Option<QueryResponse> {
    let point = Point::new(lon, lat);
    let (index, feature) = layer.features.iter().enumerate().find(|(_, f)| {
        let shape: MultiPolygon<f64> = f.geometry.to_multi_polygon();
        shape.bounding_rect().is_some_and(|rect| rect.contains(&point)) && shape.contains(&point)
    })?;

    Some(QueryResponse {
        id: feature.identifier(index, &config.pipeline.id_field).ok(),
        value: feature.numeric_attribute(&layer.variable),
        fill_color: feature
            .attributes
            .get(&config.pipeline.color_attribute)
            .cloned(),
    })
}
