//! HTTP surface of the service.
//!
//! Rendering is blocking work (remote exports, zip extraction, image
//! encoding) and runs on the blocking thread pool; handlers only validate
//! input and shape responses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::app::{App, SeriesResult};
use crate::cache_key::cache_key;
use crate::config::ResolvedConfig;
use crate::domain::{IsoDate, Satellite, SeriesRequest};
use crate::earth_engine::EarthEngineClient;
use crate::error::NdviError;
use crate::output::LogSink;
use crate::store::SeriesMetadata;

pub struct ServerState<C: EarthEngineClient> {
    pub app: App<C>,
    pub static_root: Utf8PathBuf,
    pub static_url: String,
}

impl<C: EarthEngineClient> ServerState<C> {
    pub fn new(config: &ResolvedConfig, client: C) -> Self {
        Self {
            app: App::from_config(config, client),
            static_root: config.static_root.clone(),
            static_url: config.static_url.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SeriesParams {
    pub satellite: Option<String>,
    pub dimensions: Option<String>,
    pub province: Option<String>,
}

/// JSON error envelope: `{"success": false, "truncated": false, "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "Not Found".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<NdviError> for ApiError {
    fn from(err: NdviError) -> Self {
        let status = if matches!(err, NdviError::SeriesNotFound(_)) {
            StatusCode::NOT_FOUND
        } else if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if err.is_remote_error() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "truncated": false,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn router<C: EarthEngineClient + 'static>(state: Arc<ServerState<C>>) -> Router {
    let static_route = format!("{}{{*path}}", state.static_url);
    Router::new()
        .route("/earth-engine/ndvi", get(index))
        .route(
            "/earth-engine/ndvi/download-image-series/{startdate}/{enddate}",
            get(download_image_series::<C>),
        )
        .route(
            "/earth-engine/ndvi/series/{key}/metadata",
            get(series_metadata::<C>),
        )
        .route(&static_route, get(static_file::<C>))
        .with_state(state)
}

pub async fn serve<C: EarthEngineClient + 'static>(
    state: Arc<ServerState<C>>,
    bind: SocketAddr,
) -> Result<(), NdviError> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| NdviError::Internal(format!("bind {bind}: {err}")))?;
    info!(%bind, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| NdviError::Internal(err.to_string()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

pub async fn index() -> Json<serde_json::Value> {
    Json(json!({ "ndvi": "I am NDVI api endpoint" }))
}

/// Builds a request from route and query values. Dates that do not look
/// like `YYYY-MM-DD` do not match the route at all, hence `404`.
pub fn parse_series_request(
    startdate: &str,
    enddate: &str,
    params: SeriesParams,
) -> Result<SeriesRequest, ApiError> {
    if !IsoDate::matches_pattern(startdate) || !IsoDate::matches_pattern(enddate) {
        return Err(ApiError::not_found());
    }
    let satellite = match params.satellite.as_deref() {
        Some(value) => value.parse::<Satellite>()?,
        None => Satellite::default(),
    };
    let request = SeriesRequest::new(startdate.parse()?, enddate.parse()?)
        .with_satellite(satellite)
        .with_province(params.province);
    match params.dimensions.as_deref() {
        Some(value) => Ok(request.with_dimensions_text(value)?),
        None => Ok(request),
    }
}

pub async fn download_image_series<C: EarthEngineClient + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    Path((startdate, enddate)): Path<(String, String)>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<SeriesResult>, ApiError> {
    let request = parse_series_request(&startdate, &enddate, params)?;
    let key = cache_key(&request);
    info!(
        %key,
        satellite = %request.satellite,
        dimensions = %request.dimensions,
        province = request.province.as_deref().unwrap_or("-"),
        "image series requested"
    );

    let result = tokio::task::spawn_blocking(move || {
        let sink = LogSink { request: key };
        state.app.download_image_series(&request, &sink)
    })
    .await
    .map_err(|err| NdviError::Internal(err.to_string()))??;

    Ok(Json(result))
}

pub async fn series_metadata<C: EarthEngineClient + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    Path(key): Path<String>,
) -> Result<Json<SeriesMetadata>, ApiError> {
    let metadata = tokio::task::spawn_blocking(move || state.app.series_metadata(&key))
        .await
        .map_err(|err| NdviError::Internal(err.to_string()))??;
    Ok(Json(metadata))
}

pub async fn static_file<C: EarthEngineClient + 'static>(
    State(state): State<Arc<ServerState<C>>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let relative = Utf8Path::new(&path);
    let is_plain = relative
        .components()
        .all(|component| matches!(component, Utf8Component::Normal(_)));
    if path.is_empty() || !is_plain {
        return Err(ApiError::not_found());
    }

    let full = state.static_root.join(relative);
    let bytes = tokio::fs::read(full.as_std_path())
        .await
        .map_err(|_| ApiError::not_found())?;
    Ok(([(header::CONTENT_TYPE, content_type(&full))], bytes).into_response())
}

fn content_type(path: &Utf8Path) -> &'static str {
    match path.extension() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::Dimensions;

    #[test]
    fn malformed_dates_are_not_found() {
        let err = parse_series_request("2017-1-01", "2017-02-01", SeriesParams::default())
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn impossible_dates_are_bad_requests() {
        let err = parse_series_request("2017-02-31", "2017-03-01", SeriesParams::default())
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invalid_satellite_message() {
        let params = SeriesParams {
            satellite: Some("modis".to_string()),
            ..SeriesParams::default()
        };
        let err = parse_series_request("2017-01-01", "2017-02-01", params).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.message,
            "Invalid value for satellite. Allowed values are landsat-8, sentinel-1, sentinel-2"
        );
    }

    #[test]
    fn defaults_apply() {
        let request =
            parse_series_request("2017-01-01", "2017-02-01", SeriesParams::default()).unwrap();
        assert_eq!(request.satellite, Satellite::Landsat8);
        assert_eq!(request.dimensions, Dimensions::default());
        assert_matches!(request.province, None);
    }

    #[test]
    fn dimensions_query_is_kept_verbatim() {
        let params = SeriesParams {
            dimensions: Some("0256x256".to_string()),
            ..SeriesParams::default()
        };
        let padded = parse_series_request("2017-01-01", "2017-02-01", params).unwrap();
        let plain =
            parse_series_request("2017-01-01", "2017-02-01", SeriesParams::default()).unwrap();
        assert_eq!(padded.dimensions, plain.dimensions);
        assert_eq!(padded.dimensions_text, "0256x256");
        assert_ne!(cache_key(&padded), cache_key(&plain));
    }

    #[test]
    fn error_statuses() {
        let remote: ApiError = NdviError::EarthEngineStatus {
            status: 403,
            message: "denied".to_string(),
        }
        .into();
        assert_eq!(remote.status(), StatusCode::BAD_GATEWAY);

        let local: ApiError = NdviError::Filesystem("disk full".to_string()).into();
        assert_eq!(local.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let missing: ApiError = NdviError::SeriesNotFound("abc".to_string()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Utf8Path::new("a/2017-01-01.png")), "image/png");
        assert_eq!(content_type(Utf8Path::new("a/metadata.json")), "application/json");
        assert_eq!(content_type(Utf8Path::new("a/blob")), "application/octet-stream");
    }
}
