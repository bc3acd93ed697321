use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::config::EarthEngineSettings;
use crate::earth_engine::expression::Expression;
use crate::error::NdviError;

/// Parameters of a per-band zipped GeoTIFF export.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    /// Used as the filename prefix of every band inside the archive.
    pub name: String,
    pub expression: Expression,
}

pub trait EarthEngineClient: Send + Sync {
    /// Evaluates an expression and returns its JSON value (`getInfo`).
    fn compute_value(&self, expression: &Expression) -> Result<Json, NdviError>;

    /// Registers an export and returns the URL serving its zip archive.
    fn download_url(&self, request: &DownloadRequest) -> Result<String, NdviError>;

    /// Streams the archive behind `url` into `destination`.
    fn download(&self, url: &str, destination: &Path) -> Result<(), NdviError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeValueBody<'a> {
    expression: &'a Expression,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailBody<'a> {
    expression: &'a Expression,
    file_format: &'static str,
    filename_prefix: &'a str,
}

#[derive(Clone)]
pub struct EarthEngineHttpClient {
    client: Client,
    base_url: String,
    project: String,
    token: Option<String>,
}

impl EarthEngineHttpClient {
    pub fn new(settings: &EarthEngineSettings) -> Result<Self, NdviError> {
        let project = settings
            .project
            .clone()
            .ok_or_else(|| NdviError::MissingConfigValue("earth_engine.project".to_string()))?;

        let token = std::env::var(&settings.token_env)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        if token.is_none() {
            warn!(
                env = %settings.token_env,
                "no Earth Engine access token set; requests will be unauthenticated"
            );
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ndvi-series/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NdviError::EarthEngineHttp(err.to_string()))?,
        );
        headers.insert(
            "x-goog-user-project",
            HeaderValue::from_str(&project)
                .map_err(|err| NdviError::EarthEngineHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| NdviError::EarthEngineHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            project,
            token,
        })
    }

    fn project_url(&self, method: &str) -> String {
        format!("{}/v1/projects/{}/{}", self.base_url, self.project, method)
    }

    pub fn pixels_url(base_url: &str, name: &str) -> String {
        format!("{base_url}/v1/{name}:getPixels")
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn handle_status(response: Response) -> Result<Response, NdviError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Earth Engine request failed".to_string());
        Err(NdviError::EarthEngineStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, NdviError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = self.authorize(make_req()).send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, attempt, delay_ms = delay, "retrying Earth Engine request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(
                            error = %err,
                            attempt,
                            delay_ms = delay,
                            "retrying Earth Engine request"
                        );
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(NdviError::EarthEngineHttp(err.to_string()));
                }
            }
        }
    }
}

impl EarthEngineClient for EarthEngineHttpClient {
    fn compute_value(&self, expression: &Expression) -> Result<Json, NdviError> {
        let url = self.project_url("value:compute");
        let body = ComputeValueBody { expression };
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        let response = Self::handle_status(response)?;
        let mut payload: Json = response
            .json()
            .map_err(|err| NdviError::EarthEngineResponse(err.to_string()))?;
        payload
            .get_mut("result")
            .map(Json::take)
            .ok_or_else(|| NdviError::EarthEngineResponse("missing `result`".to_string()))
    }

    fn download_url(&self, request: &DownloadRequest) -> Result<String, NdviError> {
        let url = self.project_url("thumbnails");
        let body = ThumbnailBody {
            expression: &request.expression,
            file_format: "ZIPPED_GEO_TIFF_PER_BAND",
            filename_prefix: &request.name,
        };
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        let response = Self::handle_status(response)?;
        let payload: Json = response
            .json()
            .map_err(|err| NdviError::EarthEngineResponse(err.to_string()))?;
        let name = payload
            .get("name")
            .and_then(|value| value.as_str())
            .ok_or_else(|| NdviError::EarthEngineResponse("missing thumbnail `name`".to_string()))?;
        Ok(Self::pixels_url(&self.base_url, name))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), NdviError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| NdviError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| NdviError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Only transport failures that a later attempt can plausibly get past.
fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earth_engine::expression::Value;

    #[test]
    fn pixels_url_appends_method() {
        assert_eq!(
            EarthEngineHttpClient::pixels_url(
                "https://earthengine.googleapis.com",
                "projects/demo/thumbnails/abc123"
            ),
            "https://earthengine.googleapis.com/v1/projects/demo/thumbnails/abc123:getPixels"
        );
    }

    #[test]
    fn thumbnail_body_uses_camel_case() {
        let expression = Expression::new(&Value::string("x"));
        let body = ThumbnailBody {
            expression: &expression,
            file_format: "ZIPPED_GEO_TIFF_PER_BAND",
            filename_prefix: "ndvi-landsat-8-2017-01-01-2017-01-16",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["fileFormat"], "ZIPPED_GEO_TIFF_PER_BAND");
        assert_eq!(json["filenamePrefix"], "ndvi-landsat-8-2017-01-01-2017-01-16");
        assert_eq!(json["expression"]["result"], "0");
    }

    #[test]
    fn client_requires_project() {
        let settings = EarthEngineSettings {
            base_url: "http://localhost".to_string(),
            project: None,
            token_env: "NDVI_SERIES_TEST_TOKEN".to_string(),
        };
        assert!(matches!(
            EarthEngineHttpClient::new(&settings),
            Err(NdviError::MissingConfigValue(_))
        ));
    }

    #[test]
    fn malformed_requests_are_not_retried() {
        let err = Client::new().get("not a url").send().unwrap_err();
        assert!(err.is_builder());
        assert!(!is_retryable_error(&err));
    }

    #[test]
    fn unreachable_hosts_are_retried() {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = client.get("http://127.0.0.1:9/").send().unwrap_err();
        assert!(err.is_connect() || err.is_timeout());
        assert!(is_retryable_error(&err));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
    }
}
