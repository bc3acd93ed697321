use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NdviError {
    #[error("Invalid value for satellite. Allowed values are {allowed}")]
    InvalidSatellite { value: String, allowed: String },

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("invalid dimensions (expected WIDTHxHEIGHT): {0}")]
    InvalidDimensions(String),

    #[error("revisit interval must be at least one day")]
    InvalidInterval,

    #[error("invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing config value: {0}")]
    MissingConfigValue(String),

    #[error("Earth Engine request failed: {0}")]
    EarthEngineHttp(String),

    #[error("Earth Engine returned status {status}: {message}")]
    EarthEngineStatus { status: u16, message: String },

    #[error("unexpected Earth Engine response: {0}")]
    EarthEngineResponse(String),

    #[error("province not found: {0}")]
    ProvinceNotFound(String),

    #[error("image series not found: {0}")]
    SeriesNotFound(String),

    #[error("raster error: {0}")]
    Raster(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NdviError {
    /// True when the error was caused by the caller's input rather than by
    /// the remote service or the local filesystem.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            NdviError::InvalidSatellite { .. }
                | NdviError::InvalidDate(_)
                | NdviError::InvalidDimensions(_)
                | NdviError::InvalidInterval
                | NdviError::ProvinceNotFound(_)
        )
    }

    pub fn is_remote_error(&self) -> bool {
        matches!(
            self,
            NdviError::EarthEngineHttp(_)
                | NdviError::EarthEngineStatus { .. }
                | NdviError::EarthEngineResponse(_)
        )
    }
}
