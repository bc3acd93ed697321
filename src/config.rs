use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::NdviError;

pub const DEFAULT_CONFIG_FILE: &str = "ndvi-series.json";
pub const DEFAULT_BASE_URL: &str = "https://earthengine.googleapis.com";
pub const DEFAULT_TOKEN_ENV: &str = "EARTH_ENGINE_TOKEN";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub static_root: Option<String>,
    #[serde(default)]
    pub static_url: Option<String>,
    #[serde(default)]
    pub tmp_path: Option<String>,
    #[serde(default)]
    pub image_extraction: Option<ImageExtractionEntry>,
    #[serde(default)]
    pub earth_engine: Option<EarthEngineEntry>,
    #[serde(default)]
    pub provinces: Option<ProvincesEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ImageExtractionEntry {
    #[serde(default)]
    pub max_images: Option<usize>,
    #[serde(default)]
    pub image_format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EarthEngineEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProvincesEntry {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub name_column: Option<String>,
}

/// File format of the recombined output rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Tiff,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Tiff => "tif",
        }
    }

    pub fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Tiff => image::ImageFormat::Tiff,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = NdviError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "tif" | "tiff" => Ok(ImageFormat::Tiff),
            _ => Err(NdviError::InvalidImageFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EarthEngineSettings {
    pub base_url: String,
    pub project: Option<String>,
    pub token_env: String,
}

#[derive(Debug, Clone)]
pub struct ProvinceSettings {
    pub table_id: Option<String>,
    pub name_column: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub bind: SocketAddr,
    pub static_root: Utf8PathBuf,
    pub static_url: String,
    pub tmp_path: Utf8PathBuf,
    pub max_images: usize,
    pub image_format: ImageFormat,
    pub earth_engine: EarthEngineSettings,
    pub provinces: ProvinceSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `ndvi-series.json` from the working directory.
    ///
    /// A missing default file resolves to the built-in defaults; an explicit
    /// path that cannot be read is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, NdviError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| NdviError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| NdviError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, NdviError> {
        let bind = config
            .bind
            .as_deref()
            .unwrap_or("127.0.0.1:8000")
            .parse::<SocketAddr>()
            .map_err(|err| NdviError::ConfigParse(format!("bind: {err}")))?;

        let static_root =
            Utf8PathBuf::from(config.static_root.unwrap_or_else(|| "static".to_string()));
        let static_url =
            normalize_static_url(config.static_url.as_deref().unwrap_or("/static/"));
        let tmp_path = match config.tmp_path {
            Some(path) => Utf8PathBuf::from(path),
            None => default_tmp_path()?,
        };

        let extraction = config.image_extraction.unwrap_or_default();
        let max_images = extraction.max_images.unwrap_or(10);
        let image_format = match extraction.image_format {
            Some(value) => value.parse()?,
            None => ImageFormat::default(),
        };

        let earth_engine = config.earth_engine.unwrap_or_default();
        let earth_engine = EarthEngineSettings {
            base_url: earth_engine
                .base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            project: earth_engine.project.filter(|value| !value.trim().is_empty()),
            token_env: earth_engine
                .token_env
                .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string()),
        };

        let provinces = config.provinces.unwrap_or_default();
        let provinces = ProvinceSettings {
            table_id: provinces.table_id.filter(|value| !value.trim().is_empty()),
            name_column: provinces.name_column.unwrap_or_else(|| "NAME_1".to_string()),
        };

        Ok(ResolvedConfig {
            bind,
            static_root,
            static_url,
            tmp_path,
            max_images,
            image_format,
            earth_engine,
            provinces,
        })
    }
}

fn normalize_static_url(value: &str) -> String {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    format!("/{trimmed}/")
}

fn default_tmp_path() -> Result<Utf8PathBuf, NdviError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("ndvi-series").join("tmp")).ok()
        })
        .ok_or_else(|| NdviError::Filesystem("unable to resolve cache directory".to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.bind.to_string(), "127.0.0.1:8000");
        assert_eq!(resolved.static_url, "/static/");
        assert_eq!(resolved.max_images, 10);
        assert_eq!(resolved.image_format, ImageFormat::Png);
        assert_eq!(resolved.earth_engine.base_url, DEFAULT_BASE_URL);
        assert_eq!(resolved.earth_engine.token_env, DEFAULT_TOKEN_ENV);
        assert!(resolved.earth_engine.project.is_none());
        assert_eq!(resolved.provinces.name_column, "NAME_1");
        assert!(resolved.tmp_path.ends_with("ndvi-series/tmp"));
    }

    #[test]
    fn static_url_is_normalized() {
        assert_eq!(normalize_static_url("media"), "/media/");
        assert_eq!(normalize_static_url("/media/"), "/media/");
        assert_eq!(normalize_static_url("/"), "/");
    }

    #[test]
    fn invalid_image_format_is_rejected() {
        let config = Config {
            image_extraction: Some(ImageExtractionEntry {
                max_images: None,
                image_format: Some("bmp".to_string()),
            }),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(NdviError::InvalidImageFormat(_))
        );
    }
}
