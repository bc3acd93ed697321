use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::warn;

use crate::cache_key::cache_key;
use crate::config::{ProvinceSettings, ResolvedConfig};
use crate::domain::{DateRange, SeriesRequest};
use crate::earth_engine::EarthEngineClient;
use crate::error::NdviError;
use crate::fs_util::{extract_zip, validate_zip};
use crate::processing::{
    PolygonCoordinates, download_name, download_request, image_series, par_coordinates, polygon,
    province_geometry,
};
use crate::ranges::{date_ranges, truncate_ranges};
use crate::raster::{BandFiles, compose};
use crate::store::{ProcessedImage, SeriesMetadata, Store, publish_dir};

#[derive(Debug, Clone, Serialize)]
pub struct SeriesResult {
    pub success: bool,
    pub truncated: bool,
    pub images: Vec<ProcessedImage>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// A downloaded archive waiting to be unpacked.
struct Download {
    name: String,
    range: DateRange,
    zip_path: Utf8PathBuf,
}

pub struct App<C: EarthEngineClient> {
    store: Store,
    client: C,
    max_images: usize,
    provinces: ProvinceSettings,
}

impl<C: EarthEngineClient> App<C> {
    pub fn new(store: Store, client: C, max_images: usize, provinces: ProvinceSettings) -> Self {
        Self {
            store,
            client,
            max_images,
            provinces,
        }
    }

    pub fn from_config(config: &ResolvedConfig, client: C) -> Self {
        Self::new(
            Store::new(config),
            client,
            config.max_images,
            config.provinces.clone(),
        )
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Revisit windows for a request, capped at the configured image count.
    pub fn plan(&self, request: &SeriesRequest) -> Result<(Vec<DateRange>, bool), NdviError> {
        let ranges = date_ranges(
            request.start,
            request.end,
            request.satellite.interval_days(),
        )?;
        Ok(truncate_ranges(ranges, self.max_images))
    }

    /// Returns the rendered series for `request`, producing it first unless a
    /// previous request with the same key already did.
    pub fn download_image_series(
        &self,
        request: &SeriesRequest,
        sink: &dyn ProgressSink,
    ) -> Result<SeriesResult, NdviError> {
        let key = cache_key(request);
        let (ranges, truncated) = self.plan(request)?;
        emit(
            sink,
            format!(
                "phase=Resolve; key={key} satellite={} windows={} truncated={truncated}",
                request.satellite,
                ranges.len()
            ),
        );

        if self.store.series_exists(&key) {
            emit(sink, "phase=Store; using rendered series".to_string());
            let images = self.store.list_images(&key)?;
            return Ok(SeriesResult {
                success: true,
                truncated,
                images,
            });
        }

        let download_dir = self.store.download_dir(&key)?;
        let result = self.render_series(&key, request, &ranges, download_dir.path(), sink);
        let download_path = download_dir.path().to_path_buf();
        if let Err(err) = download_dir.close() {
            warn!(path = %download_path, error = %err, "failed to remove download folder");
        }

        Ok(SeriesResult {
            success: true,
            truncated,
            images: result?,
        })
    }

    /// Metadata recorded when the series behind `key` was rendered.
    pub fn series_metadata(&self, key: &str) -> Result<SeriesMetadata, NdviError> {
        let is_key = key.len() == 56 && key.chars().all(|ch| ch.is_ascii_hexdigit());
        let path = self.store.metadata_path(key);
        if !is_key || !path.as_std_path().is_file() {
            return Err(NdviError::SeriesNotFound(key.to_string()));
        }
        Store::read_metadata(&path)
    }

    fn render_series(
        &self,
        key: &str,
        request: &SeriesRequest,
        ranges: &[DateRange],
        download_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ProcessedImage>, NdviError> {
        let region = self.region(request, sink)?;
        let clip_to = request.province.as_ref().map(|_| polygon(&region));

        emit(sink, "phase=Prepare; requesting exports".to_string());
        let mut downloads = Vec::with_capacity(ranges.len());
        for range in ranges {
            let name = download_name(request.satellite, range);
            let image = image_series(request.satellite, range, clip_to.as_ref());
            let export = download_request(name.clone(), image, &region, request.dimensions);

            emit(sink, format!("earth_engine.request name={name}"));
            let start = Instant::now();
            let url = self.client.download_url(&export)?;
            let zip_path = download_dir.join(format!("{name}.zip"));
            self.client.download(&url, zip_path.as_std_path())?;
            sink.event(ProgressEvent {
                message: format!(
                    "earth_engine.response name={name} latency_ms={}",
                    start.elapsed().as_millis()
                ),
                elapsed: Some(start.elapsed()),
            });

            downloads.push(Download {
                name,
                range: *range,
                zip_path,
            });
        }

        let staging = self.store.staging_dir(key)?;
        let staging_path = staging.path();

        emit(sink, "phase=Verify; unpacking exports".to_string());
        let extension = self.store.image_format().extension();
        for download in &downloads {
            validate_zip(&download.zip_path)?;
            let extracted = download_dir.join(format!("{}-extracted", download.name));
            let files = extract_zip(&download.zip_path, &extracted)?;
            let bands = BandFiles::from_files(&files);
            let output = staging_path.join(format!("{}.{extension}", download.range.from));
            compose(&bands, &output, self.store.image_format())?;
        }

        let metadata = SeriesMetadata {
            satellite: request.satellite,
            date_from: request.start,
            date_to: request.end,
            date_ranges: ranges.to_vec(),
            province: request.province.clone(),
            generated_at: Some(chrono::Utc::now().to_rfc3339()),
            tool: Some(format!("ndvi-series/{}", env!("CARGO_PKG_VERSION"))),
        };
        Store::write_metadata(&staging_path.join("metadata.json"), &metadata)?;

        emit(sink, "phase=Store; publishing series".to_string());
        let series_dir = self.store.series_dir(key);
        let published = publish_dir(staging_path.as_std_path(), series_dir.as_std_path())
            .map_err(|err| NdviError::Filesystem(err.to_string()))?;
        if !published {
            emit(sink, "phase=Store; series published concurrently".to_string());
            return self.store.list_images(key);
        }

        downloads
            .iter()
            .map(|download| {
                let path = self.store.image_path(key, download.range.from);
                Ok(ProcessedImage {
                    date: download.range.from.to_string(),
                    url: self.store.url_for(&path)?,
                })
            })
            .collect()
    }

    fn region(
        &self,
        request: &SeriesRequest,
        sink: &dyn ProgressSink,
    ) -> Result<PolygonCoordinates, NdviError> {
        match &request.province {
            Some(province) => {
                emit(sink, format!("phase=Resolve; province {province}"));
                province_geometry(&self.client, &self.provinces, province)
            }
            None => Ok(par_coordinates()),
        }
    }
}
