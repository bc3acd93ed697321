#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use image::{GrayImage, ImageFormat as Codec, Luma};
use serde_json::{Value, json};
use zip::write::SimpleFileOptions;

use ndvi_series::config::{ImageFormat, ProvinceSettings};
use ndvi_series::earth_engine::{DownloadRequest, EarthEngineClient, Expression};
use ndvi_series::error::NdviError;
use ndvi_series::store::Store;

#[derive(Default)]
pub struct MockEarthEngine {
    /// Export only the gray band, as single-band visualizations do.
    pub gray_only: bool,
    pub fail_downloads: bool,
    pub download_delay: Duration,
    pub exports: Mutex<Vec<String>>,
    pub downloads: Mutex<usize>,
    pub computed: Mutex<Vec<Expression>>,
}

impl MockEarthEngine {
    pub fn download_count(&self) -> usize {
        *self.downloads.lock().unwrap()
    }

    pub fn export_names(&self) -> Vec<String> {
        self.exports.lock().unwrap().clone()
    }
}

fn band_tiff(value: u8) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    GrayImage::from_pixel(4, 4, Luma([value]))
        .write_to(&mut bytes, Codec::Tiff)
        .unwrap();
    bytes.into_inner()
}

pub fn write_band_zip(path: &Path, name: &str, gray_only: bool) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let bands: &[(&str, u8)] = if gray_only {
        &[("gray", 90)]
    } else {
        &[("red", 200), ("green", 120), ("blue", 40)]
    };
    for (band, value) in bands {
        writer
            .start_file(
                format!("{name}.vis-{band}.tif"),
                SimpleFileOptions::default(),
            )
            .unwrap();
        writer.write_all(&band_tiff(*value)).unwrap();
    }
    writer.finish().unwrap();
}

impl EarthEngineClient for MockEarthEngine {
    fn compute_value(&self, expression: &Expression) -> Result<Value, NdviError> {
        self.computed.lock().unwrap().push(expression.clone());
        Ok(json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[121.0, 16.0], [122.0, 16.0], [122.0, 17.5], [121.0, 17.5], [121.0, 16.0]]],
                [[[122.2, 16.9], [122.3, 16.9], [122.3, 17.0], [122.2, 16.9]]]
            ]
        }))
    }

    fn download_url(&self, request: &DownloadRequest) -> Result<String, NdviError> {
        self.exports.lock().unwrap().push(request.name.clone());
        Ok(format!("mock://{}", request.name))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), NdviError> {
        if self.fail_downloads {
            return Err(NdviError::EarthEngineStatus {
                status: 429,
                message: "quota exceeded".to_string(),
            });
        }
        std::thread::sleep(self.download_delay);
        *self.downloads.lock().unwrap() += 1;
        let name = url.trim_start_matches("mock://");
        write_band_zip(destination, name, self.gray_only);
        Ok(())
    }
}

pub struct Workspace {
    _temp: tempfile::TempDir,
    pub root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self { _temp: temp, root }
    }

    pub fn store(&self) -> Store {
        Store::new_with_paths(
            self.root.join("static"),
            "/static/",
            self.root.join("tmp"),
            ImageFormat::Png,
        )
    }
}

/// Number of entries left under `path`.
pub fn entry_count(path: &Utf8Path) -> usize {
    std::fs::read_dir(path.as_std_path())
        .map(|entries| entries.count())
        .unwrap_or(0)
}

pub fn provinces() -> ProvinceSettings {
    ProvinceSettings {
        table_id: Some("users/demo/ph_provinces".to_string()),
        name_column: "NAME_1".to_string(),
    }
}
