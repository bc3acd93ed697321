use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::config::{ImageFormat, ResolvedConfig};
use crate::domain::{DateRange, IsoDate, Satellite};
use crate::error::NdviError;

const SERIES_DIR: &str = "earth-engine";
const METADATA_FILE: &str = "metadata.json";

/// Where processed image series and their download scratch space live.
#[derive(Debug, Clone)]
pub struct Store {
    static_root: Utf8PathBuf,
    static_url: String,
    tmp_root: Utf8PathBuf,
    image_format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub date: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub satellite: Satellite,
    pub date_from: IsoDate,
    pub date_to: IsoDate,
    pub date_ranges: Vec<DateRange>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
}

impl Store {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            static_root: config.static_root.clone(),
            static_url: config.static_url.clone(),
            tmp_root: config.tmp_path.clone(),
            image_format: config.image_format,
        }
    }

    pub fn new_with_paths(
        static_root: Utf8PathBuf,
        static_url: &str,
        tmp_root: Utf8PathBuf,
        image_format: ImageFormat,
    ) -> Self {
        Self {
            static_root,
            static_url: static_url.to_string(),
            tmp_root,
            image_format,
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        self.image_format
    }

    pub fn series_dir(&self, key: &str) -> Utf8PathBuf {
        self.static_root.join(SERIES_DIR).join(key)
    }

    pub fn tmp_root(&self) -> &Utf8Path {
        &self.tmp_root
    }

    /// Fresh download folder for one render of `key`. Concurrent renders of
    /// the same key never share it.
    pub fn download_dir(&self, key: &str) -> Result<ScratchDir, NdviError> {
        ScratchDir::new_in(&self.tmp_root, &format!("{key}-"))
    }

    /// Staging folder next to the processed folder of `key`, so publishing is
    /// a rename on the same filesystem.
    pub fn staging_dir(&self, key: &str) -> Result<ScratchDir, NdviError> {
        ScratchDir::new_in(&self.static_root.join(SERIES_DIR), &format!(".{key}-"))
    }

    pub fn image_path(&self, key: &str, date: IsoDate) -> Utf8PathBuf {
        self.series_dir(key)
            .join(format!("{date}.{}", self.image_format.extension()))
    }

    pub fn metadata_path(&self, key: &str) -> Utf8PathBuf {
        self.series_dir(key).join(METADATA_FILE)
    }

    pub fn series_exists(&self, key: &str) -> bool {
        self.series_dir(key).as_std_path().exists()
    }

    /// Public URL of a file below the static root.
    pub fn url_for(&self, path: &Utf8Path) -> Result<String, NdviError> {
        let relative = path.strip_prefix(&self.static_root).map_err(|_| {
            NdviError::Filesystem(format!("{path} is outside of {}", self.static_root))
        })?;
        let relative = relative
            .components()
            .map(|component| component.as_str())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!("{}{relative}", self.static_url))
    }

    /// Images already rendered for `key`, ordered by date.
    pub fn list_images(&self, key: &str) -> Result<Vec<ProcessedImage>, NdviError> {
        let dir = self.series_dir(key);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let extension = self.image_format.extension();
        let mut images = Vec::new();
        for entry in dir.read_dir_utf8().map_err(fs_err)? {
            let entry = entry.map_err(fs_err)?;
            let path = entry.path();
            if path.extension() != Some(extension) || !path.as_std_path().is_file() {
                continue;
            }
            let Some(stem) = path.file_stem() else {
                continue;
            };
            images.push(ProcessedImage {
                date: stem.to_string(),
                url: self.url_for(path)?,
            });
        }
        images.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(images)
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &SeriesMetadata) -> Result<(), NdviError> {
        let content = serde_json::to_vec_pretty(metadata).map_err(fs_err)?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_metadata(path: &Utf8Path) -> Result<SeriesMetadata, NdviError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(fs_err)?;
        serde_json::from_str(&content).map_err(fs_err)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), NdviError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path()).map_err(fs_err)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content).map_err(fs_err)?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path()).map_err(fs_err)?;
        Ok(())
    }
}

/// Uniquely named scratch folder, removed when dropped.
pub struct ScratchDir {
    dir: TempDir,
    path: Utf8PathBuf,
}

impl ScratchDir {
    fn new_in(parent: &Utf8Path, prefix: &str) -> Result<Self, NdviError> {
        fs::create_dir_all(parent.as_std_path()).map_err(fs_err)?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent.as_std_path())
            .map_err(fs_err)?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| fs_err(format!("non-utf8 scratch path {}", path.display())))?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

fn fs_err(err: impl std::fmt::Display) -> NdviError {
    NdviError::Filesystem(err.to_string())
}

/// Renames a finished folder into place. Returns `false`, leaving both
/// folders untouched, when `to` was already published by someone else.
pub fn publish_dir(from: &Path, to: &Path) -> io::Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(_) if to.exists() => Ok(false),
        Err(err) => Err(err),
    }
}
