use camino::{Utf8Path, Utf8PathBuf};
use image::{DynamicImage, GrayImage, RgbImage};
use tracing::debug;

use crate::config::ImageFormat;
use crate::error::NdviError;

/// Band files of one extracted export, named `{prefix}.vis-{band}.tif`.
#[derive(Debug, Clone, Default)]
pub struct BandFiles {
    pub red: Option<Utf8PathBuf>,
    pub green: Option<Utf8PathBuf>,
    pub blue: Option<Utf8PathBuf>,
    pub gray: Option<Utf8PathBuf>,
}

impl BandFiles {
    /// Sorts extracted files by band. Files without a `.vis-{band}.tif`
    /// suffix are ignored.
    pub fn from_files(files: &[Utf8PathBuf]) -> Self {
        let mut bands = Self::default();
        for file in files {
            let slot = match band_name(file) {
                Some("red") => &mut bands.red,
                Some("green") => &mut bands.green,
                Some("blue") => &mut bands.blue,
                Some("gray") => &mut bands.gray,
                _ => continue,
            };
            *slot = Some(file.clone());
        }
        bands
    }

    pub fn color(&self) -> Option<(&Utf8Path, &Utf8Path, &Utf8Path)> {
        Some((
            self.red.as_deref()?,
            self.green.as_deref()?,
            self.blue.as_deref()?,
        ))
    }
}

fn band_name(path: &Utf8Path) -> Option<&str> {
    let (_, band) = path.file_name()?.strip_suffix(".tif")?.rsplit_once(".vis-")?;
    Some(band)
}

/// Recombines the bands of one export and writes them to `output`.
///
/// Colour exports are merged into RGB; single-band exports fall back to the
/// gray band.
pub fn compose(
    bands: &BandFiles,
    output: &Utf8Path,
    format: ImageFormat,
) -> Result<(), NdviError> {
    let image = match (bands.color(), bands.gray.as_deref()) {
        (Some((red, green, blue)), _) => {
            let red = open_luma(red)?;
            let green = open_luma(green)?;
            let blue = open_luma(blue)?;
            DynamicImage::ImageRgb8(merge_rgb(&red, &green, &blue)?)
        }
        (None, Some(gray)) => DynamicImage::ImageLuma8(open_luma(gray)?),
        (None, None) => {
            return Err(NdviError::Raster(format!(
                "no colour or gray bands for {output}"
            )));
        }
    };
    debug!(
        path = %output,
        width = image.width(),
        height = image.height(),
        "writing composite"
    );
    image
        .save_with_format(output.as_std_path(), format.to_image_format())
        .map_err(|err| NdviError::Raster(format!("write {output}: {err}")))
}

pub fn merge_rgb(
    red: &GrayImage,
    green: &GrayImage,
    blue: &GrayImage,
) -> Result<RgbImage, NdviError> {
    let dims = red.dimensions();
    if green.dimensions() != dims || blue.dimensions() != dims {
        return Err(NdviError::Raster(format!(
            "band sizes differ: red {:?}, green {:?}, blue {:?}",
            dims,
            green.dimensions(),
            blue.dimensions()
        )));
    }
    Ok(RgbImage::from_fn(dims.0, dims.1, |x, y| {
        image::Rgb([
            red.get_pixel(x, y)[0],
            green.get_pixel(x, y)[0],
            blue.get_pixel(x, y)[0],
        ])
    }))
}

fn open_luma(path: &Utf8Path) -> Result<GrayImage, NdviError> {
    image::open(path.as_std_path())
        .map(|image| image.to_luma8())
        .map_err(|err| NdviError::Raster(format!("read {path}: {err}")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use image::Luma;

    use super::*;

    fn write_band(dir: &Utf8Path, prefix: &str, band: &str, value: u8, size: u32) -> Utf8PathBuf {
        let path = dir.join(format!("{prefix}.vis-{band}.tif"));
        GrayImage::from_pixel(size, size, Luma([value]))
            .save_with_format(path.as_std_path(), image::ImageFormat::Tiff)
            .unwrap();
        path
    }

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, path)
    }

    #[test]
    fn sorts_files_by_band_suffix() {
        let files = [
            "x/ndvi-landsat-8-2017-01-01-2017-01-16.vis-blue.tif",
            "x/ndvi-landsat-8-2017-01-01-2017-01-16.vis-red.tif",
            "x/readme.txt",
            "x/ndvi-landsat-8-2017-01-01-2017-01-16.vis-green.tif",
        ]
        .map(Utf8PathBuf::from);
        let bands = BandFiles::from_files(&files);

        assert_eq!(bands.red.as_ref(), Some(&files[1]));
        assert_eq!(bands.blue.as_ref(), Some(&files[0]));
        assert_eq!(bands.gray, None);
        assert!(bands.color().is_some());
    }

    #[test]
    fn merges_color_bands() {
        let (_guard, dir) = temp_dir();
        let prefix = "ndvi-landsat-8-2017-01-01-2017-01-16";
        let files = vec![
            write_band(&dir, prefix, "red", 200, 4),
            write_band(&dir, prefix, "green", 100, 4),
            write_band(&dir, prefix, "blue", 50, 4),
        ];

        let output = dir.join("2017-01-01.png");
        compose(&BandFiles::from_files(&files), &output, ImageFormat::Png).unwrap();

        let image = image::open(output.as_std_path()).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(2, 3).0, [200, 100, 50]);
    }

    #[test]
    fn falls_back_to_gray_band() {
        let (_guard, dir) = temp_dir();
        let prefix = "ndvi-sentinel-1-2017-01-01-2017-01-12";
        let files = vec![
            write_band(&dir, prefix, "gray", 77, 3),
            write_band(&dir, prefix, "red", 10, 3),
        ];

        let output = dir.join("2017-01-01.png");
        compose(&BandFiles::from_files(&files), &output, ImageFormat::Png).unwrap();

        let image = image::open(output.as_std_path()).unwrap();
        assert_matches!(image, DynamicImage::ImageLuma8(_));
        assert_eq!(image.to_luma8().get_pixel(0, 0).0, [77]);
    }

    #[test]
    fn missing_bands_are_an_error() {
        let (_guard, dir) = temp_dir();
        let err = compose(&BandFiles::default(), &dir.join("out.png"), ImageFormat::Png)
            .unwrap_err();
        assert_matches!(err, NdviError::Raster(_));
    }

    #[test]
    fn mismatched_band_sizes_are_rejected() {
        let red = GrayImage::new(2, 2);
        let green = GrayImage::new(2, 3);
        let blue = GrayImage::new(2, 2);
        assert_matches!(merge_rgb(&red, &green, &blue), Err(NdviError::Raster(_)));
    }
}
