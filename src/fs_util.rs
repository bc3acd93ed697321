use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use zip::ZipArchive;

use crate::error::NdviError;

fn archive_err(zip_path: &Utf8Path, err: impl std::fmt::Display) -> NdviError {
    NdviError::Filesystem(format!("export archive {zip_path}: {err}"))
}

fn open_archive(zip_path: &Utf8Path) -> Result<ZipArchive<fs::File>, NdviError> {
    let file = fs::File::open(zip_path.as_std_path()).map_err(|err| archive_err(zip_path, err))?;
    ZipArchive::new(file).map_err(|err| archive_err(zip_path, err))
}

/// Unpacks an export archive under `target_dir` and returns the band files
/// it contained, in archive order.
///
/// Entries that would land outside of `target_dir` abort the extraction.
pub fn extract_zip(
    zip_path: &Utf8Path,
    target_dir: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, NdviError> {
    let mut archive = open_archive(zip_path)?;
    let mut files = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| archive_err(zip_path, err))?;
        let relative = entry
            .enclosed_name()
            .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
            .ok_or_else(|| archive_err(zip_path, "zip entry path traversal detected"))?;
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(entry_path.as_std_path())
                .map_err(|err| archive_err(zip_path, err))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent.as_std_path()).map_err(|err| archive_err(zip_path, err))?;
        }
        let mut outfile = fs::File::create(entry_path.as_std_path())
            .map_err(|err| archive_err(zip_path, err))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| archive_err(zip_path, err))?;
        files.push(entry_path);
    }
    Ok(files)
}

/// Reads every entry once so truncated or error-page downloads fail before
/// extraction. An archive without any file is rejected too.
pub fn validate_zip(zip_path: &Utf8Path) -> Result<(), NdviError> {
    let mut archive = open_archive(zip_path)?;
    let mut file_count = 0usize;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| archive_err(zip_path, err))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink()).map_err(|err| archive_err(zip_path, err))?;
        file_count += 1;
    }
    if file_count == 0 {
        return Err(archive_err(zip_path, "no band files"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Utf8Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path.as_std_path()).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, path)
    }

    #[test]
    fn extraction_returns_band_files() {
        let (_guard, dir) = temp_dir();
        let zip_path = dir.join("bands.zip");
        write_zip(
            &zip_path,
            &[("a.vis-red.tif", b"red"), ("nested/a.vis-gray.tif", b"gray")],
        );

        validate_zip(&zip_path).unwrap();
        let target = dir.join("out");
        let files = extract_zip(&zip_path, &target).unwrap();

        assert_eq!(
            files,
            vec![target.join("a.vis-red.tif"), target.join("nested/a.vis-gray.tif")]
        );
        assert_eq!(fs::read(files[1].as_std_path()).unwrap(), b"gray");
    }

    #[test]
    fn rejects_traversal() {
        let (_guard, dir) = temp_dir();
        let zip_path = dir.join("evil.zip");
        write_zip(&zip_path, &[("../escape.txt", b"x")]);

        let err = extract_zip(&zip_path, &dir.join("out")).unwrap_err();
        assert_matches!(err, NdviError::Filesystem(message) if message.contains("traversal"));
        assert!(!dir.join("escape.txt").as_std_path().exists());
    }

    #[test]
    fn error_page_is_rejected() {
        let (_guard, dir) = temp_dir();
        let path = dir.join("not.zip");
        fs::write(path.as_std_path(), b"<html>quota exceeded</html>").unwrap();
        assert_matches!(validate_zip(&path), Err(NdviError::Filesystem(_)));
    }

    #[test]
    fn empty_archive_is_rejected() {
        let (_guard, dir) = temp_dir();
        let path = dir.join("empty.zip");
        write_zip(&path, &[]);
        assert_matches!(
            validate_zip(&path),
            Err(NdviError::Filesystem(message)) if message.contains("no band files")
        );
    }
}
