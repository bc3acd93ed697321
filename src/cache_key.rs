use sha2::{Digest, Sha224};

use crate::domain::SeriesRequest;

/// The string hashed into a cache key, e.g.
/// `2017-01-01-2017-02-01-landsat-8-256x256-Isabela`.
pub fn cache_key_source(request: &SeriesRequest) -> String {
    let province = request
        .province
        .as_deref()
        .map(|province| format!("-{province}"))
        .unwrap_or_default();
    format!(
        "{}-{}-{}-{}{}",
        request.start, request.end, request.satellite, request.dimensions_text, province
    )
}

/// Hex SHA-224 digest naming the processed image folder and the download
/// scratch folder of a request.
pub fn cache_key(request: &SeriesRequest) -> String {
    let mut hasher = Sha224::new();
    hasher.update(cache_key_source(request).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dimensions, Satellite};

    fn request() -> SeriesRequest {
        SeriesRequest::new("2017-01-01".parse().unwrap(), "2017-02-01".parse().unwrap())
    }

    #[test]
    fn source_without_province() {
        assert_eq!(
            cache_key_source(&request()),
            "2017-01-01-2017-02-01-landsat-8-256x256"
        );
    }

    #[test]
    fn source_with_province() {
        let request = request()
            .with_satellite(Satellite::Sentinel1)
            .with_dimensions(Dimensions {
                width: 512,
                height: 512,
            })
            .with_province(Some("Isabela".to_string()));
        assert_eq!(
            cache_key_source(&request),
            "2017-01-01-2017-02-01-sentinel-1-512x512-Isabela"
        );
        assert_eq!(
            cache_key(&request),
            "2708ac443bad2bd0a4ae9350ef26a4d37b8040cf123780b15e710f00"
        );
    }

    #[test]
    fn key_is_hex_sha224() {
        let key = cache_key(&request());
        assert_eq!(key.len(), 56);
        assert!(key.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(key, cache_key(&request()));
    }

    #[test]
    fn default_request_digest() {
        assert_eq!(
            cache_key(&request()),
            "6af543f8ae32abb41aa81a83d70e587aa1f04feaa64f9bd3394ee141"
        );
    }

    #[test]
    fn raw_dimensions_text_is_hashed() {
        let padded = request().with_dimensions_text("0256x256").unwrap();
        assert_eq!(
            cache_key_source(&padded),
            "2017-01-01-2017-02-01-landsat-8-0256x256"
        );
        assert_eq!(
            cache_key(&padded),
            "798cee5a04db85cf8d09676d89330b5bce9fb1aa577995aa8b164894"
        );
        assert_ne!(cache_key(&padded), cache_key(&request()));
    }

    #[test]
    fn province_changes_key() {
        let plain = cache_key(&request());
        let with_province = cache_key(&request().with_province(Some("Isabela".to_string())));
        assert_ne!(plain, with_province);
    }
}
