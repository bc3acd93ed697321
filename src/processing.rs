//! Earth Engine recipes for the NDVI composites.
//!
//! Everything here only assembles expression graphs; the filtering, masking,
//! reduction and colour mapping run on the Earth Engine side.

use serde_json::{Value as Json, json};
use tracing::debug;

use crate::config::ProvinceSettings;
use crate::domain::{DateRange, Dimensions, Satellite};
use crate::earth_engine::{DownloadRequest, EarthEngineClient, Expression, Value};
use crate::error::NdviError;

pub const NDVI_PALETTE: [&str; 10] = [
    "FFFFFF", "CE7E45", "FCD163", "66A000", "207401", "056201", "004C00", "023B01", "012E01",
    "011301",
];

pub const BACKSCATTER_PALETTE: [&str; 10] = [
    "011301", "012E01", "023B01", "004C00", "00ff00", "207401", "66A000", "FCD163", "CE7E45",
    "FFFFFF",
];

/// Outline of the Philippine Area of Responsibility, lon/lat, closed ring.
pub const PAR_RING: [[f64; 2]; 8] = [
    [127.94248139921513, 5.33459854167601],
    [126.74931782819613, 11.825234466620996],
    [124.51107186428203, 17.961503806746318],
    [121.42999903167879, 19.993626604011016],
    [118.25656974884657, 18.2117821750514],
    [116.27168958893185, 6.817365082528201],
    [122.50121143769957, 3.79887124351577],
    [127.94248139921513, 5.33459854167601],
];

const FOREST_MASK_IMAGE: &str = "UMD/hansen/global_forest_change_2013";
const MAP_VAR: &str = "_MAPPING_VAR_0_0";
const OUTPUT_CRS: &str = "EPSG:4326";

/// Polygon rings in lon/lat, as returned by `getInfo` on a polygon.
pub type PolygonCoordinates = Vec<Vec<[f64; 2]>>;

pub fn par_coordinates() -> PolygonCoordinates {
    vec![PAR_RING.to_vec()]
}

fn projection(crs: &str) -> Value {
    Value::call("Projection", [("crs", Value::string(crs))])
}

pub fn polygon(coordinates: &PolygonCoordinates) -> Value {
    Value::call(
        "GeometryConstructors.Polygon",
        [
            ("coordinates", Value::constant(json!(coordinates))),
            ("crs", projection(OUTPUT_CRS)),
            ("geodesic", Value::constant(true)),
        ],
    )
}

fn image_collection(id: &str) -> Value {
    Value::call("ImageCollection.load", [("id", Value::string(id))])
}

fn filter(collection: Value, filter: Value) -> Value {
    Value::call(
        "Collection.filter",
        [("collection", collection), ("filter", filter)],
    )
}

fn filter_date(collection: Value, range: &DateRange) -> Value {
    let date_range = Value::call(
        "DateRange",
        [
            ("start", Value::string(&range.from.to_string())),
            ("end", Value::string(&range.to.to_string())),
        ],
    );
    filter(
        collection,
        Value::call(
            "Filter.dateRangeContains",
            [
                ("leftValue", date_range),
                ("rightField", Value::string("system:time_start")),
            ],
        ),
    )
}

fn filter_bounds(collection: Value, geometry: Value) -> Value {
    filter(
        collection,
        Value::call(
            "Filter.intersects",
            [
                ("leftField", Value::string(".all")),
                ("rightValue", geometry),
            ],
        ),
    )
}

fn select(image: Value, bands: &[&str]) -> Value {
    Value::call(
        "Image.select",
        [
            ("input", image),
            ("bandSelectors", Value::strings(bands.iter().copied())),
        ],
    )
}

fn select_collection(collection: Value, bands: &[&str]) -> Value {
    map(collection, select(Value::argument(MAP_VAR), bands))
}

fn map(collection: Value, body: Value) -> Value {
    Value::call(
        "Collection.map",
        [
            ("collection", collection),
            ("baseAlgorithm", Value::lambda(MAP_VAR, body)),
        ],
    )
}

/// Pixels where the Hansen data mask equals 1 (mapped land surface).
fn land_mask() -> Value {
    let datamask = select(
        Value::call("Image.load", [("id", Value::string(FOREST_MASK_IMAGE))]),
        &["datamask"],
    );
    Value::call(
        "Image.eq",
        [
            ("image1", datamask),
            (
                "image2",
                Value::call("Image.constant", [("value", Value::constant(1))]),
            ),
        ],
    )
}

fn update_mask(image: Value) -> Value {
    Value::call("Image.updateMask", [("image", image), ("mask", land_mask())])
}

/// Per-image masking step applied by `Collection.map`.
fn mask_step(satellite: Satellite) -> Value {
    let image = Value::argument(MAP_VAR);
    match satellite {
        Satellite::Landsat8 | Satellite::Sentinel1 => update_mask(image),
        Satellite::Sentinel2 => {
            let ndvi = Value::call(
                "Image.normalizedDifference",
                [
                    ("input", image.clone()),
                    ("bandNames", Value::strings(["B8", "B4"])),
                ],
            );
            let empty = select(image, &[]);
            update_mask(Value::call(
                "Image.addBands",
                [("dstImg", empty), ("srcImg", ndvi)],
            ))
        }
    }
}

fn clip(image: Value, geometry: Option<&Value>) -> Value {
    match geometry {
        Some(geometry) => Value::call(
            "Image.clip",
            [("input", image), ("geometry", geometry.clone())],
        ),
        None => image,
    }
}

fn visualize(image: Value, band: &str, min: f64, max: f64, palette: &[&str]) -> Value {
    Value::call(
        "Image.visualize",
        [
            ("image", image),
            ("bands", Value::strings([band])),
            ("min", Value::constant(min)),
            ("max", Value::constant(max)),
            ("palette", Value::strings(palette.iter().copied())),
        ],
    )
}

/// Colour-mapped composite of one revisit window.
///
/// The collection is restricted to the PAR outline; `clip_to` additionally
/// clips the reduced image, e.g. to a province.
pub fn image_series(satellite: Satellite, range: &DateRange, clip_to: Option<&Value>) -> Value {
    let bounds = polygon(&par_coordinates());
    match satellite {
        Satellite::Landsat8 => {
            let filtered = filter_bounds(
                filter_date(image_collection("LANDSAT/LC8_L1T_8DAY_NDVI"), range),
                bounds,
            );
            let reduced = Value::call(
                "reduce.mean",
                [("collection", map(filtered, mask_step(satellite)))],
            );
            visualize(clip(reduced, clip_to), "NDVI", 0.0, 1.0, &NDVI_PALETTE)
        }
        Satellite::Sentinel2 => {
            let selected = select_collection(image_collection("COPERNICUS/S2"), &["B4", "B8"]);
            let filtered = filter_bounds(filter_date(selected, range), bounds);
            let reduced = Value::call(
                "reduce.mean",
                [("collection", map(filtered, mask_step(satellite)))],
            );
            visualize(clip(reduced, clip_to), "nd", 0.0, 1.0, &NDVI_PALETTE)
        }
        Satellite::Sentinel1 => {
            let polarised = filter(
                image_collection("COPERNICUS/S1_GRD"),
                Value::call(
                    "Filter.listContains",
                    [
                        ("leftField", Value::string("transmitterReceiverPolarisation")),
                        ("rightValue", Value::string("VV")),
                    ],
                ),
            );
            let selected = select_collection(polarised, &["VV"]);
            let filtered = filter_bounds(filter_date(selected, range), bounds);
            let mosaic = Value::call(
                "ImageCollection.mosaic",
                [("collection", map(filtered, mask_step(satellite)))],
            );
            visualize(clip(mosaic, clip_to), "VV", -14.0, -9.0, &BACKSCATTER_PALETTE)
        }
    }
}

/// Name of one window's export; also the prefix of the files in its zip.
pub fn download_name(satellite: Satellite, range: &DateRange) -> String {
    format!("ndvi-{}-{}-{}", satellite, range.from, range.to)
}

/// Wraps a visualized image into an export of `dimensions` pixels over `region`.
pub fn download_request(
    name: String,
    image: Value,
    region: &PolygonCoordinates,
    dimensions: Dimensions,
) -> DownloadRequest {
    let projected = Value::call(
        "Image.setDefaultProjection",
        [("image", image), ("crs", projection(OUTPUT_CRS))],
    );
    let scaled = Value::call(
        "Image.clipToBoundsAndScale",
        [
            ("input", projected),
            ("geometry", polygon(region)),
            ("width", Value::constant(dimensions.width)),
            ("height", Value::constant(dimensions.height)),
        ],
    );
    DownloadRequest {
        name,
        expression: Expression::new(&scaled),
    }
}

/// Geometry of a province from the provinces table.
///
/// Multi-part provinces resolve to their largest polygon, so islands and
/// exclaves do not stretch the export region.
pub fn province_geometry<C: EarthEngineClient + ?Sized>(
    client: &C,
    settings: &ProvinceSettings,
    province: &str,
) -> Result<PolygonCoordinates, NdviError> {
    let table_id = settings
        .table_id
        .as_deref()
        .ok_or_else(|| NdviError::MissingConfigValue("provinces.table_id".to_string()))?;
    let table = Value::call("Collection.loadTable", [("tableId", Value::string(table_id))]);
    let matching = filter(
        table,
        Value::call(
            "Filter.equals",
            [
                ("leftField", Value::string(&settings.name_column)),
                ("rightValue", Value::string(province)),
            ],
        ),
    );
    let geometry = Value::call("Collection.geometry", [("collection", matching)]);
    let info = client.compute_value(&Expression::new(&geometry))?;
    let coordinates = largest_polygon(&info)?;
    if coordinates.is_empty() {
        return Err(NdviError::ProvinceNotFound(province.to_string()));
    }
    debug!(province, rings = coordinates.len(), "resolved province geometry");
    Ok(coordinates)
}

/// Reads a GeoJSON-like geometry and keeps the polygon with the largest area.
pub fn largest_polygon(geometry: &Json) -> Result<PolygonCoordinates, NdviError> {
    let kind = geometry
        .get("type")
        .and_then(|value| value.as_str())
        .ok_or_else(|| NdviError::EarthEngineResponse("geometry without `type`".to_string()))?;
    let coordinates = geometry
        .get("coordinates")
        .cloned()
        .unwrap_or(Json::Array(Vec::new()));

    match kind {
        "Polygon" => serde_json::from_value::<PolygonCoordinates>(coordinates)
            .map_err(|err| NdviError::EarthEngineResponse(err.to_string())),
        "MultiPolygon" => {
            let polygons = serde_json::from_value::<Vec<PolygonCoordinates>>(coordinates)
                .map_err(|err| NdviError::EarthEngineResponse(err.to_string()))?;
            Ok(polygons
                .into_iter()
                .filter_map(|polygon| polygon.into_iter().next())
                .map(|outer| (ring_area(&outer), outer))
                .max_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(_, outer)| vec![outer])
                .unwrap_or_default())
        }
        other => Err(NdviError::EarthEngineResponse(format!(
            "unsupported province geometry type: {other}"
        ))),
    }
}

/// Planar shoelace area in square degrees; only used to rank polygons.
fn ring_area(ring: &[[f64; 2]]) -> f64 {
    let twice: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a[0] * b[1] - b[0] * a[1])
        .sum();
    twice.abs() / 2.0
}
