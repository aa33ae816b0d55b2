//! Error types for the DEM crate.

use crate::fetch::FetchError;
use crate::toolkit::ToolError;
use localmap_geo::{GeoError, SourceKind, TileId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while acquiring elevation data or deriving
/// products from it.
#[derive(Debug, Error)]
pub enum DemError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF encode or decode error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing required tags.
    #[error("Invalid GeoTIFF {path}: {reason}")]
    InvalidGeoTiff {
        /// File that failed to parse.
        path: PathBuf,
        /// What was missing or malformed.
        reason: String,
    },

    /// Coordinate is outside the bounds of the raster.
    #[error("Coordinate ({lat}, {lon}) is outside raster bounds ({min_lat}-{max_lat}, {min_lon}-{max_lon})")]
    OutOfBounds {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
        /// Raster minimum latitude.
        min_lat: f64,
        /// Raster maximum latitude.
        max_lat: f64,
        /// Raster minimum longitude.
        min_lon: f64,
        /// Raster maximum longitude.
        max_lon: f64,
    },

    /// No data value encountered.
    #[error("No elevation data at coordinate ({lat}, {lon})")]
    NoData {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// The requested source name is not in the registry.
    #[error("Unknown elevation source '{name}' (known sources: {})", known.join(", "))]
    UnknownSource {
        /// Requested source name.
        name: String,
        /// Registered source names.
        known: Vec<String>,
    },

    /// Bounding box, buffer or source coverage problem.
    #[error(transparent)]
    Geo(GeoError),

    /// Request parameters that cannot be satisfied.
    #[error("Invalid elevation request: {0}")]
    InvalidRequest(String),

    /// Configuration file could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Tile worker pool could not be started.
    #[error("Failed to start tile worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Tile payload is smaller than the minimum viable file size.
    #[error("Refusing to cache {tile}: {bytes} bytes is below the {minimum} byte minimum")]
    UndersizedTile {
        /// Tile being cached.
        tile: TileId,
        /// Payload size.
        bytes: u64,
        /// Configured minimum.
        minimum: u64,
    },

    /// One or more tiles could not be obtained from any mirror and synthetic
    /// fallback was not permitted.
    #[error("Failed to acquire elevation data from '{source_kind}': {} of the required tiles could not be downloaded", tile_failures.len())]
    DemAcquisition {
        /// Last source attempted.
        source_kind: SourceKind,
        /// Every mirror tried for every failed tile.
        tile_failures: Vec<FetchError>,
    },

    /// The toolkit failed to merge or crop the elevation tiles.
    #[error("Failed to merge elevation tiles: {0}")]
    Merge(#[source] ToolError),

    /// Hillshade or contour parameters are out of range.
    #[error("Invalid {product} parameter {param} = {value}: expected {expected}")]
    InvalidDerivativeParams {
        /// "hillshade" or "contour".
        product: &'static str,
        /// Offending parameter.
        param: &'static str,
        /// Supplied value.
        value: f64,
        /// Accepted range.
        expected: &'static str,
    },

    /// The toolkit failed to produce a hillshade or contour layer.
    #[error("Failed to generate {product}: {reason}")]
    DerivativeGeneration {
        /// "hillshade" or "contour".
        product: &'static str,
        /// Why generation failed.
        reason: String,
    },

    /// The acquisition was cancelled before it finished.
    #[error("Elevation acquisition cancelled")]
    Cancelled,
}

impl DemError {
    /// Whether the caller can carry on without the failed output.
    ///
    /// Derivative layers are optional for map rendering; everything else
    /// means there is no usable elevation raster.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DemError::DerivativeGeneration { .. })
    }
}

impl From<GeoError> for DemError {
    fn from(err: GeoError) -> Self {
        match err {
            GeoError::UnknownSource { name, known } => DemError::UnknownSource { name, known },
            other => DemError::Geo(other),
        }
    }
}
