//! # localmap-dem
//!
//! Terrain elevation acquisition for map generation.
//!
//! Given a bounding box and a preferred elevation source, the
//! [`Orchestrator`] resolves a source that actually covers the area,
//! obtains the source's tiles (from the local [`DiskTileCache`] or its
//! mirrors), merges and crops them into one GeoTIFF, and falls back to
//! deterministic synthetic terrain when permitted and nothing real can be
//! had. The [`DerivativeProducer`] then turns that raster into shaded
//! relief and contour lines.
//!
//! Raster processing is delegated to GDAL through the [`RasterToolkit`]
//! trait and HTTP goes through [`HttpClient`], so both can be replaced.
//!
//! ## Example
//!
//! ```no_run
//! use localmap_dem::{ElevationRequest, Orchestrator, TerrainConfig};
//! use localmap_geo::BoundingBox;
//!
//! let orchestrator = Orchestrator::from_config(&TerrainConfig::default())?;
//! let lumsden = BoundingBox::new(57.37, 57.26, -2.82, -2.95)?;
//! let request = ElevationRequest::new(lumsden, "srtm", "data/lumsden_dem.tif")
//!     .with_buffer(0.05)
//!     .with_synthetic_fallback(true);
//!
//! let product = orchestrator.acquire(&request)?;
//! println!("{} from {}", product.raster_path.display(), product.source_used);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cache;
mod cancel;
mod config;
mod derivative;
mod error;
mod fetch;
mod orchestrator;
mod pipeline;
mod raster;
pub mod synthetic;
pub mod telemetry;
mod toolkit;

pub use cache::{CacheEntry, DiskTileCache, TileStore};
pub use cancel::CancelToken;
pub use config::{
    default_cache_dir, ContourSettings, ElevationSettings, HillshadeSettings, TerrainConfig, TerrainSettings,
    ToolkitConfig,
};
pub use derivative::{
    ContourOutput, ContourParams, DerivativeProducer, DerivativeSpec, HillshadeOutput, HillshadeParams,
};
pub use error::DemError;
pub use fetch::{FailureReason, FetchError, Fetcher, HttpClient, MirrorAttempt, ReqwestClient, DEFAULT_USER_AGENT};
pub use orchestrator::{
    AcquisitionReport, AcquisitionState, ElevationProduct, ElevationRequest, Orchestrator, SourceUsed,
    DEFAULT_RESOLUTION_M,
};
pub use pipeline::{TerrainOutputs, TerrainPipeline, CONTOURS_FILE, HILLSHADE_FILE};
pub use raster::ElevationRaster;
pub use toolkit::{
    ContourOptions, GdalToolkit, HillshadeOptions, RasterToolkit, ReprojectOptions, ToolError, ELEVATION_ATTRIBUTE,
};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
