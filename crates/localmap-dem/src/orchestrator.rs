//! Elevation acquisition state machine.
//!
//! ```text
//! Requested -> Resolving -> Fetching -> Merging -> Ready -> Done
//!                  ^            |
//!                  +------------+  (another global source is available)
//!                               |
//!                               +-> FallingBack -> Ready -> Done
//!                               +-> Failed
//! ```
//!
//! Tiles for the resolved source are obtained on a bounded worker pool,
//! cache first, network second. The orchestrator waits for every tile
//! before deciding anything: a source either delivers its whole tile set
//! and is merged, or it is abandoned as a whole. An abandoned source is
//! replaced by the next untried global source; once none is left the
//! request ends in synthetic terrain (if permitted) or a
//! [`DemError::DemAcquisition`] failure.

use crate::cache::{DiskTileCache, TileStore};
use crate::config::TerrainConfig;
use crate::fetch::{FetchError, Fetcher, ReqwestClient};
use crate::raster::parent_dir;
use crate::synthetic;
use crate::telemetry::metric_defs;
use crate::toolkit::{GdalToolkit, RasterToolkit, ReprojectOptions};
use crate::{CancelToken, DemError, Result};
use localmap_geo::{tiles_for, BoundingBox, SourceDescriptor, SourceKind, SourceRegistry, TileId};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Default output resolution in metres.
pub const DEFAULT_RESOLUTION_M: f64 = 30.0;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// What to acquire.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationRequest {
    /// Area of interest.
    pub bbox: BoundingBox,
    /// Edge buffer added to every side of `bbox`, in degrees.
    pub buffer_degrees: f64,
    /// Name of the preferred source.
    pub requested_source: String,
    /// Output pixel size in metres.
    pub target_resolution_m: f64,
    /// Whether synthetic terrain may stand in when no source delivers.
    pub allow_synthetic_fallback: bool,
    /// Where the elevation raster is written.
    pub output_path: PathBuf,
}

impl ElevationRequest {
    /// Request `source` for `bbox` at 30 m with no buffer and no synthetic
    /// fallback.
    pub fn new(bbox: BoundingBox, source: &str, output_path: impl Into<PathBuf>) -> Self {
        Self {
            bbox,
            buffer_degrees: 0.0,
            requested_source: source.to_string(),
            target_resolution_m: DEFAULT_RESOLUTION_M,
            allow_synthetic_fallback: false,
            output_path: output_path.into(),
        }
    }

    /// Set the edge buffer in degrees.
    pub fn with_buffer(mut self, buffer_degrees: f64) -> Self {
        self.buffer_degrees = buffer_degrees;
        self
    }

    /// Set the output resolution in metres.
    pub fn with_resolution(mut self, resolution_m: f64) -> Self {
        self.target_resolution_m = resolution_m;
        self
    }

    /// Permit or forbid synthetic fallback.
    pub fn with_synthetic_fallback(mut self, allow: bool) -> Self {
        self.allow_synthetic_fallback = allow;
        self
    }

    /// The buffered extent the output raster covers.
    pub fn extent(&self) -> Result<BoundingBox> {
        Ok(self.bbox.expand(self.buffer_degrees)?)
    }

    fn validate(&self) -> Result<()> {
        if !self.target_resolution_m.is_finite() || self.target_resolution_m <= 0.0 {
            return Err(DemError::InvalidRequest(format!(
                "target resolution must be a positive number of metres, got {}",
                self.target_resolution_m
            )));
        }
        if self.output_path.as_os_str().is_empty() || self.output_path.file_name().is_none() {
            return Err(DemError::InvalidRequest(format!(
                "output path '{}' does not name a file",
                self.output_path.display()
            )));
        }
        Ok(())
    }
}

/// Where the elevation in a product came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUsed {
    /// Real data from the named source.
    Real(SourceKind),
    /// Procedurally generated terrain.
    Synthetic,
}

impl SourceUsed {
    /// Whether the product is synthetic.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, SourceUsed::Synthetic)
    }
}

impl fmt::Display for SourceUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceUsed::Real(kind) => write!(f, "real:{}", kind),
            SourceUsed::Synthetic => f.write_str("synthetic"),
        }
    }
}

/// A finished elevation raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationProduct {
    /// Location of the raster.
    pub raster_path: PathBuf,
    /// Provenance of the elevations.
    pub source_used: SourceUsed,
    /// Pixel size in metres.
    pub resolution_m: f64,
    /// Geographic extent of the raster (the buffered request box).
    pub extent: BoundingBox,
}

/// Named states of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionState {
    /// Request received.
    Requested,
    /// Choosing a source.
    Resolving,
    /// Obtaining the source's tiles.
    Fetching,
    /// Merging and cropping tiles into the output raster.
    Merging,
    /// Generating synthetic terrain.
    FallingBack,
    /// Output raster written.
    Ready,
    /// Product handed back.
    Done,
    /// No raster could be produced.
    Failed,
}

/// Everything an acquisition did, for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionReport {
    /// The product.
    pub product: ElevationProduct,
    /// Requested source, if another one was used in its place.
    pub substituted_from: Option<SourceKind>,
    /// Sources tried, in order.
    pub sources_attempted: Vec<SourceKind>,
    /// States visited, in order.
    pub states: Vec<AcquisitionState>,
    /// Tiles required from the last source tried.
    pub tiles_total: usize,
    /// Of those, tiles served from the cache.
    pub cache_hits: usize,
    /// Of those, tiles downloaded.
    pub tiles_fetched: usize,
}

/// Internal transitions, carrying the data each state works on.
enum Step<'r> {
    Requested,
    Resolving(Option<&'r SourceDescriptor>),
    Fetching(&'r SourceDescriptor),
    Merging(&'r SourceDescriptor, Vec<PathBuf>),
    FallingBack,
    Ready(ElevationProduct),
    Done(ElevationProduct),
    Failed(SourceKind),
}

impl Step<'_> {
    fn state(&self) -> AcquisitionState {
        match self {
            Step::Requested => AcquisitionState::Requested,
            Step::Resolving(_) => AcquisitionState::Resolving,
            Step::Fetching(_) => AcquisitionState::Fetching,
            Step::Merging(..) => AcquisitionState::Merging,
            Step::FallingBack => AcquisitionState::FallingBack,
            Step::Ready(_) => AcquisitionState::Ready,
            Step::Done(_) => AcquisitionState::Done,
            Step::Failed(_) => AcquisitionState::Failed,
        }
    }
}

/// Result of obtaining one tile.
enum TileOutcome {
    Cached(PathBuf),
    Fetched(PathBuf),
    Failed(FetchError),
}

/// Drives acquisitions against a registry, a tile store, a fetcher and a
/// raster toolkit.
pub struct Orchestrator {
    registry: SourceRegistry,
    cache: Arc<dyn TileStore>,
    fetcher: Fetcher,
    toolkit: Arc<dyn RasterToolkit>,
    pool: rayon::ThreadPool,
    cancel: CancelToken,
    synthetic_max_pixels: u64,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("fetcher", &self.fetcher)
            .field("workers", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator with `concurrency` tile workers (at least one).
    pub fn new(
        registry: SourceRegistry,
        cache: Arc<dyn TileStore>,
        fetcher: Fetcher,
        toolkit: Arc<dyn RasterToolkit>,
        concurrency: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("dem-tile-{}", i))
            .build()?;

        Ok(Self {
            registry,
            cache,
            fetcher,
            toolkit,
            pool,
            cancel: CancelToken::new(),
            synthetic_max_pixels: synthetic::MAX_PIXELS,
        })
    }

    /// Production wiring: built-in registry, disk cache, reqwest and GDAL.
    pub fn from_config(config: &TerrainConfig) -> Result<Self> {
        config.validate()?;
        let cache = DiskTileCache::open(&config.cache_dir, config.min_tile_bytes)?;
        let client = ReqwestClient::new(&config.user_agent)?;
        let fetcher = Fetcher::new(Arc::new(client), config.attempt_timeout(), config.min_tile_bytes);
        let toolkit = GdalToolkit::new(config.toolkit.clone());

        Self::new(
            SourceRegistry::builtin(),
            Arc::new(cache),
            fetcher,
            Arc::new(toolkit),
            config.concurrency,
        )
    }

    /// Use `cancel` to stop acquisitions from outside.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cap the synthetic fallback grid at `max_pixels`; larger areas get a
    /// coarser pixel size than requested.
    pub fn with_synthetic_pixel_limit(mut self, max_pixels: u64) -> Self {
        self.synthetic_max_pixels = max_pixels;
        self
    }

    /// The cancellation token checked by this orchestrator.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// The source registry.
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// The raster toolkit.
    pub fn toolkit(&self) -> Arc<dyn RasterToolkit> {
        Arc::clone(&self.toolkit)
    }

    /// Acquire elevation for `request`.
    pub fn acquire(&self, request: &ElevationRequest) -> Result<ElevationProduct> {
        self.acquire_with_report(request).map(|report| report.product)
    }

    /// Acquire elevation for `request`, reporting how it was obtained.
    pub fn acquire_with_report(&self, request: &ElevationRequest) -> Result<AcquisitionReport> {
        let started = Instant::now();
        let mut states = Vec::new();
        let mut extent = request.bbox;
        let mut requested_kind = None;
        let mut substituted_from = None;
        let mut attempted: Vec<SourceKind> = Vec::new();
        let mut tile_failures: Vec<FetchError> = Vec::new();
        let (mut tiles_total, mut cache_hits, mut tiles_fetched) = (0, 0, 0);

        let mut step = Step::Requested;
        loop {
            let state = step.state();
            states.push(state);
            debug!(?state, "acquisition state");
            // Once the product is in place the run can only finish
            let committed = matches!(step, Step::Ready(_) | Step::Done(_));
            if !committed && self.cancel.is_cancelled() {
                info!(?state, "acquisition cancelled");
                return Err(DemError::Cancelled);
            }

            step = match step {
                Step::Requested => {
                    request.validate()?;
                    extent = request.extent()?;
                    info!(
                        source = %request.requested_source,
                        bbox = %request.bbox,
                        buffer_degrees = request.buffer_degrees,
                        "elevation requested"
                    );
                    Step::Resolving(None)
                }

                Step::Resolving(None) => {
                    let resolved = self.registry.resolve(&request.requested_source, &extent)?;
                    requested_kind = Some(resolved.substituted_from.unwrap_or(resolved.source.kind));
                    if let Some(from) = resolved.substituted_from {
                        substituted_from = Some(from);
                        metrics::counter!(metric_defs::SOURCE_SUBSTITUTIONS.name, "source" => from.name())
                            .increment(1);
                    }
                    attempted.push(resolved.source.kind);
                    Step::Fetching(resolved.source)
                }

                Step::Resolving(Some(alternative)) => {
                    let from = requested_kind.unwrap_or(alternative.kind);
                    warn!(
                        requested = from.name(),
                        substitute = alternative.name(),
                        "retrying with another global source"
                    );
                    if substituted_from.is_none() {
                        substituted_from = Some(from);
                        metrics::counter!(metric_defs::SOURCE_SUBSTITUTIONS.name, "source" => from.name())
                            .increment(1);
                    }
                    attempted.push(alternative.kind);
                    Step::Fetching(alternative)
                }

                Step::Fetching(source) => {
                    let tiles = tiles_for(&request.bbox, request.buffer_degrees, source)?;
                    metrics::counter!(metric_defs::TILES_REQUESTED.name, "source" => source.name())
                        .increment(tiles.len() as u64);
                    info!(source = source.name(), tiles = tiles.len(), "fetching tiles");

                    let outcomes = self.obtain_tiles(&tiles, source)?;

                    tiles_total = tiles.len();
                    cache_hits = 0;
                    tiles_fetched = 0;
                    let mut paths = Vec::with_capacity(outcomes.len());
                    let mut failed = Vec::new();
                    for outcome in outcomes {
                        match outcome {
                            TileOutcome::Cached(path) => {
                                cache_hits += 1;
                                paths.push(path);
                            }
                            TileOutcome::Fetched(path) => {
                                tiles_fetched += 1;
                                paths.push(path);
                            }
                            TileOutcome::Failed(err) => failed.push(err),
                        }
                    }

                    if failed.is_empty() {
                        info!(source = source.name(), cache_hits, tiles_fetched, "all tiles available");
                        Step::Merging(source, paths)
                    } else {
                        warn!(
                            source = source.name(),
                            failed = failed.len(),
                            of = tiles_total,
                            "source could not deliver every tile"
                        );
                        tile_failures.extend(failed);
                        match self.next_alternative(source.kind, &attempted) {
                            Some(alternative) => Step::Resolving(Some(alternative)),
                            None if request.allow_synthetic_fallback => Step::FallingBack,
                            None => Step::Failed(source.kind),
                        }
                    }
                }

                Step::Merging(source, paths) => {
                    self.merge_and_crop(&paths, &extent, request)?;
                    Step::Ready(ElevationProduct {
                        raster_path: request.output_path.clone(),
                        source_used: SourceUsed::Real(source.kind),
                        resolution_m: request.target_resolution_m,
                        extent,
                    })
                }

                Step::FallingBack => {
                    warn!(bbox = %extent, "no source delivered real elevation, generating synthetic terrain");
                    let resolution_m = synthetic::fitting_resolution(
                        &extent,
                        request.target_resolution_m,
                        self.synthetic_max_pixels,
                    )?;
                    if resolution_m > request.target_resolution_m {
                        warn!(
                            requested_m = request.target_resolution_m,
                            resolution_m,
                            "area too large for synthetic terrain at the requested resolution, coarsening"
                        );
                    }
                    let raster_path = synthetic::generate(&extent, resolution_m, &request.output_path)?;
                    metrics::counter!(metric_defs::SYNTHETIC_FALLBACKS.name, "source" => "synthetic")
                        .increment(1);
                    Step::Ready(ElevationProduct {
                        raster_path,
                        source_used: SourceUsed::Synthetic,
                        resolution_m,
                        extent,
                    })
                }

                Step::Ready(product) => Step::Done(product),

                Step::Done(product) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    metrics::histogram!(
                        metric_defs::ACQUISITION_DURATION.name,
                        "source" => product.source_used.to_string()
                    )
                    .record(elapsed);
                    info!(
                        source_used = %product.source_used,
                        path = %product.raster_path.display(),
                        elapsed_secs = elapsed,
                        "elevation ready"
                    );
                    return Ok(AcquisitionReport {
                        product,
                        substituted_from,
                        sources_attempted: attempted,
                        states,
                        tiles_total,
                        cache_hits,
                        tiles_fetched,
                    });
                }

                Step::Failed(source) => {
                    error!(
                        source = source.name(),
                        failed_tiles = tile_failures.len(),
                        "elevation acquisition failed and synthetic fallback is disabled"
                    );
                    return Err(DemError::DemAcquisition {
                        source_kind: source,
                        tile_failures,
                    });
                }
            };
        }
    }

    /// Next global source not yet tried.
    fn next_alternative(&self, failed: SourceKind, attempted: &[SourceKind]) -> Option<&SourceDescriptor> {
        self.registry
            .global_alternatives(failed)
            .find(|s| !attempted.contains(&s.kind))
    }

    /// Obtain every tile on the worker pool; returns once all have finished.
    fn obtain_tiles(
        &self,
        tiles: &std::collections::BTreeSet<TileId>,
        source: &SourceDescriptor,
    ) -> Result<Vec<TileOutcome>> {
        self.pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| self.obtain_tile(tile, source))
                .collect::<Result<Vec<_>>>()
        })
    }

    fn obtain_tile(&self, tile: &TileId, source: &SourceDescriptor) -> Result<TileOutcome> {
        if self.cancel.is_cancelled() {
            return Err(DemError::Cancelled);
        }

        if let Some(entry) = self.cache.get(tile)? {
            debug!(tile = %tile, path = %entry.path.display(), "cache hit");
            metrics::counter!(metric_defs::CACHE_HITS.name, "source" => tile.source_name()).increment(1);
            return Ok(TileOutcome::Cached(entry.path));
        }

        let mirrors = tile.mirror_urls(source);
        let bytes = match self.fetcher.fetch(tile, &mirrors, &self.cancel) {
            Ok(bytes) => bytes,
            Err(err) if err.was_cancelled() => return Err(DemError::Cancelled),
            Err(err) => {
                warn!(tile = %tile, mirrors = mirrors.len(), "tile unavailable from every mirror");
                return Ok(TileOutcome::Failed(err));
            }
        };

        if self.cancel.is_cancelled() {
            return Err(DemError::Cancelled);
        }
        let entry = self.cache.put(tile, &bytes)?;
        Ok(TileOutcome::Fetched(entry.path))
    }

    /// Merge `tiles` (if more than one) and crop to `extent`, publishing the
    /// result at the request's output path by rename.
    fn merge_and_crop(&self, tiles: &[PathBuf], extent: &BoundingBox, request: &ElevationRequest) -> Result<()> {
        let out_dir = parent_dir(&request.output_path);
        fs::create_dir_all(out_dir)?;
        let work = tempfile::Builder::new()
            .prefix(".localmap-merge-")
            .tempdir_in(out_dir)?;

        let merged = work.path().join("merged.tif");
        let input: &Path = match tiles {
            [single] => single,
            _ => {
                info!(tiles = tiles.len(), "merging tiles");
                self.toolkit.merge(tiles, &merged).map_err(DemError::Merge)?;
                &merged
            }
        };

        let cropped = work.path().join("elevation.tif");
        let options = ReprojectOptions {
            extent: *extent,
            pixel_size_degrees: pixel_size_degrees(extent, request.target_resolution_m),
            target_srs: "EPSG:4326".to_string(),
        };
        self.toolkit
            .reproject(input, &cropped, &options)
            .map_err(DemError::Merge)?;

        if self.cancel.is_cancelled() {
            return Err(DemError::Cancelled);
        }
        fs::rename(&cropped, &request.output_path)?;
        Ok(())
    }
}

/// Pixel size in degrees for `resolution_m` at the middle of `extent`.
fn pixel_size_degrees(extent: &BoundingBox, resolution_m: f64) -> (f64, f64) {
    let (mid_lat, _) = extent.center();
    let lat = resolution_m / METERS_PER_DEGREE;
    let lon = resolution_m / (METERS_PER_DEGREE * mid_lat.to_radians().cos().max(1e-6));
    (lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lumsden() -> BoundingBox {
        BoundingBox::new(57.37, 57.26, -2.82, -2.95).unwrap()
    }

    #[test]
    fn test_source_used_display() {
        assert_eq!(SourceUsed::Real(SourceKind::Srtm).to_string(), "real:srtm");
        assert_eq!(SourceUsed::Real(SourceKind::OsTerrain).to_string(), "real:os_terrain");
        assert_eq!(SourceUsed::Synthetic.to_string(), "synthetic");
        assert!(SourceUsed::Synthetic.is_synthetic());
    }

    #[test]
    fn test_request_builder_and_extent() {
        let request = ElevationRequest::new(lumsden(), "srtm", "/tmp/dem.tif")
            .with_buffer(0.05)
            .with_resolution(50.0)
            .with_synthetic_fallback(true);
        assert_eq!(request.requested_source, "srtm");
        assert_relative_eq!(request.target_resolution_m, 50.0);
        assert!(request.allow_synthetic_fallback);

        let extent = request.extent().unwrap();
        assert_relative_eq!(extent.north(), 57.42, epsilon = 1e-9);
        assert_relative_eq!(extent.west(), -3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_request_validation() {
        let request = ElevationRequest::new(lumsden(), "srtm", "/tmp/dem.tif").with_resolution(0.0);
        assert!(matches!(request.validate(), Err(DemError::InvalidRequest(_))));

        let request = ElevationRequest::new(lumsden(), "srtm", "");
        assert!(matches!(request.validate(), Err(DemError::InvalidRequest(_))));

        let request = ElevationRequest::new(lumsden(), "srtm", "/tmp/dem.tif").with_buffer(-1.0);
        assert!(request.extent().is_err());
    }

    #[test]
    fn test_pixel_size_widens_with_latitude() {
        let (lon, lat) = pixel_size_degrees(&lumsden(), 30.0);
        assert_relative_eq!(lat, 30.0 / 111_320.0);
        assert!(lon > lat * 1.8 && lon < lat * 1.9);
    }
}
