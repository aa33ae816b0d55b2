//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use localmap_dem::{
    CancelToken, ContourOptions, DiskTileCache, FailureReason, Fetcher, HillshadeOptions, HttpClient,
    Orchestrator, RasterToolkit, ReprojectOptions, ToolError,
};
use localmap_geo::{BoundingBox, SourceRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MIN_TILE_BYTES: u64 = 1000;

pub fn lumsden() -> BoundingBox {
    BoundingBox::new(57.37, 57.26, -2.82, -2.95).unwrap()
}

/// Four 1° cells around Seattle.
pub fn seattle() -> BoundingBox {
    BoundingBox::new(48.2, 47.8, -121.9, -122.1).unwrap()
}

type Responder = dyn Fn(&str) -> Result<Vec<u8>, FailureReason> + Send + Sync;

/// HTTP double that records every URL it is asked for and how many
/// requests were in flight at once.
pub struct MockHttp {
    respond: Box<Responder>,
    calls: Mutex<Vec<String>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockHttp {
    pub fn new(respond: impl Fn(&str) -> Result<Vec<u8>, FailureReason> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every request for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Most requests ever outstanding at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every URL returns a plausible tile body derived from the URL.
    pub fn serving() -> Self {
        Self::new(|url| Ok(tile_body(url)))
    }

    /// Every URL fails with a 503.
    pub fn failing() -> Self {
        Self::new(|_| Err(FailureReason::HttpStatus(503)))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl HttpClient for MockHttp {
    fn get(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, FailureReason> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.latency);
        let response = (self.respond)(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// 2 KiB body unique to `url`.
pub fn tile_body(url: &str) -> Vec<u8> {
    url.bytes().cycle().take(2048).collect()
}

/// Raster toolkit double. Outputs are deterministic functions of the inputs.
#[derive(Default)]
pub struct MockToolkit {
    pub merges: AtomicUsize,
    pub reprojects: AtomicUsize,
    pub hillshades: AtomicUsize,
    pub contours: AtomicUsize,
    pub fail_merge: bool,
    pub fail_hillshade: bool,
    pub merge_inputs: Mutex<Vec<Vec<PathBuf>>>,
    /// Cancelled as soon as a reprojection has written its output.
    pub cancel_after_reproject: Option<CancelToken>,
}

impl MockToolkit {
    pub fn total_calls(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
            + self.reprojects.load(Ordering::SeqCst)
            + self.hillshades.load(Ordering::SeqCst)
            + self.contours.load(Ordering::SeqCst)
    }

    fn failure(tool: &str) -> ToolError {
        ToolError::Failed {
            tool: tool.to_string(),
            status: "exit status: 1".to_string(),
            stderr: "ERROR 1: simulated failure".to_string(),
        }
    }
}

fn write(output: &Path, bytes: Vec<u8>) -> Result<(), ToolError> {
    fs::write(output, bytes).map_err(|source| ToolError::Launch {
        tool: "mock".to_string(),
        source,
    })
}

fn read(input: &Path) -> Result<Vec<u8>, ToolError> {
    fs::read(input).map_err(|source| ToolError::Launch {
        tool: "mock".to_string(),
        source,
    })
}

impl RasterToolkit for MockToolkit {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        self.merge_inputs.lock().unwrap().push(inputs.to_vec());
        if self.fail_merge {
            return Err(Self::failure("gdalwarp"));
        }
        let mut merged = b"MERGED".to_vec();
        for input in inputs {
            merged.extend(read(input)?);
        }
        write(output, merged)
    }

    fn reproject(&self, input: &Path, output: &Path, options: &ReprojectOptions) -> Result<(), ToolError> {
        self.reprojects.fetch_add(1, Ordering::SeqCst);
        let mut cropped = format!("CROP {} {:?}", options.extent, options.pixel_size_degrees).into_bytes();
        cropped.extend(read(input)?);
        write(output, cropped)?;
        if let Some(cancel) = &self.cancel_after_reproject {
            cancel.cancel();
        }
        Ok(())
    }

    fn hillshade(&self, input: &Path, output: &Path, options: &HillshadeOptions) -> Result<(), ToolError> {
        self.hillshades.fetch_add(1, Ordering::SeqCst);
        if self.fail_hillshade {
            return Err(Self::failure("gdaldem"));
        }
        let mut shaded = format!("HILLSHADE az={} alt={}", options.azimuth, options.altitude).into_bytes();
        shaded.extend(read(input)?);
        write(output, shaded)
    }

    fn contour(&self, input: &Path, output: &Path, options: &ContourOptions) -> Result<(), ToolError> {
        self.contours.fetch_add(1, Ordering::SeqCst);
        read(input)?;
        write(output, format!("CONTOURS {} every {}", options.attribute, options.interval).into_bytes())?;
        // Shapefile sidecars, as gdal_contour writes them
        for extension in ["shx", "dbf"] {
            write(&output.with_extension(extension), extension.as_bytes().to_vec())?;
        }
        Ok(())
    }
}

/// Orchestrator over the built-in registry, a disk cache in `cache_dir` and
/// the given doubles.
pub fn orchestrator(cache_dir: &Path, http: Arc<MockHttp>, toolkit: Arc<MockToolkit>) -> Orchestrator {
    orchestrator_with_registry(SourceRegistry::builtin(), cache_dir, http, toolkit)
}

pub fn orchestrator_with_registry(
    registry: SourceRegistry,
    cache_dir: &Path,
    http: Arc<MockHttp>,
    toolkit: Arc<MockToolkit>,
) -> Orchestrator {
    orchestrator_with_workers(registry, cache_dir, http, toolkit, 4)
}

pub fn orchestrator_with_workers(
    registry: SourceRegistry,
    cache_dir: &Path,
    http: Arc<MockHttp>,
    toolkit: Arc<MockToolkit>,
    concurrency: usize,
) -> Orchestrator {
    let cache = DiskTileCache::open(cache_dir, MIN_TILE_BYTES).unwrap();
    let fetcher = Fetcher::new(http, Duration::from_secs(2), MIN_TILE_BYTES);
    Orchestrator::new(registry, Arc::new(cache), fetcher, toolkit, concurrency).unwrap()
}
