//! Procedural stand-in terrain for when no real elevation data can be had.
//!
//! The surface is a pair of low-frequency sine ridges plus smoothly
//! interpolated lattice noise, clamped to 0..=1000 m. The noise lattice is
//! seeded from a SHA-256 digest of the extent and resolution, so the same
//! request always yields the same raster.

use crate::raster::ElevationRaster;
use crate::{DemError, Result};
use localmap_geo::BoundingBox;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

/// No-data marker written into synthetic rasters.
pub const SYNTHETIC_NODATA: f32 = -9999.0;

/// Lowest synthetic elevation in metres.
pub const MIN_ELEVATION_M: f32 = 0.0;

/// Highest synthetic elevation in metres.
pub const MAX_ELEVATION_M: f32 = 1000.0;

/// Largest grid the generator will allocate (4096 x 4096).
pub const MAX_PIXELS: u64 = 4096 * 4096;

/// Noise lattice spacing in pixels.
const NOISE_CELL_PIXELS: u32 = 8;

/// Noise amplitude in metres.
const NOISE_AMPLITUDE_M: f64 = 30.0;

const METERS_PER_DEGREE: f64 = 111_320.0;

fn check_resolution(resolution_m: f64) -> Result<()> {
    if !resolution_m.is_finite() || resolution_m <= 0.0 {
        return Err(DemError::InvalidRequest(format!(
            "resolution must be a positive number of metres, got {}",
            resolution_m
        )));
    }
    Ok(())
}

/// Unclamped grid size as (cols, rows).
fn raw_dimensions(bbox: &BoundingBox, resolution_m: f64) -> (f64, f64) {
    let (mid_lat, _) = bbox.center();
    let width_m = bbox.width_degrees() * METERS_PER_DEGREE * mid_lat.to_radians().cos();
    let height_m = bbox.height_degrees() * METERS_PER_DEGREE;

    let cols = (width_m / resolution_m).ceil().max(2.0);
    let rows = (height_m / resolution_m).ceil().max(2.0);
    (cols, rows)
}

/// Grid size for `bbox` at `resolution_m`, at least 2 x 2.
pub fn grid_dimensions(bbox: &BoundingBox, resolution_m: f64) -> Result<(u32, u32)> {
    check_resolution(resolution_m)?;
    let (cols, rows) = raw_dimensions(bbox, resolution_m);
    if cols * rows > MAX_PIXELS as f64 {
        return Err(DemError::InvalidRequest(format!(
            "synthetic grid of {:.0}x{:.0} pixels at {} m exceeds the {} pixel limit",
            cols, rows, resolution_m, MAX_PIXELS
        )));
    }

    Ok((cols as u32, rows as u32))
}

/// The finest resolution no finer than `requested_m` whose grid over `bbox`
/// stays within `max_pixels` (and [`MAX_PIXELS`]).
pub fn fitting_resolution(bbox: &BoundingBox, requested_m: f64, max_pixels: u64) -> Result<f64> {
    check_resolution(requested_m)?;
    let limit = max_pixels.clamp(4, MAX_PIXELS) as f64;

    let mut resolution_m = requested_m;
    for _ in 0..64 {
        let (cols, rows) = raw_dimensions(bbox, resolution_m);
        let pixels = cols * rows;
        if pixels <= limit {
            return Ok(resolution_m);
        }
        resolution_m *= (pixels / limit).sqrt().max(1.0) * 1.001;
    }

    Err(DemError::InvalidRequest(format!(
        "no resolution from {} m keeps the synthetic grid within {} pixels",
        requested_m, limit
    )))
}

fn seed_for(bbox: &BoundingBox, resolution_m: f64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for value in [bbox.north(), bbox.south(), bbox.east(), bbox.west(), resolution_m] {
        hasher.update(value.to_le_bytes());
    }
    hasher.finalize().into()
}

/// Random values on a coarse lattice, blended with smoothstep.
struct NoiseLattice {
    values: Vec<f64>,
    cols: usize,
}

impl NoiseLattice {
    fn new(rng: &mut ChaCha8Rng, width: u32, height: u32) -> Self {
        let cols = (width / NOISE_CELL_PIXELS) as usize + 2;
        let rows = (height / NOISE_CELL_PIXELS) as usize + 2;
        let values = (0..cols * rows).map(|_| rng.gen_range(-1.0..=1.0)).collect();
        Self { values, cols }
    }

    fn at(&self, col: u32, row: u32) -> f64 {
        let cell = NOISE_CELL_PIXELS as f64;
        let gx = col as f64 / cell;
        let gy = row as f64 / cell;
        let (ix, iy) = (gx.floor() as usize, gy.floor() as usize);
        let tx = smoothstep(gx - ix as f64);
        let ty = smoothstep(gy - iy as f64);

        let v = |x: usize, y: usize| self.values[y * self.cols + x];
        let top = v(ix, iy) * (1.0 - tx) + v(ix + 1, iy) * tx;
        let bottom = v(ix, iy + 1) * (1.0 - tx) + v(ix + 1, iy + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

/// Offset in degrees of the centre of pixel `index` of `count` spanning `span`.
///
/// Rasters are written pixel-is-area, so each sample stands for the middle
/// of its pixel.
fn pixel_centre(index: u32, count: u32, span: f64) -> f64 {
    (index as f64 + 0.5) * span / count as f64
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

/// Build the synthetic surface for `bbox` in memory.
pub fn synthesize(bbox: &BoundingBox, resolution_m: f64) -> Result<ElevationRaster> {
    let (width, height) = grid_dimensions(bbox, resolution_m)?;
    let mut rng = ChaCha8Rng::from_seed(seed_for(bbox, resolution_m));
    let noise = NoiseLattice::new(&mut rng, width, height);

    let mut data = Vec::with_capacity(width as usize * height as usize);
    for row in 0..height {
        let y = pixel_centre(row, height, bbox.height_degrees());
        for col in 0..width {
            let x = pixel_centre(col, width, bbox.width_degrees());
            let elevation = 200.0
                + 100.0 * (x * 10.0).sin() * (y * 8.0).cos()
                + 50.0 * (x * 15.0).sin() * (y * 12.0).sin()
                + NOISE_AMPLITUDE_M * noise.at(col, row);
            data.push((elevation as f32).clamp(MIN_ELEVATION_M, MAX_ELEVATION_M));
        }
    }

    ElevationRaster::from_parts(data, width, height, *bbox, Some(SYNTHETIC_NODATA))
}

/// Generate synthetic terrain covering `bbox` and write it to `output_path`.
pub fn generate<P: AsRef<Path>>(bbox: &BoundingBox, resolution_m: f64, output_path: P) -> Result<PathBuf> {
    let output_path = output_path.as_ref();
    let raster = synthesize(bbox, resolution_m)?;
    let (width, height) = raster.dimensions();
    info!(%bbox, width, height, resolution_m, path = %output_path.display(), "writing synthetic terrain");

    raster.write_atomic(output_path)?;
    Ok(output_path.to_path_buf())
}
