//! YAML configuration.
//!
//! [`TerrainConfig`] configures the acquisition machinery (cache, network,
//! toolkit binaries). [`TerrainSettings`] is the per-area block describing
//! what to produce for one map:
//!
//! ```yaml
//! elevation:
//!   source: os_terrain
//!   resolution_m: 50
//! hillshading:
//!   enabled: true
//!   opacity: 0.4
//! contours:
//!   enabled: true
//!   interval: 10
//!   major_interval: 50
//! ```
//!
//! Every field is optional.

use crate::derivative::{ContourParams, DerivativeSpec, HillshadeParams};
use crate::orchestrator::ElevationRequest;
use crate::{DemError, Result};
use localmap_geo::BoundingBox;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Executable names for the raster toolkit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Merge and crop/reproject tool.
    pub gdalwarp: String,
    /// Hillshade tool.
    pub gdaldem: String,
    /// Contour extraction tool.
    pub gdal_contour: String,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            gdalwarp: "gdalwarp".to_string(),
            gdaldem: "gdaldem".to_string(),
            gdal_contour: "gdal_contour".to_string(),
        }
    }
}

/// Acquisition machinery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Tile cache root.
    pub cache_dir: PathBuf,
    /// Tile worker threads.
    pub concurrency: usize,
    /// Timeout for each mirror attempt, in seconds.
    pub attempt_timeout_secs: u64,
    /// Smallest file accepted as a tile.
    pub min_tile_bytes: u64,
    /// User-Agent sent to mirrors.
    pub user_agent: String,
    /// Toolkit executables.
    pub toolkit: ToolkitConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            concurrency: 4,
            attempt_timeout_secs: 30,
            min_tile_bytes: 1000,
            user_agent: crate::fetch::DEFAULT_USER_AGENT.to_string(),
            toolkit: ToolkitConfig::default(),
        }
    }
}

/// `<platform cache dir>/localmap/dem_cache`, or `./dem_cache` when the
/// platform has no cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("localmap").join("dem_cache"))
        .unwrap_or_else(|| PathBuf::from("dem_cache"))
}

impl TerrainConfig {
    /// Load from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings acquisition cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(DemError::InvalidRequest(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(DemError::InvalidRequest(
                "attempt_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-attempt timeout as a [`Duration`].
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Elevation block of the area settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationSettings {
    /// Requested source name.
    pub source: String,
    /// Whether synthetic terrain may stand in for real data.
    pub allow_synthetic_fallback: bool,
    /// Output resolution in metres.
    pub resolution_m: f64,
    /// Edge buffer around the map area in kilometres.
    pub buffer_km: f64,
}

impl Default for ElevationSettings {
    fn default() -> Self {
        Self {
            source: "srtm".to_string(),
            allow_synthetic_fallback: true,
            resolution_m: 30.0,
            buffer_km: 1.0,
        }
    }
}

/// Hillshading block of the area settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HillshadeSettings {
    /// Produce a hillshade.
    pub enabled: bool,
    /// Light azimuth in degrees.
    pub azimuth: f64,
    /// Light altitude in degrees.
    pub altitude: f64,
    /// Vertical exaggeration.
    pub z_factor: f64,
    /// Horizontal to vertical unit ratio.
    pub scale: f64,
    /// Layer opacity for styling.
    pub opacity: f64,
}

impl Default for HillshadeSettings {
    fn default() -> Self {
        let params = HillshadeParams::default();
        Self {
            enabled: false,
            azimuth: params.azimuth,
            altitude: params.altitude,
            z_factor: params.z_factor,
            scale: params.scale,
            opacity: params.opacity,
        }
    }
}

/// Contours block of the area settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourSettings {
    /// Produce contours.
    pub enabled: bool,
    /// Contour interval in metres.
    pub interval: f64,
    /// Index contour interval in metres.
    pub major_interval: f64,
}

impl Default for ContourSettings {
    fn default() -> Self {
        let params = ContourParams::default();
        Self {
            enabled: false,
            interval: params.interval_m,
            major_interval: params.major_interval_m,
        }
    }
}

/// Terrain settings for one map area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSettings {
    /// Elevation acquisition.
    pub elevation: ElevationSettings,
    /// Shaded relief.
    pub hillshading: HillshadeSettings,
    /// Contour lines.
    pub contours: ContourSettings,
}

impl TerrainSettings {
    /// Parse from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Build the acquisition request for `bbox`.
    ///
    /// The kilometre buffer is applied to the box up front (latitude
    /// corrected), so the request itself carries no further buffer.
    pub fn to_request(&self, bbox: &BoundingBox, output_path: impl Into<PathBuf>) -> Result<ElevationRequest> {
        let buffered = bbox.expand_km(self.elevation.buffer_km)?;
        Ok(ElevationRequest::new(buffered, &self.elevation.source, output_path)
            .with_resolution(self.elevation.resolution_m)
            .with_synthetic_fallback(self.elevation.allow_synthetic_fallback))
    }

    /// Derivatives enabled for the area.
    pub fn derivative_spec(&self) -> DerivativeSpec {
        let hillshade = self.hillshading.enabled.then(|| HillshadeParams {
            azimuth: self.hillshading.azimuth,
            altitude: self.hillshading.altitude,
            z_factor: self.hillshading.z_factor,
            scale: self.hillshading.scale,
            opacity: self.hillshading.opacity,
        });
        let contour = self.contours.enabled.then(|| ContourParams {
            interval_m: self.contours.interval,
            major_interval_m: self.contours.major_interval,
        });
        DerivativeSpec { hillshade, contour }
    }
}
