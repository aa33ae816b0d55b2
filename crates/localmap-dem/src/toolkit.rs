//! Raster processing primitives.
//!
//! Merging, cropping, hillshading and contouring are delegated to an
//! external toolkit. [`RasterToolkit`] is the seam; [`GdalToolkit`] drives
//! the GDAL command line tools.

use crate::config::ToolkitConfig;
use localmap_geo::BoundingBox;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Default contour attribute name.
pub const ELEVATION_ATTRIBUTE: &str = "elevation";

/// A toolkit invocation failed.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool could not be started.
    #[error("failed to run {tool}: {source}")]
    Launch {
        /// Executable name.
        tool: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        /// Executable name.
        tool: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The tool reported success but wrote nothing.
    #[error("{tool} did not produce {}", path.display())]
    MissingOutput {
        /// Executable name.
        tool: String,
        /// Expected output path.
        path: PathBuf,
    },
}

/// Crop/reproject parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectOptions {
    /// Output extent.
    pub extent: BoundingBox,
    /// Output pixel size in degrees, `(x, y)`.
    pub pixel_size_degrees: (f64, f64),
    /// Target spatial reference, e.g. `EPSG:4326`.
    pub target_srs: String,
}

/// Hillshade parameters passed to the toolkit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HillshadeOptions {
    /// Light source azimuth in degrees clockwise from north.
    pub azimuth: f64,
    /// Light source altitude above the horizon in degrees.
    pub altitude: f64,
    /// Vertical exaggeration.
    pub z_factor: f64,
    /// Ratio of horizontal units to elevation units.
    pub scale: f64,
}

/// Contour parameters passed to the toolkit.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourOptions {
    /// Elevation step between lines in metres.
    pub interval: f64,
    /// Attribute receiving each line's elevation.
    pub attribute: String,
    /// Output vector format; inferred from the extension when `None`.
    pub format: Option<String>,
}

/// The four raster primitives acquisition and derivatives rely on.
///
/// Every method writes `output` (overwriting it) or fails.
pub trait RasterToolkit: Send + Sync {
    /// Mosaic `inputs` into a single raster.
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError>;

    /// Crop and resample `input` onto a regular grid.
    fn reproject(&self, input: &Path, output: &Path, options: &ReprojectOptions) -> Result<(), ToolError>;

    /// Render shaded relief.
    fn hillshade(&self, input: &Path, output: &Path, options: &HillshadeOptions) -> Result<(), ToolError>;

    /// Extract contour lines.
    fn contour(&self, input: &Path, output: &Path, options: &ContourOptions) -> Result<(), ToolError>;
}

/// [`RasterToolkit`] backed by `gdalwarp`, `gdaldem` and `gdal_contour`.
#[derive(Debug, Clone, Default)]
pub struct GdalToolkit {
    binaries: ToolkitConfig,
}

impl GdalToolkit {
    /// Create a toolkit using the configured executables.
    pub fn new(binaries: ToolkitConfig) -> Self {
        Self { binaries }
    }

    fn run(&self, tool: &str, args: Vec<OsString>, output: &Path) -> Result<(), ToolError> {
        debug!(tool, ?args, "running raster tool");

        let result = Command::new(tool)
            .args(&args)
            .output()
            .map_err(|source| ToolError::Launch {
                tool: tool.to_string(),
                source,
            })?;

        if !result.status.success() {
            return Err(ToolError::Failed {
                tool: tool.to_string(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        if !output.exists() {
            return Err(ToolError::MissingOutput {
                tool: tool.to_string(),
                path: output.to_path_buf(),
            });
        }

        Ok(())
    }
}

fn geotiff_args() -> Vec<OsString> {
    ["-of", "GTiff", "-co", "COMPRESS=LZW"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

impl RasterToolkit for GdalToolkit {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        let mut args: Vec<OsString> = vec!["-overwrite".into()];
        args.extend(geotiff_args());
        args.extend(inputs.iter().map(|p| p.as_os_str().to_os_string()));
        args.push(output.as_os_str().to_os_string());
        self.run(&self.binaries.gdalwarp, args, output)
    }

    fn reproject(&self, input: &Path, output: &Path, options: &ReprojectOptions) -> Result<(), ToolError> {
        let extent = &options.extent;
        let (x_res, y_res) = options.pixel_size_degrees;
        let mut args: Vec<OsString> = vec!["-overwrite".into()];
        args.extend(
            [
                "-t_srs".to_string(),
                options.target_srs.clone(),
                "-te".to_string(),
                extent.west().to_string(),
                extent.south().to_string(),
                extent.east().to_string(),
                extent.north().to_string(),
                "-tr".to_string(),
                x_res.to_string(),
                y_res.to_string(),
                "-r".to_string(),
                "bilinear".to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.extend(geotiff_args());
        args.push(input.as_os_str().to_os_string());
        args.push(output.as_os_str().to_os_string());
        self.run(&self.binaries.gdalwarp, args, output)
    }

    fn hillshade(&self, input: &Path, output: &Path, options: &HillshadeOptions) -> Result<(), ToolError> {
        let mut args: Vec<OsString> = vec![
            "hillshade".into(),
            input.as_os_str().to_os_string(),
            output.as_os_str().to_os_string(),
        ];
        args.extend(
            [
                "-z".to_string(),
                options.z_factor.to_string(),
                "-s".to_string(),
                options.scale.to_string(),
                "-az".to_string(),
                options.azimuth.to_string(),
                "-alt".to_string(),
                options.altitude.to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.extend(geotiff_args());
        self.run(&self.binaries.gdaldem, args, output)
    }

    fn contour(&self, input: &Path, output: &Path, options: &ContourOptions) -> Result<(), ToolError> {
        let mut args: Vec<OsString> = vec![
            "-a".into(),
            options.attribute.clone().into(),
            "-i".into(),
            options.interval.to_string().into(),
        ];
        if let Some(format) = &options.format {
            args.push("-f".into());
            args.push(format.into());
        }
        args.push(input.as_os_str().to_os_string());
        args.push(output.as_os_str().to_os_string());
        self.run(&self.binaries.gdal_contour, args, output)
    }
}
