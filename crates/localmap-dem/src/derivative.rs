//! Shaded relief and contour lines derived from an elevation raster.
//!
//! Parameters are validated before the toolkit is touched, so a bad request
//! never launches a process. Toolkit failures come back as
//! [`DemError::DerivativeGeneration`], which callers may treat as
//! recoverable.
//!
//! Tools write into a hidden scratch directory beside the output. Only a
//! successful run replaces the previous output, together with every
//! shapefile sidecar.

use crate::raster::parent_dir;
use crate::toolkit::{ContourOptions, HillshadeOptions, RasterToolkit, ELEVATION_ATTRIBUTE};
use crate::{DemError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Hillshade parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HillshadeParams {
    /// Light azimuth in degrees clockwise from north, `[0, 360)`.
    pub azimuth: f64,
    /// Light altitude in degrees above the horizon, `[0, 90]`.
    pub altitude: f64,
    /// Vertical exaggeration, positive.
    pub z_factor: f64,
    /// Horizontal to vertical unit ratio, positive. 111120 suits rasters
    /// in degrees with elevations in metres.
    pub scale: f64,
    /// Layer opacity for styling, `[0, 1]`.
    pub opacity: f64,
}

impl Default for HillshadeParams {
    fn default() -> Self {
        Self {
            azimuth: 315.0,
            altitude: 45.0,
            z_factor: 1.0,
            scale: 111_120.0,
            opacity: 0.3,
        }
    }
}

impl HillshadeParams {
    /// Check every parameter is in range.
    pub fn validate(&self) -> Result<()> {
        check("hillshade", "azimuth", self.azimuth, "a value in [0, 360)", |v| (0.0..360.0).contains(&v))?;
        check("hillshade", "altitude", self.altitude, "a value in [0, 90]", |v| (0.0..=90.0).contains(&v))?;
        check("hillshade", "z_factor", self.z_factor, "a positive number", |v| v > 0.0)?;
        check("hillshade", "scale", self.scale, "a positive number", |v| v > 0.0)?;
        check("hillshade", "opacity", self.opacity, "a value in [0, 1]", |v| (0.0..=1.0).contains(&v))?;
        Ok(())
    }

    fn options(&self) -> HillshadeOptions {
        HillshadeOptions {
            azimuth: self.azimuth,
            altitude: self.altitude,
            z_factor: self.z_factor,
            scale: self.scale,
        }
    }
}

/// Contour parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourParams {
    /// Elevation step between lines in metres.
    pub interval_m: f64,
    /// Step between index (major) contours; a whole multiple of `interval_m`.
    pub major_interval_m: f64,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            interval_m: 10.0,
            major_interval_m: 50.0,
        }
    }
}

impl ContourParams {
    /// Check every parameter is in range.
    pub fn validate(&self) -> Result<()> {
        check("contour", "interval_m", self.interval_m, "a positive number", |v| v > 0.0)?;
        check("contour", "major_interval_m", self.major_interval_m, "a positive number", |v| v > 0.0)?;

        let ratio = self.major_interval_m / self.interval_m;
        if (ratio - ratio.round()).abs() > 1e-6 || ratio.round() < 1.0 {
            return Err(DemError::InvalidDerivativeParams {
                product: "contour",
                param: "major_interval_m",
                value: self.major_interval_m,
                expected: "a whole multiple of interval_m",
            });
        }
        Ok(())
    }
}

fn check(
    product: &'static str,
    param: &'static str,
    value: f64,
    expected: &'static str,
    in_range: impl Fn(f64) -> bool,
) -> Result<()> {
    if value.is_finite() && in_range(value) {
        Ok(())
    } else {
        Err(DemError::InvalidDerivativeParams {
            product,
            param,
            value,
            expected,
        })
    }
}

/// Which derivatives to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivativeSpec {
    /// Shaded relief, if wanted.
    pub hillshade: Option<HillshadeParams>,
    /// Contour lines, if wanted.
    pub contour: Option<ContourParams>,
}

impl DerivativeSpec {
    /// Validate whichever parameter sets are present.
    pub fn validate(&self) -> Result<()> {
        if let Some(hillshade) = &self.hillshade {
            hillshade.validate()?;
        }
        if let Some(contour) = &self.contour {
            contour.validate()?;
        }
        Ok(())
    }

    /// Whether nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.hillshade.is_none() && self.contour.is_none()
    }
}

/// A written hillshade raster.
#[derive(Debug, Clone, PartialEq)]
pub struct HillshadeOutput {
    /// Raster location.
    pub path: PathBuf,
    /// Opacity to style the layer with.
    pub opacity: f64,
}

/// A written contour layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourOutput {
    /// Vector layer location.
    pub path: PathBuf,
    /// Attribute holding each line's elevation.
    pub attribute: String,
    /// Contour interval in metres.
    pub interval_m: f64,
    /// Index contour interval in metres.
    pub major_interval_m: f64,
}

/// Runs hillshade and contour generation through a [`RasterToolkit`].
#[derive(Clone)]
pub struct DerivativeProducer {
    toolkit: Arc<dyn RasterToolkit>,
}

impl std::fmt::Debug for DerivativeProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivativeProducer").finish_non_exhaustive()
    }
}

impl DerivativeProducer {
    /// Create a producer over `toolkit`.
    pub fn new(toolkit: Arc<dyn RasterToolkit>) -> Self {
        Self { toolkit }
    }

    /// Render shaded relief from `raster` into `output`.
    pub fn make_hillshade(&self, raster: &Path, params: &HillshadeParams, output: &Path) -> Result<HillshadeOutput> {
        params.validate()?;
        require_input("hillshade", raster)?;
        let staging = Staging::beside("hillshade", output)?;

        self.toolkit
            .hillshade(raster, &staging.output, &params.options())
            .map_err(|e| DemError::DerivativeGeneration {
                product: "hillshade",
                reason: e.to_string(),
            })?;
        staging.publish(output)?;

        info!(path = %output.display(), azimuth = params.azimuth, altitude = params.altitude, "hillshade generated");
        Ok(HillshadeOutput {
            path: output.to_path_buf(),
            opacity: params.opacity,
        })
    }

    /// Extract contour lines from `raster` into `output`.
    pub fn make_contours(&self, raster: &Path, params: &ContourParams, output: &Path) -> Result<ContourOutput> {
        params.validate()?;
        require_input("contour", raster)?;
        let staging = Staging::beside("contour", output)?;

        let options = ContourOptions {
            interval: params.interval_m,
            attribute: ELEVATION_ATTRIBUTE.to_string(),
            format: None,
        };
        self.toolkit
            .contour(raster, &staging.output, &options)
            .map_err(|e| DemError::DerivativeGeneration {
                product: "contour",
                reason: e.to_string(),
            })?;
        staging.publish(output)?;

        info!(path = %output.display(), interval_m = params.interval_m, "contours generated");
        Ok(ContourOutput {
            path: output.to_path_buf(),
            attribute: options.attribute,
            interval_m: params.interval_m,
            major_interval_m: params.major_interval_m,
        })
    }
}

fn require_input(product: &'static str, raster: &Path) -> Result<()> {
    if raster.is_file() {
        Ok(())
    } else {
        Err(DemError::DerivativeGeneration {
            product,
            reason: format!("elevation raster {} does not exist", raster.display()),
        })
    }
}

/// Members of a shapefile layer besides the `.shp` itself.
const SHAPEFILE_SIDECARS: [&str; 5] = ["shx", "dbf", "prj", "cpg", "qix"];

/// Every file making up the layer at `path`.
fn layer_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("shp")) {
        files.extend(SHAPEFILE_SIDECARS.iter().map(|ext| path.with_extension(ext)));
    }
    files
}

/// Scratch directory a tool writes one product into.
struct Staging {
    dir: tempfile::TempDir,
    output: PathBuf,
}

impl Staging {
    fn beside(product: &'static str, output: &Path) -> Result<Self> {
        let name = output.file_name().ok_or_else(|| DemError::DerivativeGeneration {
            product,
            reason: format!("output path {} does not name a file", output.display()),
        })?;
        let out_dir = parent_dir(output);
        fs::create_dir_all(out_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(".localmap-derivative-")
            .tempdir_in(out_dir)?;
        let output = dir.path().join(name);
        Ok(Self { dir, output })
    }

    /// Move the staged layer onto `output`. Sidecars of the previous layer
    /// that the new one lacks are removed.
    fn publish(self, output: &Path) -> Result<()> {
        for (staged, target) in layer_files(&self.output).into_iter().zip(layer_files(output)) {
            if staged.exists() {
                fs::rename(&staged, &target)?;
                continue;
            }
            match fs::remove_file(&target) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_param(result: Result<()>) -> &'static str {
        match result {
            Err(DemError::InvalidDerivativeParams { param, .. }) => param,
            other => panic!("expected invalid parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        HillshadeParams::default().validate().unwrap();
        ContourParams::default().validate().unwrap();
        DerivativeSpec::default().validate().unwrap();
    }

    #[test]
    fn test_hillshade_ranges() {
        let base = HillshadeParams::default();
        assert_eq!(invalid_param(HillshadeParams { azimuth: 400.0, ..base }.validate()), "azimuth");
        assert_eq!(invalid_param(HillshadeParams { azimuth: 360.0, ..base }.validate()), "azimuth");
        assert_eq!(invalid_param(HillshadeParams { azimuth: -1.0, ..base }.validate()), "azimuth");
        assert_eq!(invalid_param(HillshadeParams { altitude: 90.5, ..base }.validate()), "altitude");
        assert_eq!(invalid_param(HillshadeParams { z_factor: 0.0, ..base }.validate()), "z_factor");
        assert_eq!(invalid_param(HillshadeParams { scale: f64::INFINITY, ..base }.validate()), "scale");
        assert_eq!(invalid_param(HillshadeParams { opacity: 1.5, ..base }.validate()), "opacity");

        HillshadeParams { azimuth: 0.0, altitude: 90.0, ..base }.validate().unwrap();
    }

    #[test]
    fn test_contour_ranges() {
        assert_eq!(
            invalid_param(ContourParams { interval_m: 0.0, major_interval_m: 50.0 }.validate()),
            "interval_m"
        );
        assert_eq!(
            invalid_param(ContourParams { interval_m: f64::NAN, major_interval_m: 50.0 }.validate()),
            "interval_m"
        );
        assert_eq!(
            invalid_param(ContourParams { interval_m: 20.0, major_interval_m: 50.0 }.validate()),
            "major_interval_m"
        );
        assert_eq!(
            invalid_param(ContourParams { interval_m: 20.0, major_interval_m: 10.0 }.validate()),
            "major_interval_m"
        );
        ContourParams { interval_m: 2.5, major_interval_m: 12.5 }.validate().unwrap();
        ContourParams { interval_m: 10.0, major_interval_m: 10.0 }.validate().unwrap();
    }

    #[test]
    fn test_spec_validates_present_params_only() {
        let spec = DerivativeSpec {
            hillshade: None,
            contour: Some(ContourParams { interval_m: -5.0, major_interval_m: 50.0 }),
        };
        assert!(spec.validate().is_err());
        assert!(!spec.is_empty());
        assert!(DerivativeSpec::default().is_empty());
    }

    #[test]
    fn test_error_is_recoverable_only_for_generation() {
        let err = HillshadeParams { azimuth: 400.0, ..Default::default() }.validate().unwrap_err();
        assert!(!err.is_recoverable());
        let err = DemError::DerivativeGeneration {
            product: "hillshade",
            reason: "gdaldem exited with 1".into(),
        };
        assert!(err.is_recoverable());
    }
}
