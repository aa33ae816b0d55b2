//! Acquisition followed by the optional hillshade and contour layers.

use crate::derivative::{ContourOutput, DerivativeProducer, DerivativeSpec, HillshadeOutput};
use crate::orchestrator::{AcquisitionReport, ElevationRequest, Orchestrator};
use crate::Result;
use std::path::Path;
use tracing::{info, warn};

/// File name of the hillshade raster inside the output directory.
pub const HILLSHADE_FILE: &str = "hillshade.tif";

/// File name of the contour layer inside the output directory.
pub const CONTOURS_FILE: &str = "contours.shp";

/// Everything a pipeline run produced.
#[derive(Debug)]
pub struct TerrainOutputs {
    /// How the elevation raster was obtained.
    pub acquisition: AcquisitionReport,
    /// Hillshade outcome, if one was requested.
    pub hillshade: Option<Result<HillshadeOutput>>,
    /// Contour outcome, if contours were requested.
    pub contours: Option<Result<ContourOutput>>,
}

impl TerrainOutputs {
    /// Whether every requested derivative was produced.
    pub fn is_complete(&self) -> bool {
        self.hillshade.as_ref().map_or(true, |r| r.is_ok()) && self.contours.as_ref().map_or(true, |r| r.is_ok())
    }
}

/// Runs an [`Orchestrator`] and then a [`DerivativeProducer`] over its
/// product.
#[derive(Debug)]
pub struct TerrainPipeline {
    orchestrator: Orchestrator,
    derivatives: DerivativeProducer,
}

impl TerrainPipeline {
    /// Build a pipeline whose derivatives use the orchestrator's toolkit.
    pub fn new(orchestrator: Orchestrator) -> Self {
        let derivatives = DerivativeProducer::new(orchestrator.toolkit());
        Self {
            orchestrator,
            derivatives,
        }
    }

    /// The underlying orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Acquire elevation, then produce the derivatives in `spec` inside
    /// `output_dir`.
    ///
    /// Invalid derivative parameters fail the run before anything is
    /// fetched. Acquisition errors fail the run. Derivative generation
    /// failures are logged and returned in [`TerrainOutputs`].
    pub fn run(&self, request: &ElevationRequest, spec: &DerivativeSpec, output_dir: &Path) -> Result<TerrainOutputs> {
        spec.validate()?;

        let acquisition = self.orchestrator.acquire_with_report(request)?;
        let raster = acquisition.product.raster_path.as_path();
        if acquisition.product.source_used.is_synthetic() {
            warn!("derivatives will be computed from synthetic terrain");
        }

        let hillshade = spec.hillshade.map(|params| {
            let result = self
                .derivatives
                .make_hillshade(raster, &params, &output_dir.join(HILLSHADE_FILE));
            if let Err(e) = &result {
                warn!(error = %e, "hillshade skipped");
            }
            result
        });

        let contours = spec.contour.map(|params| {
            let result = self
                .derivatives
                .make_contours(raster, &params, &output_dir.join(CONTOURS_FILE));
            if let Err(e) = &result {
                warn!(error = %e, "contours skipped");
            }
            result
        });

        info!(
            source_used = %acquisition.product.source_used,
            hillshade = hillshade.as_ref().is_some_and(|r| r.is_ok()),
            contours = contours.as_ref().is_some_and(|r| r.is_ok()),
            "terrain processing finished"
        );

        Ok(TerrainOutputs {
            acquisition,
            hillshade,
            contours,
        })
    }
}
