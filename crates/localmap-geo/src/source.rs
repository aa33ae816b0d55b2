//! Elevation source registry, applicability checks and source resolution.
//!
//! The registry is a closed set of [`SourceKind`]s, each described once by a
//! [`SourceDescriptor`]. Region-restricted sources only serve boxes that lie
//! entirely inside their coverage rectangle; when a caller asks for one
//! outside its territory the resolver substitutes the first global source in
//! registry order.

use crate::{BoundingBox, GeoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// UK coverage of OS Terrain 50.
const UK_COVERAGE: BoundingBox = BoundingBox::from_edges_unchecked(61.0, 49.5, 2.0, -8.5);

/// European coverage of EU-DEM.
const EUROPE_COVERAGE: BoundingBox = BoundingBox::from_edges_unchecked(72.0, 34.0, 45.0, -25.0);

/// The elevation sources this crate knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// NASA Shuttle Radar Topography Mission, 1 arc-second.
    Srtm,
    /// ASTER Global DEM version 3.
    Aster,
    /// Ordnance Survey Terrain 50 (Great Britain).
    OsTerrain,
    /// Copernicus EU-DEM.
    EuDem,
}

impl SourceKind {
    /// All kinds, in built-in registry order.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Srtm,
        SourceKind::Aster,
        SourceKind::OsTerrain,
        SourceKind::EuDem,
    ];

    /// Canonical lowercase name used in configuration and cache paths.
    pub const fn name(&self) -> &'static str {
        match self {
            SourceKind::Srtm => "srtm",
            SourceKind::Aster => "aster",
            SourceKind::OsTerrain => "os_terrain",
            SourceKind::EuDem => "eu_dem",
        }
    }

    /// File naming convention the source publishes tiles under.
    pub const fn tile_naming(&self) -> TileNaming {
        match self {
            SourceKind::Srtm => TileNaming::Hgt,
            SourceKind::Aster => TileNaming::AsterGdem,
            SourceKind::OsTerrain | SourceKind::EuDem => TileNaming::GeoTiff,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceKind {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| GeoError::UnknownSource {
                name: s.to_string(),
                known: SourceKind::ALL.iter().map(|k| k.name().to_string()).collect(),
            })
    }
}

/// Where a source publishes data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coverage {
    /// Available everywhere.
    Global,
    /// Only available inside the given rectangle.
    Region(BoundingBox),
}

/// How a source names its tile files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileNaming {
    /// SRTM height files, e.g. `N57W003.hgt`.
    Hgt,
    /// ASTER GDEM v3 GeoTIFFs, e.g. `ASTGTMV003_N57W003_dem.tif`.
    AsterGdem,
    /// Plain GeoTIFFs named after the south-west corner, e.g. `N57W003.tif`.
    GeoTiff,
}

/// Static description of one elevation source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    /// Which source this is.
    pub kind: SourceKind,
    /// Native ground resolution in metres.
    pub native_resolution_m: f64,
    /// Geographic applicability.
    pub coverage: Coverage,
    /// Mirror URL templates, tried in order.
    ///
    /// Templates may use `{file}`, `{stem}`, `{south}`, `{north}`, `{west}`
    /// and `{east}`; see [`TileId::mirror_urls`](crate::TileId::mirror_urls).
    pub mirror_urls: Vec<String>,
    /// Tile file naming convention.
    pub tile_naming: TileNaming,
    /// Size of one grid cell in degrees.
    pub cell_degrees: f64,
}

impl SourceDescriptor {
    /// Create a descriptor with 1° cells, the kind's tile naming and no mirrors.
    pub fn new(kind: SourceKind, native_resolution_m: f64, coverage: Coverage) -> Self {
        Self {
            kind,
            native_resolution_m,
            coverage,
            mirror_urls: Vec::new(),
            tile_naming: kind.tile_naming(),
            cell_degrees: 1.0,
        }
    }

    /// Replace the mirror list.
    pub fn with_mirrors<I, S>(mut self, mirrors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mirror_urls = mirrors.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the coverage.
    pub fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = coverage;
        self
    }

    /// Source name (same as the kind's name).
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Check the grid geometry.
    ///
    /// Cells are named after their whole-degree south-west corner and must
    /// tile the globe exactly, so the cell size has to be a whole number of
    /// degrees dividing 90.
    pub fn validate(&self) -> Result<()> {
        let cell = self.cell_degrees;
        if cell.is_finite() && cell >= 1.0 && cell.fract() == 0.0 && 90.0 % cell == 0.0 {
            Ok(())
        } else {
            Err(GeoError::InvalidCellSize {
                name: self.name().to_string(),
                cell_degrees: cell,
            })
        }
    }

    /// Whether this source is available everywhere.
    pub fn is_global(&self) -> bool {
        matches!(self.coverage, Coverage::Global)
    }

    /// SRTM GL1 via SDSC, OpenTopography and CGIAR.
    pub fn srtm() -> Self {
        Self::new(SourceKind::Srtm, 30.0, Coverage::Global).with_mirrors([
            "https://cloud.sdsc.edu/v1/datasetsearch/download/SRTM_GL1/{file}",
            "https://opentopography.org/API/globaldem?demtype=SRTM_GL1&south={south}&north={north}&west={west}&east={east}&outputFormat=GTiff",
            "https://srtm.csi.cgiar.org/wp-content/uploads/files/srtm_5x5/TIFF/{stem}.tif",
        ])
    }

    /// ASTER GDEM v3 via LP DAAC and OpenTopography.
    pub fn aster() -> Self {
        Self::new(SourceKind::Aster, 30.0, Coverage::Global).with_mirrors([
            "https://e4ftl01.cr.usgs.gov/ASTT/ASTGTM.003/2000.03.01/{file}",
            "https://opentopography.org/API/globaldem?demtype=ASTER30&south={south}&north={north}&west={west}&east={east}&outputFormat=GTiff",
        ])
    }

    /// OS Terrain 50. There is no public per-tile mirror, so acquisition
    /// reaches real data through the global source.
    pub fn os_terrain() -> Self {
        Self::new(SourceKind::OsTerrain, 50.0, Coverage::Region(UK_COVERAGE))
    }

    /// EU-DEM. Like OS Terrain it has no public per-tile mirror.
    pub fn eu_dem() -> Self {
        Self::new(SourceKind::EuDem, 25.0, Coverage::Region(EUROPE_COVERAGE))
    }
}

/// Check whether `source` can serve the whole of `bbox`.
pub fn applicable(source: &SourceDescriptor, bbox: &BoundingBox) -> bool {
    match &source.coverage {
        Coverage::Global => true,
        Coverage::Region(region) => region.contains(bbox),
    }
}

/// Outcome of resolving a requested source against a bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSource<'a> {
    /// The source acquisition should use.
    pub source: &'a SourceDescriptor,
    /// The originally requested source, if it was replaced.
    pub substituted_from: Option<SourceKind>,
}

impl ResolvedSource<'_> {
    /// Whether the requested source was downgraded to a global one.
    pub fn is_substitution(&self) -> bool {
        self.substituted_from.is_some()
    }
}

/// Ordered, read-only set of source descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRegistry {
    sources: Vec<SourceDescriptor>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SourceRegistry {
    /// The built-in registry: srtm, aster, os_terrain, eu_dem.
    pub fn builtin() -> Self {
        Self::from_descriptors(vec![
            SourceDescriptor::srtm(),
            SourceDescriptor::aster(),
            SourceDescriptor::os_terrain(),
            SourceDescriptor::eu_dem(),
        ])
    }

    /// Build a registry from caller-supplied descriptors, keeping their order.
    ///
    /// Later duplicates of a kind are ignored. Fails if any descriptor has
    /// an unusable cell size.
    pub fn new(descriptors: Vec<SourceDescriptor>) -> Result<Self> {
        for descriptor in &descriptors {
            descriptor.validate()?;
        }
        Ok(Self::from_descriptors(descriptors))
    }

    fn from_descriptors(descriptors: Vec<SourceDescriptor>) -> Self {
        let mut sources: Vec<SourceDescriptor> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if sources.iter().any(|s| s.kind == descriptor.kind) {
                warn!(source = descriptor.name(), "duplicate source descriptor ignored");
                continue;
            }
            sources.push(descriptor);
        }
        Self { sources }
    }

    /// All descriptors in registry order.
    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    /// Look up a descriptor by kind.
    pub fn get(&self, kind: SourceKind) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.kind == kind)
    }

    /// Look up a descriptor by name.
    pub fn lookup(&self, name: &str) -> Result<&SourceDescriptor> {
        let unknown = || GeoError::UnknownSource {
            name: name.to_string(),
            known: self.sources.iter().map(|s| s.name().to_string()).collect(),
        };
        let kind: SourceKind = name.parse().map_err(|_| unknown())?;
        self.get(kind).ok_or_else(unknown)
    }

    /// The first global source in registry order.
    pub fn global_fallback(&self) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.is_global())
    }

    /// Global sources after `exclude`, in registry order.
    ///
    /// Used to pick a substitute once a source has failed to deliver.
    pub fn global_alternatives(&self, exclude: SourceKind) -> impl Iterator<Item = &SourceDescriptor> + '_ {
        self.sources
            .iter()
            .filter(move |s| s.is_global() && s.kind != exclude)
    }

    /// Resolve `requested` for `bbox`, substituting the global fallback when
    /// the requested source does not cover the box.
    pub fn resolve(&self, requested: &str, bbox: &BoundingBox) -> Result<ResolvedSource<'_>> {
        let source = self.lookup(requested)?;

        if applicable(source, bbox) {
            debug!(source = source.name(), %bbox, "requested source is applicable");
            return Ok(ResolvedSource {
                source,
                substituted_from: None,
            });
        }

        let fallback = self
            .global_fallback()
            .ok_or_else(|| GeoError::NoApplicableSource {
                name: requested.to_string(),
            })?;

        warn!(
            requested = source.name(),
            substitute = fallback.name(),
            %bbox,
            "requested source does not cover the area, substituting global source"
        );

        Ok(ResolvedSource {
            source: fallback,
            substituted_from: Some(source.kind),
        })
    }
}
