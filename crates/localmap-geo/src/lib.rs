//! # localmap-geo
//!
//! Geography for terrain acquisition: bounding boxes, the elevation source
//! registry and the tile grid each source publishes.
//!
//! Nothing in this crate touches the network or the filesystem. It answers
//! three questions for the acquisition pipeline:
//!
//! - Can a source serve a bounding box? ([`applicable`])
//! - Which source should be used instead if not? ([`SourceRegistry::resolve`])
//! - Which tiles does that source publish for the box? ([`tiles_for`])
//!
//! ## Example
//!
//! ```
//! use localmap_geo::{tiles_for, BoundingBox, SourceKind, SourceRegistry};
//!
//! let registry = SourceRegistry::builtin();
//! let bbox = BoundingBox::new(35.7, 35.6, 139.8, 139.7)?;
//!
//! // OS Terrain only covers Great Britain, so Tokyo falls back to SRTM
//! let resolved = registry.resolve("os_terrain", &bbox)?;
//! assert_eq!(resolved.source.kind, SourceKind::Srtm);
//!
//! let tiles = tiles_for(&bbox, 0.05, resolved.source)?;
//! assert_eq!(tiles.len(), 1);
//! # Ok::<(), localmap_geo::GeoError>(())
//! ```

mod bbox;
mod error;
mod grid;
mod source;

pub use bbox::BoundingBox;
pub use error::GeoError;
pub use grid::{tiles_for, TileId};
pub use source::{
    applicable, Coverage, ResolvedSource, SourceDescriptor, SourceKind, SourceRegistry, TileNaming,
};

/// Result type for geography operations.
pub type Result<T> = std::result::Result<T, GeoError>;
