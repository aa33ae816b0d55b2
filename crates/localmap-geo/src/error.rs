//! Error types for the geography crate.

use thiserror::Error;

/// Errors raised by bounding box validation and source resolution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    /// Bounding box edges are not finite, out of range, or inverted.
    #[error("Invalid bounding box (N {north}, S {south}, E {east}, W {west}): {reason}")]
    InvalidBoundingBox {
        /// North edge in degrees.
        north: f64,
        /// South edge in degrees.
        south: f64,
        /// East edge in degrees.
        east: f64,
        /// West edge in degrees.
        west: f64,
        /// What is wrong with the edges.
        reason: &'static str,
    },

    /// Edge buffer is negative or not finite.
    #[error("Invalid edge buffer {0} (must be finite and non-negative)")]
    InvalidBuffer(f64),

    /// Grid cell size cannot be laid over the globe in whole-degree cells.
    #[error("Invalid cell size {cell_degrees}° for source '{name}' (must be a whole number of degrees dividing 90)")]
    InvalidCellSize {
        /// Source name.
        name: String,
        /// Offending cell size.
        cell_degrees: f64,
    },

    /// Source name is not present in the registry.
    #[error("Unknown elevation source '{name}' (known sources: {})", known.join(", "))]
    UnknownSource {
        /// Requested source name.
        name: String,
        /// Names the registry does know about.
        known: Vec<String>,
    },

    /// The requested source does not cover the area and no global source exists.
    #[error("Elevation source '{name}' does not cover the requested area and no global source is registered")]
    NoApplicableSource {
        /// Requested source name.
        name: String,
    },
}
