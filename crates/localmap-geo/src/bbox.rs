//! Geographic bounding boxes in decimal degrees.

use crate::{GeoError, Result};
use serde::{Deserialize, Serialize};

/// Approximate length of one degree of latitude in kilometres.
const KM_PER_DEGREE: f64 = 111.0;

/// An axis-aligned WGS84 bounding box.
///
/// Always satisfies `north > south` and `east > west`, with latitudes in
/// [-90, 90] and longitudes in [-180, 180]. Boxes crossing the antimeridian
/// are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox", into = "RawBoundingBox")]
pub struct BoundingBox {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

/// Unvalidated form used for (de)serialization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawBoundingBox {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = GeoError;

    fn try_from(raw: RawBoundingBox) -> Result<Self> {
        BoundingBox::new(raw.north, raw.south, raw.east, raw.west)
    }
}

impl From<BoundingBox> for RawBoundingBox {
    fn from(bbox: BoundingBox) -> Self {
        RawBoundingBox {
            north: bbox.north,
            south: bbox.south,
            east: bbox.east,
            west: bbox.west,
        }
    }
}

impl BoundingBox {
    /// Create a validated bounding box.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        let invalid = |reason| GeoError::InvalidBoundingBox {
            north,
            south,
            east,
            west,
            reason,
        };

        if ![north, south, east, west].iter().all(|v| v.is_finite()) {
            return Err(invalid("edges must be finite"));
        }
        if !(-90.0..=90.0).contains(&north) || !(-90.0..=90.0).contains(&south) {
            return Err(invalid("latitude outside [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&east) || !(-180.0..=180.0).contains(&west) {
            return Err(invalid("longitude outside [-180, 180]"));
        }
        if north <= south {
            return Err(invalid("north must be greater than south"));
        }
        if east <= west {
            return Err(invalid("east must be greater than west"));
        }

        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Build a box from edges already known to satisfy the invariants.
    pub(crate) const fn from_edges_unchecked(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// North edge (maximum latitude).
    pub fn north(&self) -> f64 {
        self.north
    }

    /// South edge (minimum latitude).
    pub fn south(&self) -> f64 {
        self.south
    }

    /// East edge (maximum longitude).
    pub fn east(&self) -> f64 {
        self.east
    }

    /// West edge (minimum longitude).
    pub fn west(&self) -> f64 {
        self.west
    }

    /// Extent in degrees of longitude.
    pub fn width_degrees(&self) -> f64 {
        self.east - self.west
    }

    /// Extent in degrees of latitude.
    pub fn height_degrees(&self) -> f64 {
        self.north - self.south
    }

    /// Centre point as (lat, lon).
    pub fn center(&self) -> (f64, f64) {
        (
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }

    /// Check if `other` lies entirely inside this box (edges inclusive).
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.south >= self.south
            && other.north <= self.north
            && other.west >= self.west
            && other.east <= self.east
    }

    /// Check if a point lies inside this box (edges inclusive).
    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    /// Check if the two boxes share any area.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.south < other.north
            && self.north > other.south
            && self.west < other.east
            && self.east > other.west
    }

    /// Grow the box by `buffer_degrees` on every side, clamped to the globe.
    pub fn expand(&self, buffer_degrees: f64) -> Result<Self> {
        if !buffer_degrees.is_finite() || buffer_degrees < 0.0 {
            return Err(GeoError::InvalidBuffer(buffer_degrees));
        }

        Self::new(
            (self.north + buffer_degrees).min(90.0),
            (self.south - buffer_degrees).max(-90.0),
            (self.east + buffer_degrees).min(180.0),
            (self.west - buffer_degrees).max(-180.0),
        )
    }

    /// Grow the box by a distance in kilometres on every side.
    ///
    /// Longitude padding is widened by `1 / cos(mid latitude)` so the buffer
    /// is roughly the same ground distance in both directions.
    pub fn expand_km(&self, buffer_km: f64) -> Result<Self> {
        if !buffer_km.is_finite() || buffer_km < 0.0 {
            return Err(GeoError::InvalidBuffer(buffer_km));
        }

        let (mid_lat, _) = self.center();
        let lat_buffer = buffer_km / KM_PER_DEGREE;
        // Guard the pole where cos() reaches zero
        let cos_lat = mid_lat.to_radians().cos().max(1e-6);
        let lon_buffer = buffer_km / (KM_PER_DEGREE * cos_lat);

        Self::new(
            (self.north + lat_buffer).min(90.0),
            (self.south - lat_buffer).max(-90.0),
            (self.east + lon_buffer).min(180.0),
            (self.west - lon_buffer).max(-180.0),
        )
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "N {:.4} S {:.4} E {:.4} W {:.4}",
            self.north, self.south, self.east, self.west
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lumsden() -> BoundingBox {
        BoundingBox::new(57.37, 57.26, -2.82, -2.95).unwrap()
    }

    #[test]
    fn test_rejects_inverted_edges() {
        assert!(BoundingBox::new(57.0, 58.0, -2.0, -3.0).is_err());
        assert!(BoundingBox::new(58.0, 57.0, -3.0, -2.0).is_err());
        assert!(BoundingBox::new(58.0, 58.0, -2.0, -3.0).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_and_nan() {
        assert!(BoundingBox::new(91.0, 57.0, -2.0, -3.0).is_err());
        assert!(BoundingBox::new(58.0, 57.0, 181.0, -3.0).is_err());
        assert!(BoundingBox::new(f64::NAN, 57.0, -2.0, -3.0).is_err());
    }

    #[test]
    fn test_contains_and_intersects() {
        let uk = BoundingBox::new(61.0, 49.5, 2.0, -8.5).unwrap();
        let tokyo = BoundingBox::new(35.7, 35.6, 139.8, 139.7).unwrap();

        assert!(uk.contains(&lumsden()));
        assert!(!uk.contains(&tokyo));
        assert!(uk.intersects(&lumsden()));
        assert!(!uk.intersects(&tokyo));

        // Straddling the edge intersects but is not contained
        let straddle = BoundingBox::new(50.0, 49.0, -1.0, -2.0).unwrap();
        assert!(uk.intersects(&straddle));
        assert!(!uk.contains(&straddle));
    }

    #[test]
    fn test_expand_degrees() {
        let expanded = lumsden().expand(0.05).unwrap();
        assert_relative_eq!(expanded.north(), 57.42, epsilon = 1e-9);
        assert_relative_eq!(expanded.south(), 57.21, epsilon = 1e-9);
        assert_relative_eq!(expanded.east(), -2.77, epsilon = 1e-9);
        assert_relative_eq!(expanded.west(), -3.00, epsilon = 1e-9);

        assert!(lumsden().expand(-0.1).is_err());
        assert!(lumsden().expand(f64::INFINITY).is_err());
    }

    #[test]
    fn test_expand_clamps_to_globe() {
        let polar = BoundingBox::new(89.99, 89.0, 179.99, 179.0).unwrap();
        let expanded = polar.expand(1.0).unwrap();
        assert_eq!(expanded.north(), 90.0);
        assert_eq!(expanded.east(), 180.0);
    }

    #[test]
    fn test_expand_km_widens_longitude_at_high_latitude() {
        let expanded = lumsden().expand_km(1.0).unwrap();
        let lat_pad = expanded.north() - lumsden().north();
        let lon_pad = expanded.east() - lumsden().east();

        assert_relative_eq!(lat_pad, 1.0 / 111.0, epsilon = 1e-9);
        // cos(57.3°) ≈ 0.54, so longitude padding is almost twice as wide
        assert!(lon_pad > lat_pad * 1.8);
    }

    #[test]
    fn test_serde_validates() {
        let ok: BoundingBox =
            serde_yaml::from_str("{north: 57.37, south: 57.26, east: -2.82, west: -2.95}").unwrap();
        assert_eq!(ok, lumsden());

        let bad: std::result::Result<BoundingBox, _> =
            serde_yaml::from_str("{north: 57.0, south: 58.0, east: -2.82, west: -2.95}");
        assert!(bad.is_err());
    }
}
