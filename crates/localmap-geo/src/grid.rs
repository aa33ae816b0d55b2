//! Tile grid math: which cells a source publishes for a bounding box, and
//! how those cells are named and addressed.
//!
//! Cells are identified by the whole-degree latitude and longitude of their
//! south-west corner, so with 1° cells the cell `(57, -3)` covers latitude
//! 57°N to 58°N and longitude 3°W to 2°W and is published by SRTM as
//! `N57W003.hgt`. With 5° cells the neighbour to the north is `(62, -3)`.

use crate::{BoundingBox, SourceDescriptor, SourceKind, TileNaming, Result};
use std::collections::BTreeSet;
use std::fmt;

/// One grid cell of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    /// Source publishing this tile.
    pub source: SourceKind,
    /// Latitude of the south-west corner, in whole degrees.
    pub lat_cell: i32,
    /// Longitude of the south-west corner, in whole degrees.
    pub lon_cell: i32,
}

impl TileId {
    /// Create a tile identifier.
    pub fn new(source: SourceKind, lat_cell: i32, lon_cell: i32) -> Self {
        Self {
            source,
            lat_cell,
            lon_cell,
        }
    }

    /// Name of the publishing source.
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Corner label such as `N57W003` or `S10E015`.
    pub fn corner_label(&self) -> String {
        let lat_prefix = if self.lat_cell >= 0 { 'N' } else { 'S' };
        let lon_prefix = if self.lon_cell >= 0 { 'E' } else { 'W' };
        format!(
            "{}{:02}{}{:03}",
            lat_prefix,
            self.lat_cell.unsigned_abs(),
            lon_prefix,
            self.lon_cell.unsigned_abs()
        )
    }

    /// File name under the given naming convention.
    pub fn file_name(&self, naming: TileNaming) -> String {
        let label = self.corner_label();
        match naming {
            TileNaming::Hgt => format!("{}.hgt", label),
            TileNaming::AsterGdem => format!("ASTGTMV003_{}_dem.tif", label),
            TileNaming::GeoTiff => format!("{}.tif", label),
        }
    }

    /// File name under the source's own naming convention.
    pub fn published_file_name(&self) -> String {
        self.file_name(self.source.tile_naming())
    }

    /// Parse a file name produced by [`TileId::published_file_name`].
    pub fn from_file_name(source: SourceKind, file_name: &str) -> Option<Self> {
        let label = match source.tile_naming() {
            TileNaming::Hgt => file_name.strip_suffix(".hgt")?,
            TileNaming::AsterGdem => file_name
                .strip_prefix("ASTGTMV003_")?
                .strip_suffix("_dem.tif")?,
            TileNaming::GeoTiff => file_name.strip_suffix(".tif")?,
        };
        let (lat_cell, lon_cell) = parse_corner_label(label)?;
        Some(Self::new(source, lat_cell, lon_cell))
    }

    /// Geographic extent of the cell.
    pub fn cell_bounds(&self, cell_degrees: f64) -> BoundingBox {
        let south = self.lat_cell as f64;
        let west = self.lon_cell as f64;
        BoundingBox::from_edges_unchecked(
            (south + cell_degrees).min(90.0),
            south,
            (west + cell_degrees).min(180.0),
            west,
        )
    }

    /// Expand the source's mirror templates for this tile, in mirror order.
    pub fn mirror_urls(&self, source: &SourceDescriptor) -> Vec<String> {
        let file = self.file_name(source.tile_naming);
        let stem = file
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| file.clone());
        let bounds = self.cell_bounds(source.cell_degrees);

        source
            .mirror_urls
            .iter()
            .map(|template| {
                template
                    .replace("{file}", &file)
                    .replace("{stem}", &stem)
                    .replace("{south}", &bounds.south().to_string())
                    .replace("{north}", &bounds.north().to_string())
                    .replace("{west}", &bounds.west().to_string())
                    .replace("{east}", &bounds.east().to_string())
            })
            .collect()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source.name(), self.corner_label())
    }
}

/// Enumerate every cell of `source` touched by `bbox` grown by `buffer_degrees`.
///
/// Each edge is mapped to the cell containing it with `floor`, so a cell
/// that only touches the buffered box on its boundary is included. The
/// result is never empty for a valid box.
pub fn tiles_for(
    bbox: &BoundingBox,
    buffer_degrees: f64,
    source: &SourceDescriptor,
) -> Result<BTreeSet<TileId>> {
    source.validate()?;
    let expanded = bbox.expand(buffer_degrees)?;
    let cell = source.cell_degrees;
    let step = cell as i32;

    let (lat_min, lat_max) = cell_range(expanded.south(), expanded.north(), cell, 90.0);
    let (lon_min, lon_max) = cell_range(expanded.west(), expanded.east(), cell, 180.0);

    let mut tiles = BTreeSet::new();
    for lat_index in lat_min..=lat_max {
        for lon_index in lon_min..=lon_max {
            tiles.insert(TileId::new(source.kind, lat_index * step, lon_index * step));
        }
    }

    Ok(tiles)
}

/// Parse `N57W003` into `(57, -3)`.
fn parse_corner_label(label: &str) -> Option<(i32, i32)> {
    if label.len() != 7 || !label.is_ascii() {
        return None;
    }
    let lat_sign = match &label[0..1] {
        "N" => 1,
        "S" => -1,
        _ => return None,
    };
    let lon_sign = match &label[3..4] {
        "E" => 1,
        "W" => -1,
        _ => return None,
    };
    let lat: i32 = label[1..3].parse().ok()?;
    let lon: i32 = label[4..7].parse().ok()?;
    Some((lat_sign * lat, lon_sign * lon))
}

/// Inclusive cell index range for `[low, high]`, clamped to `[-limit, limit)`.
fn cell_range(low: f64, high: f64, cell: f64, limit: f64) -> (i32, i32) {
    let first_cell = (-limit / cell).floor() as i32;
    let last_cell = (limit / cell).ceil() as i32 - 1;

    let start = ((low / cell).floor() as i32).clamp(first_cell, last_cell);
    let end = ((high / cell).floor() as i32).clamp(start, last_cell);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lumsden() -> BoundingBox {
        BoundingBox::new(57.37, 57.26, -2.82, -2.95).unwrap()
    }

    #[test]
    fn test_corner_labels() {
        assert_eq!(TileId::new(SourceKind::Srtm, 57, -3).corner_label(), "N57W003");
        assert_eq!(TileId::new(SourceKind::Srtm, -11, 15).corner_label(), "S11E015");
        assert_eq!(TileId::new(SourceKind::Srtm, 0, 0).corner_label(), "N00E000");
        assert_eq!(TileId::new(SourceKind::Srtm, -1, -1).corner_label(), "S01W001");
    }

    #[test]
    fn test_file_names() {
        let tile = TileId::new(SourceKind::Srtm, 57, -3);
        assert_eq!(tile.file_name(TileNaming::Hgt), "N57W003.hgt");
        assert_eq!(tile.file_name(TileNaming::AsterGdem), "ASTGTMV003_N57W003_dem.tif");
        assert_eq!(tile.file_name(TileNaming::GeoTiff), "N57W003.tif");
    }

    #[test]
    fn test_file_name_parses_back() {
        for source in SourceKind::ALL {
            for (lat, lon) in [(57, -3), (-11, 15), (0, 0), (-1, -179)] {
                let tile = TileId::new(source, lat, lon);
                assert_eq!(TileId::from_file_name(source, &tile.published_file_name()), Some(tile));
            }
        }
        assert_eq!(TileId::from_file_name(SourceKind::Srtm, "N57W003.tif"), None);
        assert_eq!(TileId::from_file_name(SourceKind::Srtm, ".N57W003.hgt"), None);
        assert_eq!(TileId::from_file_name(SourceKind::Srtm, "X57W003.hgt"), None);
    }

    #[test]
    fn test_lumsden_tiles() {
        let tiles = tiles_for(&lumsden(), 0.05, &SourceDescriptor::srtm()).unwrap();
        // Buffered west edge sits on 3°W, so the neighbouring cell may touch
        assert!(tiles.contains(&TileId::new(SourceKind::Srtm, 57, -3)));
        assert!(tiles.len() <= 2);
        assert!(tiles.iter().all(|t| t.lat_cell == 57));
    }

    #[test]
    fn test_boundary_touching_cell_included() {
        let bbox = BoundingBox::new(57.5, 57.25, -2.5, -3.0).unwrap();
        let tiles = tiles_for(&bbox, 0.0, &SourceDescriptor::srtm()).unwrap();
        let cells: Vec<_> = tiles.iter().map(|t| (t.lat_cell, t.lon_cell)).collect();
        assert_eq!(cells, vec![(57, -3)]);

        let bbox = BoundingBox::new(58.0, 57.5, -2.5, -2.75).unwrap();
        let tiles = tiles_for(&bbox, 0.0, &SourceDescriptor::srtm()).unwrap();
        let cells: Vec<_> = tiles.iter().map(|t| (t.lat_cell, t.lon_cell)).collect();
        assert_eq!(cells, vec![(57, -3), (58, -3)]);
    }

    #[test]
    fn test_unbuffered_box_inside_one_cell() {
        let tiles = tiles_for(&lumsden(), 0.0, &SourceDescriptor::srtm()).unwrap();
        assert_eq!(tiles.len(), 1);
        let tile = tiles.iter().next().unwrap();
        assert_eq!((tile.lat_cell, tile.lon_cell), (57, -3));
    }

    #[test]
    fn test_box_spanning_four_cells() {
        let bbox = BoundingBox::new(48.2, 47.8, -121.9, -122.1).unwrap();
        let tiles = tiles_for(&bbox, 0.0, &SourceDescriptor::srtm()).unwrap();
        let cells: Vec<_> = tiles.iter().map(|t| (t.lat_cell, t.lon_cell)).collect();
        assert_eq!(cells, vec![(47, -123), (47, -122), (48, -123), (48, -122)]);
    }

    #[test]
    fn test_cells_cover_buffered_box() {
        let boxes = [
            lumsden(),
            BoundingBox::new(0.5, -0.5, 0.5, -0.5).unwrap(),
            BoundingBox::new(-33.8, -34.1, 151.3, 150.9).unwrap(),
            BoundingBox::new(3.0, 1.0, 4.0, 2.0).unwrap(),
        ];
        let source = SourceDescriptor::srtm();

        for bbox in boxes {
            let buffered = bbox.expand(0.05).unwrap();
            let tiles = tiles_for(&bbox, 0.05, &source).unwrap();
            assert!(!tiles.is_empty());

            let south = tiles.iter().map(|t| t.cell_bounds(1.0).south()).fold(f64::MAX, f64::min);
            let north = tiles.iter().map(|t| t.cell_bounds(1.0).north()).fold(f64::MIN, f64::max);
            let west = tiles.iter().map(|t| t.cell_bounds(1.0).west()).fold(f64::MAX, f64::min);
            let east = tiles.iter().map(|t| t.cell_bounds(1.0).east()).fold(f64::MIN, f64::max);

            assert!(south <= buffered.south() && north >= buffered.north(), "{}", bbox);
            assert!(west <= buffered.west() && east >= buffered.east(), "{}", bbox);
        }
    }

    #[test]
    fn test_grid_clamped_at_poles_and_antimeridian() {
        let bbox = BoundingBox::new(90.0, 89.5, 180.0, 179.5).unwrap();
        let tiles = tiles_for(&bbox, 0.0, &SourceDescriptor::srtm()).unwrap();
        let cells: Vec<_> = tiles.iter().map(|t| (t.lat_cell, t.lon_cell)).collect();
        assert_eq!(cells, vec![(89, 179)]);
    }

    #[test]
    fn test_mirror_url_expansion() {
        let tile = TileId::new(SourceKind::Srtm, 57, -3);
        let urls = tile.mirror_urls(&SourceDescriptor::srtm());
        assert_eq!(urls.len(), 3);
        assert_eq!(
            urls[0],
            "https://cloud.sdsc.edu/v1/datasetsearch/download/SRTM_GL1/N57W003.hgt"
        );
        assert!(urls[1].contains("south=57&north=58&west=-3&east=-2"));
        assert!(urls[2].ends_with("/N57W003.tif"));
    }

    #[test]
    fn test_no_mirrors_for_region_sources() {
        let tile = TileId::new(SourceKind::OsTerrain, 57, -3);
        assert!(tile.mirror_urls(&SourceDescriptor::os_terrain()).is_empty());
    }

    #[test]
    fn test_coarse_cells_named_by_corner_degrees() {
        let mut coarse = SourceDescriptor::srtm();
        coarse.cell_degrees = 5.0;
        let bbox = BoundingBox::new(61.0, 57.26, -2.82, -2.95).unwrap();
        let tiles = tiles_for(&bbox, 0.0, &coarse).unwrap();
        let labels: Vec<_> = tiles.iter().map(|t| t.corner_label()).collect();
        assert_eq!(labels, vec!["N55W005", "N60W005"]);

        let bounds = tiles.iter().next().unwrap().cell_bounds(5.0);
        assert_eq!((bounds.south(), bounds.north()), (55.0, 60.0));
        assert_eq!((bounds.west(), bounds.east()), (-5.0, 0.0));
    }

    #[test]
    fn test_zero_cell_size_rejected() {
        let mut broken = SourceDescriptor::srtm();
        broken.cell_degrees = 0.0;
        assert!(matches!(
            tiles_for(&lumsden(), 0.0, &broken),
            Err(crate::GeoError::InvalidCellSize { .. })
        ));
    }
}
