//! Single-band elevation rasters in GeoTIFF form.

use crate::{DemError, Result};
use localmap_geo::BoundingBox;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// ModelPixelScaleTag.
const TAG_MODEL_PIXEL_SCALE: Tag = Tag::Unknown(33550);
/// ModelTiepointTag.
const TAG_MODEL_TIEPOINT: Tag = Tag::Unknown(33922);
/// GeoKeyDirectoryTag.
const TAG_GEO_KEY_DIRECTORY: Tag = Tag::Unknown(34735);
/// GDAL_NODATA, stored as ASCII.
const TAG_GDAL_NODATA: Tag = Tag::Unknown(42113);

/// GeoKey directory declaring geographic WGS 84 (EPSG:4326), pixel-is-area.
const WGS84_GEO_KEYS: [u16; 16] = [
    1, 1, 0, 3, // version 1.1.0, three keys
    1024, 0, 1, 2, // GTModelType = Geographic
    1025, 0, 1, 1, // GTRasterType = PixelIsArea
    2048, 0, 1, 4326, // GeographicType = WGS 84
];

/// Metres per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Directory a file will be written into; `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// An elevation grid with its georeferencing.
#[derive(Debug, Clone)]
pub struct ElevationRaster {
    /// Elevation samples in row-major order (north to south, west to east).
    data: Vec<f32>,
    width: u32,
    height: u32,
    bounds: BoundingBox,
    no_data_value: Option<f32>,
}

impl ElevationRaster {
    /// Wrap an in-memory grid.
    pub fn from_parts(
        data: Vec<f32>,
        width: u32,
        height: u32,
        bounds: BoundingBox,
        no_data_value: Option<f32>,
    ) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width as usize * height as usize {
            return Err(DemError::InvalidRequest(format!(
                "raster of {}x{} cannot hold {} samples",
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            bounds,
            no_data_value,
        })
    }

    /// Load a raster from a GeoTIFF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path)?);
        let mut decoder = Decoder::new(file)?;

        // A 1° tile at 1 arc-second is 3601 x 3601 f32 samples, about 52 MB
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024;
        limits.intermediate_buffer_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        let (width, height) = decoder.dimensions()?;
        let bounds = Self::read_georeference(&mut decoder, width, height, path)?;
        let no_data_value = Self::read_nodata_value(&mut decoder);
        let data = Self::decode_elevation_data(&mut decoder)?;

        if data.len() != width as usize * height as usize {
            return Err(DemError::InvalidGeoTiff {
                path: path.to_path_buf(),
                reason: "only single-band rasters are supported".to_string(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
            bounds,
            no_data_value,
        })
    }

    /// Read bounds from ModelTiepoint and ModelPixelScale.
    fn read_georeference<R: Read + Seek>(
        decoder: &mut Decoder<R>,
        width: u32,
        height: u32,
        path: &Path,
    ) -> Result<BoundingBox> {
        let invalid = |reason: &str| DemError::InvalidGeoTiff {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let tiepoint = decoder
            .get_tag_f64_vec(TAG_MODEL_TIEPOINT)
            .map_err(|_| invalid("missing ModelTiepoint tag"))?;
        let scale = decoder
            .get_tag_f64_vec(TAG_MODEL_PIXEL_SCALE)
            .map_err(|_| invalid("missing ModelPixelScale tag"))?;
        if tiepoint.len() < 6 || scale.len() < 2 {
            return Err(invalid("truncated georeferencing tags"));
        }

        // Tiepoint is [i, j, k, x, y, z]; the raster runs south and east from it
        let west = tiepoint[3] - tiepoint[0] * scale[0];
        let north = tiepoint[4] + tiepoint[1] * scale[1];
        let east = west + width as f64 * scale[0];
        let south = north - height as f64 * scale[1];

        BoundingBox::new(north, south, east, west)
            .map_err(|e| invalid(&format!("georeferenced extent is not a valid box: {}", e)))
    }

    fn decode_elevation_data<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
        let result = decoder.read_image()?;

        match result {
            DecodingResult::F32(data) => Ok(data),
            DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        }
    }

    fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
        decoder
            .get_tag_ascii_string(TAG_GDAL_NODATA)
            .ok()
            .and_then(|s| s.trim_end_matches('\0').trim().parse().ok())
    }

    /// Write as a Float32 GeoTIFF in EPSG:4326.
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let (x_res, y_res) = self.resolution();
        let mut encoder = TiffEncoder::new(writer)?;
        let mut image = encoder.new_image::<colortype::Gray32Float>(self.width, self.height)?;

        image
            .encoder()
            .write_tag(TAG_MODEL_PIXEL_SCALE, &[x_res, y_res, 0.0][..])?;
        image.encoder().write_tag(
            TAG_MODEL_TIEPOINT,
            &[0.0, 0.0, 0.0, self.bounds.west(), self.bounds.north(), 0.0][..],
        )?;
        image
            .encoder()
            .write_tag(TAG_GEO_KEY_DIRECTORY, &WGS84_GEO_KEYS[..])?;
        if let Some(nodata) = self.no_data_value {
            image
                .encoder()
                .write_tag(TAG_GDAL_NODATA, nodata.to_string().as_str())?;
        }

        image.write_data(&self.data)?;
        Ok(())
    }

    /// Write to a file path, replacing any existing file.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write through a hidden sibling file renamed onto `path`, so `path`
    /// either holds the complete raster or is untouched.
    pub fn write_atomic<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = parent_dir(path);
        std::fs::create_dir_all(dir)?;

        let mut part = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tif.part")
            .tempfile_in(dir)?;
        {
            let mut writer = BufWriter::new(part.as_file_mut());
            self.write_to(&mut writer)?;
            writer.flush()?;
        }
        part.as_file().sync_all()?;
        part.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Elevation at a geographic coordinate, bilinearly interpolated between
    /// the four surrounding samples.
    pub fn elevation_at(&self, lat: f64, lon: f64) -> Result<f32> {
        self.check_bounds(lat, lon)?;

        let (x, y) = self.pixel_coords(lat, lon);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let v00 = self.sample(x0, y0, lat, lon)?;
        let v10 = self.sample(x1, y0, lat, lon)?;
        let v01 = self.sample(x0, y1, lat, lon)?;
        let v11 = self.sample(x1, y1, lat, lon)?;

        let elevation = v00 as f64 * (1.0 - fx) * (1.0 - fy)
            + v10 as f64 * fx * (1.0 - fy)
            + v01 as f64 * (1.0 - fx) * fy
            + v11 as f64 * fx * fy;

        Ok(elevation as f32)
    }

    /// Elevation of the sample nearest a geographic coordinate.
    pub fn elevation_nearest(&self, lat: f64, lon: f64) -> Result<f32> {
        self.check_bounds(lat, lon)?;
        let (x, y) = self.pixel_coords(lat, lon);
        self.sample(x.round() as u32, y.round() as u32, lat, lon)
    }

    fn check_bounds(&self, lat: f64, lon: f64) -> Result<()> {
        if self.bounds.contains_point(lat, lon) {
            return Ok(());
        }
        Err(DemError::OutOfBounds {
            lat,
            lon,
            min_lat: self.bounds.south(),
            max_lat: self.bounds.north(),
            min_lon: self.bounds.west(),
            max_lon: self.bounds.east(),
        })
    }

    /// Fractional sample coordinates; row 0 is the north edge.
    fn pixel_coords(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = ((lon - self.bounds.west()) / self.bounds.width_degrees()) * (self.width - 1) as f64;
        let y = ((self.bounds.north() - lat) / self.bounds.height_degrees()) * (self.height - 1) as f64;
        (x, y)
    }

    fn sample(&self, x: u32, y: u32, lat: f64, lon: f64) -> Result<f32> {
        let value = self.data[(y * self.width + x) as usize];
        if self.is_no_data(value) {
            return Err(DemError::NoData { lat, lon });
        }
        Ok(value)
    }

    fn is_no_data(&self, value: f32) -> bool {
        value.is_nan()
            || self
                .no_data_value
                .is_some_and(|nodata| (value - nodata).abs() < 0.001)
    }

    /// Smallest and largest valid samples, or `None` if every sample is
    /// no-data.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| !self.is_no_data(*v))
            .fold(None, |range, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Geographic extent.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Size in pixels, `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw samples, row-major from the north-west corner.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// No-data marker, if any.
    pub fn no_data_value(&self) -> Option<f32> {
        self.no_data_value
    }

    /// Pixel size in degrees, `(lon, lat)`.
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.bounds.width_degrees() / self.width as f64,
            self.bounds.height_degrees() / self.height as f64,
        )
    }

    /// Approximate pixel size in metres at the centre of the raster.
    pub fn resolution_meters(&self) -> (f64, f64) {
        let (lon_deg, lat_deg) = self.resolution();
        let (center_lat, _) = self.bounds.center();
        (
            lon_deg * METERS_PER_DEGREE * center_lat.to_radians().cos(),
            lat_deg * METERS_PER_DEGREE,
        )
    }
}
