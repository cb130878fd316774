//! Georeferenced multi-band raster and the sampling seam used by the extractor.
//!
//! TIFF storage order: row 0 = northernmost. The world file gives the centre of
//! the upper-left pixel and the pixel size (negative in y for north-up images).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::debug;

use crate::error::{Error, Result};

/// GDAL's private TIFF tag holding the no-data value as ASCII.
const GDAL_NODATA_TAG: u16 = 42113;

/// Raster-sampling service: band values at a map location.
pub trait RasterSampler {
    fn band_count(&self) -> usize;

    /// One entry per band. Locations outside the extent yield all `None`;
    /// no-data cells yield `None` for the affected band.
    fn sample(&self, x: f64, y: f64) -> Result<Vec<Option<f64>>>;
}

/// North-up affine transform: upper-left corner and pixel size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Negative for north-up rasters.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Parse an ESRI world file (six lines: A, D, B, E, C, F).
    pub fn from_world_file(text: &str) -> Result<Self> {
        let values: Vec<f64> = text
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::input(format!("world file: {e}")))?;
        let [a, d, b, e, c, f] = values[..] else {
            return Err(Error::input(format!(
                "world file needs 6 values, found {}",
                values.len()
            )));
        };
        if d != 0.0 || b != 0.0 {
            return Err(Error::input("rotated rasters are not supported"));
        }
        if a == 0.0 || e == 0.0 {
            return Err(Error::input("world file has a zero pixel size"));
        }
        // C/F address the centre of the upper-left pixel.
        Ok(Self {
            origin_x: c - a / 2.0,
            origin_y: f - e / 2.0,
            pixel_width: a,
            pixel_height: e,
        })
    }

    /// (row, col) of the cell containing (x, y), unbounded.
    fn cell(&self, x: f64, y: f64) -> (f64, f64) {
        let col = ((x - self.origin_x) / self.pixel_width).floor();
        let row = ((y - self.origin_y) / self.pixel_height).floor();
        (row, col)
    }
}

/// Band-separated raster held in memory, read-only once loaded.
#[derive(Debug, Clone)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    /// `bands[b][row * width + col]`.
    pub bands: Vec<Vec<f32>>,
    pub transform: GeoTransform,
    pub nodata: Option<f32>,
}

impl RasterGrid {
    pub fn new(
        width: usize,
        height: usize,
        bands: Vec<Vec<f32>>,
        transform: GeoTransform,
        nodata: Option<f32>,
    ) -> Result<Self> {
        if width == 0 || height == 0 || bands.is_empty() {
            return Err(Error::input("raster is empty"));
        }
        if let Some(b) = bands.iter().position(|b| b.len() != width * height) {
            return Err(Error::input(format!(
                "band {} has {} cells, expected {}",
                b + 1,
                bands[b].len(),
                width * height
            )));
        }
        Ok(Self { width, height, bands, transform, nodata })
    }

    /// Split interleaved samples (`RGBRGB...`) into bands.
    pub fn from_interleaved(
        width: usize,
        height: usize,
        samples: &[f32],
        transform: GeoTransform,
        nodata: Option<f32>,
    ) -> Result<Self> {
        let cells = width * height;
        if cells == 0 || samples.len() % cells != 0 {
            return Err(Error::input(format!(
                "{} samples do not fill a {width}x{height} raster",
                samples.len()
            )));
        }
        let n_bands = samples.len() / cells;
        let bands = (0..n_bands)
            .map(|b| samples.iter().skip(b).step_by(n_bands).copied().collect())
            .collect();
        Self::new(width, height, bands, transform, nodata)
    }

    fn is_nodata(&self, v: f32) -> bool {
        v.is_nan() || self.nodata.is_some_and(|nd| v == nd)
    }

    pub fn get(&self, band: usize, row: usize, col: usize) -> f32 {
        self.bands[band][row * self.width + col]
    }
}

impl RasterSampler for RasterGrid {
    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn sample(&self, x: f64, y: f64) -> Result<Vec<Option<f64>>> {
        let (row, col) = self.transform.cell(x, y);
        let inside = row >= 0.0
            && col >= 0.0
            && row < self.height as f64
            && col < self.width as f64;
        if !inside {
            return Ok(vec![None; self.bands.len()]);
        }
        let (row, col) = (row as usize, col as usize);
        Ok((0..self.bands.len())
            .map(|b| {
                let v = self.get(b, row, col);
                (!self.is_nodata(v)).then_some(f64::from(v))
            })
            .collect())
    }
}

fn to_f32(img: DecodingResult) -> Option<Vec<f32>> {
    Some(match img {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => return None,
    })
}

/// World file next to `tiff_path`: `.tfw` first, then `.wld`.
pub fn world_file_for(tiff_path: &Path) -> Option<PathBuf> {
    ["tfw", "wld"]
        .iter()
        .map(|ext| tiff_path.with_extension(ext))
        .find(|p| p.exists())
}

/// Load a TIFF and its world file. `nodata` overrides the GDAL no-data tag.
pub fn load_tiff(path: &Path, world_file: Option<&Path>, nodata: Option<f32>) -> Result<RasterGrid> {
    let service = "raster-read";
    let world = match world_file {
        Some(p) => p.to_path_buf(),
        None => world_file_for(path).ok_or_else(|| {
            Error::input(format!("no world file (.tfw/.wld) next to {}", path.display()))
        })?,
    };
    let world_text = fs::read_to_string(&world)
        .map_err(|e| Error::input(format!("cannot read {}: {e}", world.display())))?;
    let transform = GeoTransform::from_world_file(&world_text)?;

    let file = fs::File::open(path)
        .map_err(|e| Error::input(format!("cannot open {}: {e}", path.display())))?;
    let mut decoder = Decoder::new(io::BufReader::new(file))
        .map_err(|e| Error::service(service, format!("{}: not a valid TIFF: {e}", path.display())))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::service(service, format!("dimensions: {e}")))?;

    let tag_nodata = match decoder.find_tag(Tag::Unknown(GDAL_NODATA_TAG)) {
        Ok(Some(tiff::decoder::ifd::Value::Ascii(s))) => s.trim_end_matches('\0').trim().parse().ok(),
        _ => None,
    };

    let img = decoder
        .read_image()
        .map_err(|e| Error::service(service, format!("read_image: {e}")))?;
    let samples = to_f32(img)
        .ok_or_else(|| Error::service(service, "unsupported pixel type"))?;

    let grid = RasterGrid::from_interleaved(
        width as usize,
        height as usize,
        &samples,
        transform,
        nodata.or(tag_nodata),
    )?;
    debug!(
        path = %path.display(),
        width,
        height,
        bands = grid.bands.len(),
        nodata = ?grid.nodata,
        "raster loaded"
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> GeoTransform {
        // 1 unit pixels, upper-left corner at (100, 50).
        GeoTransform { origin_x: 100.0, origin_y: 50.0, pixel_width: 1.0, pixel_height: -1.0 }
    }

    #[test]
    fn world_file_gives_upper_left_corner() {
        let t = GeoTransform::from_world_file("0.5\n0\n0\n-0.5\n100.25\n49.75\n").unwrap();
        assert_eq!(t.origin_x, 100.0);
        assert_eq!(t.origin_y, 50.0);
        assert_eq!(t.pixel_height, -0.5);
    }

    #[test]
    fn world_file_rejects_rotation_and_short_input() {
        assert!(GeoTransform::from_world_file("1 0.1 0 -1 0 0").is_err());
        assert!(GeoTransform::from_world_file("1 0 0 -1").is_err());
    }

    #[test]
    fn interleaved_samples_split_into_bands() {
        // 2x1 RGB: (10,20,30) (40,50,60)
        let g = RasterGrid::from_interleaved(
            2, 1, &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0], transform(), None,
        )
        .unwrap();
        assert_eq!(g.bands.len(), 3);
        assert_eq!(g.bands[0], vec![10.0, 40.0]);
        assert_eq!(g.bands[2], vec![30.0, 60.0]);
    }

    #[test]
    fn sample_reads_the_containing_cell() {
        let g = RasterGrid::new(
            2,
            2,
            vec![vec![1.0, 2.0, 3.0, 4.0]],
            transform(),
            None,
        )
        .unwrap();
        // Row 0 is the north row (y in 49..50).
        assert_eq!(g.sample(100.5, 49.5).unwrap(), vec![Some(1.0)]);
        assert_eq!(g.sample(101.5, 48.5).unwrap(), vec![Some(4.0)]);
    }

    #[test]
    fn outside_extent_and_nodata_are_none() {
        let g = RasterGrid::new(
            2,
            1,
            vec![vec![0.0, 7.0], vec![5.0, 7.0]],
            transform(),
            Some(0.0),
        )
        .unwrap();
        assert_eq!(g.sample(99.0, 49.5).unwrap(), vec![None, None]);
        assert_eq!(g.sample(100.5, 52.0).unwrap(), vec![None, None]);
        assert_eq!(g.sample(100.5, 49.5).unwrap(), vec![None, Some(5.0)]);
        assert_eq!(g.sample(101.5, 49.5).unwrap(), vec![Some(7.0), Some(7.0)]);
    }
}
