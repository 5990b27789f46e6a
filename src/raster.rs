use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use geo::{BoundingRect, Polygon};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::geometry;

/// Nodata sentinel of the AHN reference rasters (Float32).
const NODATA: f32 = -9999.0;

/// One reference height raster, read into memory per tile. North-up grid:
/// the origin is the upper-left corner and rows run southward.
#[derive(Debug)]
pub struct ReferenceRaster {
    origin_x: f64,
    origin_y: f64,
    cell_width: f64,
    cell_height: f64,
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl ReferenceRaster {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .with_context(|| format!("failed to decode {}", path.display()))?;

        let (width, height) = decoder
            .dimensions()
            .with_context(|| format!("failed to read dimensions of {}", path.display()))?;
        let scale = decoder
            .get_tag_f64_vec(Tag::ModelPixelScaleTag)
            .with_context(|| format!("missing pixel scale in {}", path.display()))?;
        let tiepoint = decoder
            .get_tag_f64_vec(Tag::ModelTiepointTag)
            .with_context(|| format!("missing tiepoint in {}", path.display()))?;
        if scale.len() < 2 || tiepoint.len() < 5 {
            bail!("incomplete georeference in {}", path.display());
        }

        let values = match decoder
            .read_image()
            .with_context(|| format!("failed to read raster data from {}", path.display()))?
        {
            DecodingResult::F32(values) => values,
            DecodingResult::F64(values) => values.into_iter().map(|v| v as f32).collect(),
            _ => bail!("unsupported sample format in {}", path.display()),
        };

        Self::from_parts(
            // tiepoint maps raster (i, j) onto model (x, y)
            tiepoint[3] - tiepoint[0] * scale[0],
            tiepoint[4] + tiepoint[1] * scale[1],
            scale[0],
            scale[1],
            width as usize,
            height as usize,
            values,
        )
    }

    pub fn from_parts(
        origin_x: f64,
        origin_y: f64,
        cell_width: f64,
        cell_height: f64,
        width: usize,
        height: usize,
        values: Vec<f32>,
    ) -> Result<Self> {
        if values.len() != width * height {
            bail!(
                "raster data length {} does not match {}x{} grid",
                values.len(),
                width,
                height
            );
        }
        if cell_width <= 0.0 || cell_height <= 0.0 {
            bail!("raster cell size must be positive");
        }

        Ok(Self {
            origin_x,
            origin_y,
            cell_width,
            cell_height,
            width,
            height,
            values,
        })
    }

    /// Values of every valid cell whose center falls inside the footprint.
    pub fn cells_within(&self, footprint: &Polygon<f64>) -> Vec<f64> {
        let Some(bbox) = footprint.bounding_rect() else {
            return Vec::new();
        };

        let first_col = (((bbox.min().x - self.origin_x) / self.cell_width).floor()).max(0.0) as usize;
        let last_col =
            ((((bbox.max().x - self.origin_x) / self.cell_width).ceil()) as isize).max(0) as usize;
        let first_row = (((self.origin_y - bbox.max().y) / self.cell_height).floor()).max(0.0) as usize;
        let last_row =
            ((((self.origin_y - bbox.min().y) / self.cell_height).ceil()) as isize).max(0) as usize;

        let mut cells = Vec::new();
        for row in first_row..last_row.min(self.height) {
            let y = self.origin_y - (row as f64 + 0.5) * self.cell_height;
            for col in first_col..last_col.min(self.width) {
                let value = self.values[row * self.width + col];
                if value == NODATA || !value.is_finite() {
                    continue;
                }

                let x = self.origin_x + (col as f64 + 0.5) * self.cell_width;
                if geometry::contains_point(footprint, x, y) {
                    cells.push(f64::from(value));
                }
            }
        }
        cells
    }
}

/// Zonal statistics of a footprint's cell values: one percentile per stat
/// name, `percentile_<q>` with q a fraction in [0, 1]. Linear interpolation
/// between order statistics; an empty cell set yields all-null results.
pub fn zonal_percentiles(cells: &[f64], stats: &[String]) -> BTreeMap<String, Option<f64>> {
    let mut sorted = cells.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    stats
        .iter()
        .map(|stat| {
            let value = stat_fraction(stat).and_then(|q| percentile(&sorted, q));
            (stat.clone(), value)
        })
        .collect()
}

fn stat_fraction(name: &str) -> Option<f64> {
    let raw = name.rsplit('_').next()?;
    let q: f64 = raw.parse().ok()?;
    (0.0..=1.0).contains(&q).then_some(q)
}

fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let rank = (sorted.len() - 1) as f64 * q;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Index the per-tile reference rasters in a directory: `<tile>.tif` (or
/// `.tiff`), tile codes matched case-insensitively.
pub fn build_raster_index(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut index = BTreeMap::new();

    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();

        let is_tiff = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
            .unwrap_or(false);
        if !is_tiff {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            index.insert(stem.to_lowercase(), path);
        }
    }

    Ok(index)
}
