use std::collections::BTreeMap;

use chrono::NaiveDate;
use geo::Polygon;
use serde::{Deserialize, Serialize};

/// Elevation acquisition campaign. AHN2 is the older, nationwide survey;
/// AHN3 is the newer one with incomplete coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AhnVersion {
    Ahn2,
    Ahn3,
}

impl AhnVersion {
    pub fn as_int(self) -> i64 {
        match self {
            Self::Ahn2 => 2,
            Self::Ahn3 => 3,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            2 => Some(Self::Ahn2),
            3 => Some(Self::Ahn3),
            _ => None,
        }
    }

    pub fn output_suffix(self) -> &'static str {
        match self {
            Self::Ahn2 => "_border_ahn2",
            Self::Ahn3 => "_border_ahn3",
        }
    }
}

/// One row of the elevation tile index. Tile codes are stored lowercased;
/// the version is NULL once a border tile's file date could not be resolved.
#[derive(Debug, Clone)]
pub struct TileRecord {
    pub tile_id: String,
    pub ahn_version: Option<AhnVersion>,
    pub geometry: Polygon<f64>,
    pub file_date: Option<NaiveDate>,
}

/// Entry of a tile-index JSON document as consumed by `import-index`.
/// Geometry is an array of rings, the first being the exterior.
#[derive(Debug, Clone, Deserialize)]
pub struct TileIndexEntry {
    pub tile: String,
    pub version: Option<i64>,
    pub geometry: Vec<Vec<[f64; 2]>>,
}

/// One sampled building footprint, enriched in place with reference
/// heights once its tile's raster has been processed.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub gid: i64,
    #[serde(skip_serializing)]
    pub geometry: Polygon<f64>,
    pub tile_id: String,
    pub ahn_version: Option<i64>,
    #[serde(flatten)]
    pub percentiles: BTreeMap<String, Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<BTreeMap<String, Option<f64>>>,
}

/// Per-sample computed - reference differences, one entry per percentile
/// stat; None where either side was missing.
#[derive(Debug, Clone, Serialize)]
pub struct DiffRecord {
    pub gid: i64,
    pub tile_id: String,
    pub ahn_version: Option<i64>,
    #[serde(flatten)]
    pub diffs: BTreeMap<String, Option<f64>>,
}

/// One row of the bag3d_quality table, keyed by run date. Percentages are
/// NULL when the building table is empty.
#[derive(Debug, Clone, Serialize)]
pub struct QualityCounts {
    pub date: String,
    pub total_cnt: i64,
    pub valid_height_pct: Option<f64>,
    pub invalid_height_pct: Option<f64>,
    pub ground_missing_pct: Option<f64>,
    pub roof_missing_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionCounts {
    pub index_tiles: usize,
    pub border_tiles: usize,
    pub dated_border_tiles: usize,
    pub requested_tiles: usize,
    pub rest_tiles: usize,
    pub border_job_tiles: usize,
    pub dropped_tiles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub config_path: String,
    pub db_path: String,
    pub counts: PartitionCounts,
    pub corrupted_metadata: Vec<String>,
    pub warnings: Vec<String>,
    pub config_outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityRunCounts {
    pub interior_tiles: usize,
    pub sample_records: usize,
    pub matched_records: usize,
    pub skipped_tiles: usize,
    pub reported_stats: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub config_path: String,
    pub db_path: String,
    pub counts: QualityRunCounts,
    pub quality_counts: QualityCounts,
    pub warnings: Vec<String>,
    pub sample_path: String,
    pub report_path: String,
}
