use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::AhnVersion;
use crate::util::write_json_pretty;

const REST_SUFFIX: &str = "_rest";
const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_TABLE: &str = "heights";
const DEFAULT_BAG3D_TABLE: &str = "bag3d";

/// The batch3dfier job document. One base config is parsed per run; the
/// per-variant configs handed to the fusion tool are derived from it and
/// the base is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub input_polygons: InputPolygons,
    pub input_elevation: InputElevation,
    pub elevation: ElevationIndex,
    pub output: OutputConfig,
    pub quality: QualityConfig,
    pub config: ConfigOutputs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPolygons {
    pub tile_list: Vec<String>,
    pub footprints: Footprints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprints {
    pub geometry: String,
}

/// Elevation datasets by survey: `dataset_dir` and `dataset_name` are
/// positionally paired lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputElevation {
    pub dataset_dir: Vec<PathBuf>,
    pub dataset_name: Vec<String>,
}

/// Where the elevation tile index lives in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationIndex {
    pub schema: String,
    pub table: String,
    pub border_table: String,
    pub fields: ElevationFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationFields {
    pub unit_name: String,
    pub version: String,
    pub geometry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub bag3d_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Bernoulli sample fraction in percent, as TABLESAMPLE takes it.
    pub sample_size: f64,
}

/// Destination paths of the derived per-variant config documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOutputs {
    pub out_rest: PathBuf,
    pub out_border_ahn2: PathBuf,
    pub out_border_ahn3: PathBuf,
}

pub fn load_config(path: &Path) -> Result<BatchConfig> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_config(path: &Path, config: &BatchConfig) -> Result<()> {
    write_json_pretty(path, config)
        .with_context(|| format!("failed to write config {}", path.display()))
}

/// The three job variants derived from one base config, plus the requested
/// tiles that fell outside known coverage.
#[derive(Debug, Clone)]
pub struct PartitionedConfigs {
    pub rest: BatchConfig,
    pub border_ahn2: BatchConfig,
    pub border_ahn3: BatchConfig,
    pub dropped: Vec<String>,
}

/// Split the requested tile list into interior and border jobs.
///
/// Interior tiles keep the base elevation setup and get `_rest` output
/// names; border tiles are processed twice, once per survey, against the
/// border table with survey-specific elevation sources and
/// `_border_ahn{2,3}` output names. Requested tiles in neither set are
/// dropped with a warning and surfaced to the caller.
pub fn partition_config(
    base: &BatchConfig,
    border_tiles: &[String],
    interior_tiles: &[String],
    ahn2_dir: &Path,
    ahn3_dir: &Path,
) -> Result<PartitionedConfigs> {
    let border_set: BTreeSet<String> = border_tiles.iter().map(|t| t.to_lowercase()).collect();
    let interior_set: BTreeSet<String> = interior_tiles.iter().map(|t| t.to_lowercase()).collect();
    let requested: BTreeSet<String> = base
        .input_polygons
        .tile_list
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    let effective_border: Vec<String> = requested.intersection(&border_set).cloned().collect();
    let effective_interior: Vec<String> = requested.intersection(&interior_set).cloned().collect();
    let dropped: Vec<String> = requested
        .iter()
        .filter(|tile| !border_set.contains(*tile) && !interior_set.contains(*tile))
        .cloned()
        .collect();

    if !dropped.is_empty() {
        warn!(
            tiles = ?dropped,
            "requested tiles outside known coverage are excluded"
        );
    }
    if !effective_border.is_empty() {
        warn!(
            tiles = ?effective_border,
            "requested tiles are on the border of AHN3 and might be missing points"
        );
    }

    Ok(PartitionedConfigs {
        rest: derive_rest(base, effective_interior),
        border_ahn2: derive_border(base, effective_border.clone(), AhnVersion::Ahn2, ahn2_dir)?,
        border_ahn3: derive_border(base, effective_border, AhnVersion::Ahn3, ahn3_dir)?,
        dropped,
    })
}

fn derive_rest(base: &BatchConfig, tiles: Vec<String>) -> BatchConfig {
    let mut config = base.clone();
    config.input_polygons.tile_list = tiles;
    config.output = suffix_output(&base.output, REST_SUFFIX);
    config
}

fn derive_border(
    base: &BatchConfig,
    tiles: Vec<String>,
    version: AhnVersion,
    ahn_dir: &Path,
) -> Result<BatchConfig> {
    let Some(name_idx) = base
        .input_elevation
        .dataset_dir
        .iter()
        .position(|dir| dir == ahn_dir)
    else {
        bail!(
            "cannot find {} in input_elevation:dataset_dir of the batch3dfier config",
            ahn_dir.display()
        );
    };
    let Some(dataset_name) = base.input_elevation.dataset_name.get(name_idx) else {
        bail!(
            "input_elevation:dataset_name has no entry for {}",
            ahn_dir.display()
        );
    };

    let mut config = base.clone();
    config.input_polygons.tile_list = tiles;
    // process border tiles from the border table with one survey only
    config.elevation.table = base.elevation.border_table.clone();
    config.input_elevation.dataset_dir = vec![ahn_dir.to_path_buf()];
    config.input_elevation.dataset_name = vec![dataset_name.clone()];
    config.output = suffix_output(&base.output, version.output_suffix());
    Ok(config)
}

/// Apply a job suffix to the output targets: the last path segment of the
/// output directory and the table names. A config without an output table
/// falls back to the default public-schema naming scheme.
fn suffix_output(output: &OutputConfig, suffix: &str) -> OutputConfig {
    let parent = output.dir.parent().unwrap_or_else(|| Path::new(""));
    let basename = output
        .dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let dir = parent.join(format!("{basename}{suffix}"));

    match &output.table {
        Some(table) => OutputConfig {
            dir,
            schema: output.schema.clone(),
            table: Some(format!("{}{}", table.trim(), suffix)),
            bag3d_table: output
                .bag3d_table
                .as_ref()
                .map(|bag3d| format!("{}{}", bag3d.trim(), suffix)),
        },
        None => OutputConfig {
            dir,
            schema: Some(DEFAULT_SCHEMA.to_string()),
            table: Some(format!("{DEFAULT_TABLE}{suffix}")),
            bag3d_table: Some(format!("{DEFAULT_BAG3D_TABLE}{suffix}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{
        BatchConfig, ConfigOutputs, ElevationFields, ElevationIndex, Footprints, InputElevation,
        InputPolygons, OutputConfig, QualityConfig, partition_config, suffix_output,
    };

    fn base_config() -> BatchConfig {
        BatchConfig {
            input_polygons: InputPolygons {
                tile_list: vec!["25gn1".to_string(), "25gn2".to_string(), "25gz1".to_string()],
                footprints: Footprints {
                    geometry: "geovlak".to_string(),
                },
            },
            input_elevation: InputElevation {
                dataset_dir: vec![
                    PathBuf::from("/data/pointcloud/AHN2/merged"),
                    PathBuf::from("/data/pointcloud/AHN3/as_downloaded"),
                ],
                dataset_name: vec!["ahn2_{tile}".to_string(), "ahn3_{tile}".to_string()],
            },
            elevation: ElevationIndex {
                schema: "tile_index".to_string(),
                table: "ahn_index".to_string(),
                border_table: "border_tiles".to_string(),
                fields: ElevationFields {
                    unit_name: "bladnr".to_string(),
                    version: "ahn_version".to_string(),
                    geometry: "geom".to_string(),
                },
            },
            output: OutputConfig {
                dir: PathBuf::from("/data/3dbag/out"),
                schema: Some("bagactueel".to_string()),
                table: Some("heights".to_string()),
                bag3d_table: Some("bag3d".to_string()),
            },
            quality: QualityConfig { sample_size: 10.0 },
            config: ConfigOutputs {
                out_rest: PathBuf::from("/data/3dbag/conf_rest.json"),
                out_border_ahn2: PathBuf::from("/data/3dbag/conf_border_ahn2.json"),
                out_border_ahn3: PathBuf::from("/data/3dbag/conf_border_ahn3.json"),
            },
        }
    }

    fn partition(base: &BatchConfig) -> super::PartitionedConfigs {
        partition_config(
            base,
            &["25gn1".to_string()],
            &["25gn2".to_string()],
            Path::new("/data/pointcloud/AHN2/merged"),
            Path::new("/data/pointcloud/AHN3/as_downloaded"),
        )
        .expect("partition should succeed")
    }

    #[test]
    fn tile_lists_are_disjoint_and_cover_known_tiles() {
        let parts = partition(&base_config());
        assert_eq!(parts.rest.input_polygons.tile_list, vec!["25gn2"]);
        assert_eq!(parts.border_ahn2.input_polygons.tile_list, vec!["25gn1"]);
        assert_eq!(parts.border_ahn3.input_polygons.tile_list, vec!["25gn1"]);
        assert_eq!(parts.dropped, vec!["25gz1"]);
    }

    #[test]
    fn output_names_get_variant_suffixes() {
        let parts = partition(&base_config());
        assert_eq!(parts.rest.output.table.as_deref(), Some("heights_rest"));
        assert_eq!(
            parts.border_ahn2.output.table.as_deref(),
            Some("heights_border_ahn2")
        );
        assert_eq!(
            parts.border_ahn3.output.table.as_deref(),
            Some("heights_border_ahn3")
        );
        assert_eq!(parts.rest.output.bag3d_table.as_deref(), Some("bag3d_rest"));
        assert_eq!(
            parts.rest.output.dir,
            PathBuf::from("/data/3dbag/out_rest")
        );
        assert_eq!(
            parts.border_ahn3.output.dir,
            PathBuf::from("/data/3dbag/out_border_ahn3")
        );
    }

    #[test]
    fn border_variants_redirect_the_elevation_source() {
        let parts = partition(&base_config());

        assert_eq!(parts.border_ahn2.elevation.table, "border_tiles");
        assert_eq!(
            parts.border_ahn2.input_elevation.dataset_dir,
            vec![PathBuf::from("/data/pointcloud/AHN2/merged")]
        );
        assert_eq!(
            parts.border_ahn2.input_elevation.dataset_name,
            vec!["ahn2_{tile}".to_string()]
        );

        assert_eq!(parts.border_ahn3.elevation.table, "border_tiles");
        assert_eq!(
            parts.border_ahn3.input_elevation.dataset_name,
            vec!["ahn3_{tile}".to_string()]
        );

        // the interior job keeps the full index
        assert_eq!(parts.rest.elevation.table, "ahn_index");
    }

    #[test]
    fn missing_dataset_dir_entry_is_a_hard_error() {
        let base = base_config();
        let result = partition_config(
            &base,
            &["25gn1".to_string()],
            &["25gn2".to_string()],
            Path::new("/data/pointcloud/AHN2/merged"),
            Path::new("/data/elsewhere/AHN3"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn base_config_is_never_mutated() {
        let base = base_config();
        let before = base.clone();
        let _ = partition(&base);
        assert_eq!(base, before);
    }

    #[test]
    fn unset_output_table_falls_back_to_default_scheme() {
        let output = OutputConfig {
            dir: PathBuf::from("/data/3dbag/out"),
            schema: None,
            table: None,
            bag3d_table: None,
        };

        let rest = suffix_output(&output, "_rest");
        assert_eq!(rest.schema.as_deref(), Some("public"));
        assert_eq!(rest.table.as_deref(), Some("heights_rest"));
        assert_eq!(rest.bag3d_table.as_deref(), Some("bag3d_rest"));

        let border = suffix_output(&output, "_border_ahn2");
        assert_eq!(border.table.as_deref(), Some("heights_border_ahn2"));
        assert_eq!(border.bag3d_table.as_deref(), Some("bag3d_border_ahn2"));
    }

    #[test]
    fn table_names_are_trimmed_before_suffixing() {
        let output = OutputConfig {
            dir: PathBuf::from("/data/3dbag/out"),
            schema: Some("bagactueel".to_string()),
            table: Some("heights ".to_string()),
            bag3d_table: Some(" bag3d".to_string()),
        };

        let rest = suffix_output(&output, "_rest");
        assert_eq!(rest.table.as_deref(), Some("heights_rest"));
        assert_eq!(rest.bag3d_table.as_deref(), Some("bag3d_rest"));
    }

    #[test]
    fn variant_suffixes_never_collide() {
        let output = base_config().output;
        let names: Vec<String> = ["_rest", "_border_ahn2", "_border_ahn3"]
            .iter()
            .map(|suffix| suffix_output(&output, suffix).table.unwrap())
            .collect();
        assert_eq!(
            names.len(),
            names.iter().collect::<std::collections::BTreeSet<_>>().len()
        );
    }

    #[test]
    fn requested_tiles_match_case_insensitively() {
        let mut base = base_config();
        base.input_polygons.tile_list = vec!["25GN1".to_string(), "25GN2".to_string()];
        let parts = partition(&base);
        assert_eq!(parts.border_ahn2.input_polygons.tile_list, vec!["25gn1"]);
        assert_eq!(parts.rest.input_polygons.tile_list, vec!["25gn2"]);
        assert!(parts.dropped.is_empty());
    }
}
