use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{debug, info};

use crate::cli::QualityArgs;
use crate::config;
use crate::model::{QualityRunCounts, QualityRunManifest, SampleRecord};
use crate::raster::{self, ReferenceRaster};
use crate::stats;
use crate::store::{self, Store};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

/// Quality control of the fused output: draw a random sample of buildings
/// on interior tiles, attach reference heights from per-tile rasters and
/// aggregate the height differences into an RMSE report.
pub fn run(args: QualityArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("bag3d.sqlite"));
    let sample_path = args
        .sample_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("quality").join("sample.json"));
    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("quality").join("rmse.json"));
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.cache_root
            .join("manifests")
            .join(format!("quality_{}.json", utc_compact_string(started_ts)))
    });

    info!(config = %args.config.display(), run_id = %run_id, "starting quality control");

    let batch_config = config::load_config(&args.config)?;
    let Some(bag3d_table) = batch_config.output.bag3d_table.clone() else {
        bail!("output:bag3d_table must be set for quality control");
    };
    let stat_names = store::stat_names();

    let store = Store::open(&db_path)?;

    let views = store.create_quality_views(&bag3d_table)?;
    let quality_counts = store.insert_quality_counts(&bag3d_table)?;
    info!(
        total = quality_counts.total_cnt,
        valid_pct = quality_counts.valid_height_pct.unwrap_or_default(),
        "refreshed quality views and counts"
    );

    let interior_tiles = store.interior_tiles(&batch_config.elevation)?;
    let sample = store.sample_buildings(
        &views.valid,
        &batch_config.input_polygons.footprints.geometry,
        batch_config.quality.sample_size,
        &interior_tiles,
    )?;
    let sample_count = sample.len();
    info!(records = sample_count, "drew building sample");

    let raster_index = raster::build_raster_index(&args.raster_dir)?;
    info!(rasters = raster_index.len(), "indexed reference rasters");

    let (matched, skipped_tiles) = attach_reference(sample, &raster_index, &stat_names)?;

    // audit artifact: the enriched sample keyed by building id
    let audit: BTreeMap<i64, &SampleRecord> =
        matched.iter().map(|record| (record.gid, record)).collect();
    write_json_pretty(&sample_path, &audit)?;
    info!(path = %sample_path.display(), "wrote enriched sample");

    let diffs = stats::compute_diffs(&matched, &stat_names);
    let report = stats::compute_rmse(&diffs, &stat_names);
    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), stats = report.len(), "wrote accuracy report");

    let mut warnings = Vec::new();
    for tile in &skipped_tiles {
        warnings.push(format!("no reference raster for tile {tile}"));
    }
    for stat in &stat_names {
        if !report.contains_key(stat) {
            warnings.push(format!("no usable differences for {stat}"));
        }
    }

    let manifest = QualityRunManifest {
        manifest_version: 1,
        run_id,
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        config_path: args.config.display().to_string(),
        db_path: db_path.display().to_string(),
        counts: QualityRunCounts {
            interior_tiles: interior_tiles.len(),
            sample_records: sample_count,
            matched_records: matched.len(),
            skipped_tiles: skipped_tiles.len(),
            reported_stats: report.len(),
        },
        quality_counts,
        warnings,
        sample_path: sample_path.display().to_string(),
        report_path: report_path.display().to_string(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    store.close()?;

    info!(path = %manifest_path.display(), "wrote quality run manifest");
    Ok(())
}

/// Match sampled records to reference rasters, one tile at a time.
///
/// Every record is matched against exactly one raster: the pool of pending
/// records shrinks as tiles are processed. Records on tiles without a
/// reference raster are dropped from the accuracy computation.
fn attach_reference(
    sample: Vec<SampleRecord>,
    raster_index: &BTreeMap<String, PathBuf>,
    stat_names: &[String],
) -> Result<(Vec<SampleRecord>, Vec<String>)> {
    let tiles: BTreeSet<String> = sample.iter().map(|record| record.tile_id.clone()).collect();

    let mut pending = sample;
    let mut matched = Vec::new();
    let mut skipped_tiles = Vec::new();

    for tile in tiles {
        let Some(raster_path) = raster_index.get(&tile) else {
            debug!(tile = %tile, "tile not in raster index");
            skipped_tiles.push(tile);
            continue;
        };
        let raster = ReferenceRaster::open(raster_path)?;

        let (in_tile, rest): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|record| record.tile_id == tile);
        pending = rest;

        debug!(tile = %tile, records = in_tile.len(), "computing reference heights");
        for mut record in in_tile {
            let cells = raster.cells_within(&record.geometry);
            record.reference = Some(raster::zonal_percentiles(&cells, stat_names));
            matched.push(record);
        }
    }

    Ok((matched, skipped_tiles))
}
