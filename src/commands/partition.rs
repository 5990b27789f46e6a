use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::PartitionArgs;
use crate::model::{PartitionCounts, PartitionRunManifest};
use crate::store::Store;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};
use crate::{ahn, border, config};

/// Configure the fusion jobs for the tiles on the AHN2/AHN3 border.
///
/// Detects the border tiles, persists them with corrected acquisition
/// dates, splits the requested tile list into interior and border jobs and
/// writes one config document per job variant for the fusion tool.
pub fn run(args: PartitionArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("bag3d.sqlite"));
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.cache_root
            .join("manifests")
            .join(format!("partition_{}.json", utc_compact_string(started_ts)))
    });

    info!(config = %args.config.display(), run_id = %run_id, "starting border partitioning");

    let batch_config = config::load_config(&args.config)?;
    let ahn2_dir = absolute(&args.ahn2_dir);
    let ahn3_dir = absolute(&args.ahn3_dir);

    let mut store = Store::open(&db_path)?;

    let index = store.load_tile_index(&batch_config.elevation)?;
    info!(tiles = index.len(), "loaded elevation tile index");

    let border = border::detect_border_tiles(&index);
    store.replace_border_table(&batch_config.elevation, &border)?;

    // Border tiles only partially contain AHN3 points and are processed as
    // AHN2; their dates must come from the AHN2 files.
    let date_pattern = ahn::creation_date_pattern()?;
    let mut corrupted = Vec::new();
    let dates: Vec<_> = border
        .iter()
        .map(|tile| {
            let date = ahn::get_file_date(
                &ahn2_dir,
                &args.metadata_pattern,
                &tile.tile_id,
                &date_pattern,
                &mut corrupted,
            );
            (tile.tile_id.clone(), date)
        })
        .collect();
    let dated = store.update_border_dates(&batch_config.elevation, &dates)?;

    let border_tiles = store.border_tiles(&batch_config.elevation)?;
    let interior_tiles = store.interior_tiles(&batch_config.elevation)?;

    let parts = config::partition_config(
        &batch_config,
        &border_tiles,
        &interior_tiles,
        &ahn2_dir,
        &ahn3_dir,
    )?;

    let mut config_outputs = Vec::new();
    if args.dry_run {
        info!("dry run, not writing job configs");
    } else {
        for (variant, path) in [
            (&parts.rest, &batch_config.config.out_rest),
            (&parts.border_ahn2, &batch_config.config.out_border_ahn2),
            (&parts.border_ahn3, &batch_config.config.out_border_ahn3),
        ] {
            config::write_config(path, variant)?;
            info!(path = %path.display(), "wrote job config");
            config_outputs.push(path.display().to_string());
        }
    }

    let mut warnings = Vec::new();
    if !parts.dropped.is_empty() {
        warnings.push(format!(
            "requested tiles outside known coverage: {}",
            parts.dropped.join(", ")
        ));
    }
    for tile in &corrupted {
        warnings.push(format!("corrupted or missing metadata file for tile {tile}"));
    }

    let manifest = PartitionRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        config_path: args.config.display().to_string(),
        db_path: db_path.display().to_string(),
        counts: PartitionCounts {
            index_tiles: index.len(),
            border_tiles: border.len(),
            dated_border_tiles: dated,
            requested_tiles: batch_config.input_polygons.tile_list.len(),
            rest_tiles: parts.rest.input_polygons.tile_list.len(),
            border_job_tiles: parts.border_ahn2.input_polygons.tile_list.len(),
            dropped_tiles: parts.dropped.len(),
        },
        corrupted_metadata: corrupted,
        warnings,
        config_outputs,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    store.close()?;

    info!(path = %manifest_path.display(), "wrote partition run manifest");
    info!(
        border = manifest.counts.border_tiles,
        rest = manifest.counts.rest_tiles,
        dropped = manifest.counts.dropped_tiles,
        "border partitioning completed"
    );

    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
