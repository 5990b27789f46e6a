use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::ImportIndexArgs;
use crate::config;
use crate::geometry;
use crate::model::{AhnVersion, TileIndexEntry, TileRecord};
use crate::store::Store;

/// Load an elevation tile-index JSON document into the store, replacing
/// any previous index. Entries with an unsupported survey version are
/// skipped with a warning.
pub fn run(args: ImportIndexArgs) -> Result<()> {
    let db_path = resolve_db_path(&args);
    let batch_config = config::load_config(&args.config)?;

    let raw = fs::read(&args.index_path)
        .with_context(|| format!("failed to read {}", args.index_path.display()))?;
    let entries: Vec<TileIndexEntry> = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", args.index_path.display()))?;

    let mut tiles = Vec::with_capacity(entries.len());
    let mut skipped = 0_usize;
    for entry in &entries {
        let version = match entry.version {
            None => None,
            Some(value) => match AhnVersion::from_int(value) {
                Some(version) => Some(version),
                None => {
                    warn!(tile = %entry.tile, version = value, "unsupported survey version, skipping tile");
                    skipped += 1;
                    continue;
                }
            },
        };

        let polygon = geometry::polygon_from_rings(&entry.geometry)
            .with_context(|| format!("invalid geometry for tile {}", entry.tile))?;
        tiles.push(TileRecord {
            tile_id: entry.tile.to_lowercase(),
            ahn_version: version,
            geometry: polygon,
            file_date: None,
        });
    }

    let mut store = Store::open(&db_path)?;
    let imported = store.replace_tile_index(&batch_config.elevation, &tiles)?;
    store.close()?;

    info!(
        path = %args.index_path.display(),
        imported,
        skipped,
        table = %batch_config.elevation.table,
        "imported elevation tile index"
    );

    Ok(())
}

fn resolve_db_path(args: &ImportIndexArgs) -> PathBuf {
    args.db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("bag3d.sqlite"))
}
