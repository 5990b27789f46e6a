use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config;
use crate::store::quote_identifier;

/// Report the state of the store and the most recent run manifests.
pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("bag3d.sqlite"));
    let manifest_dir = args.cache_root.join("manifests");

    info!(cache_root = %args.cache_root.display(), "status requested");

    if db_path.exists() {
        let connection = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;

        if let Some(config_path) = &args.config {
            match config::load_config(config_path) {
                Ok(batch_config) => {
                    let index = table_count(&connection, &batch_config.elevation.table);
                    let border = table_count(&connection, &batch_config.elevation.border_table);
                    info!(
                        path = %db_path.display(),
                        index_tiles = index.unwrap_or(0),
                        border_tiles = border.unwrap_or(0),
                        "tile index status"
                    );
                }
                Err(err) => {
                    warn!(path = %config_path.display(), error = %err, "cannot read batch config");
                }
            }
        }

        match latest_quality_row(&connection) {
            Some((date, total)) => {
                info!(date = %date, buildings = total, "latest quality counts")
            }
            None => warn!("no quality counts recorded"),
        }
    } else {
        warn!(path = %db_path.display(), "store missing");
    }

    report_latest_manifest(&manifest_dir, "partition_");
    report_latest_manifest(&manifest_dir, "quality_");

    Ok(())
}

fn table_count(connection: &Connection, table: &str) -> Option<i64> {
    let quoted = quote_identifier(table).ok()?;
    connection
        .query_row(&format!("SELECT COUNT(*) FROM {quoted}"), [], |row| {
            row.get(0)
        })
        .ok()
}

fn latest_quality_row(connection: &Connection) -> Option<(String, i64)> {
    connection
        .query_row(
            "SELECT date, total_cnt FROM bag3d_quality ORDER BY date DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()
}

fn report_latest_manifest(manifest_dir: &Path, prefix: &str) {
    let Ok(entries) = fs::read_dir(manifest_dir) else {
        warn!(path = %manifest_dir.display(), "manifest directory missing");
        return;
    };

    let mut manifests: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(ToOwned::to_owned))
        .filter(|name| name.starts_with(prefix) && name.ends_with(".json"))
        .collect();
    manifests.sort();

    match manifests.last() {
        Some(name) => info!(manifest = %name, "latest run manifest"),
        None => warn!(prefix = %prefix, "no run manifests found"),
    }
}
