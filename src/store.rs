use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use tracing::{debug, info};

use crate::config::ElevationIndex;
use crate::geometry;
use crate::model::{AhnVersion, QualityCounts, SampleRecord, TileRecord};

/// Roof height columns of the building table and the stat names they are
/// sampled and reported under.
pub const ROOF_STATS: &[(&str, &str)] = &[
    ("roof-0.00", "percentile_0.00"),
    ("roof-0.10", "percentile_0.10"),
    ("roof-0.25", "percentile_0.25"),
    ("roof-0.50", "percentile_0.50"),
    ("roof-0.75", "percentile_0.75"),
    ("roof-0.90", "percentile_0.90"),
    ("roof-0.95", "percentile_0.95"),
    ("roof-0.99", "percentile_0.99"),
];

const GROUND_COLUMNS: &[&str] = &[
    "ground-0.00",
    "ground-0.10",
    "ground-0.20",
    "ground-0.30",
    "ground-0.40",
    "ground-0.50",
];

pub fn stat_names() -> Vec<String> {
    ROOF_STATS.iter().map(|(_, stat)| stat.to_string()).collect()
}

/// Names of the quality-control tables/views derived from the bag3d table.
#[derive(Debug, Clone)]
pub struct QualityViews {
    pub valid: String,
    pub invalid_height: String,
    pub missing_ground: String,
    pub missing_roof: String,
}

/// Scoped handle on the spatial store: opened once per run, closed
/// explicitly on the success path, released by drop on error paths.
pub struct Store {
    connection: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&connection)?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        // WAL is meaningless for in-memory databases, skip the pragmas
        let connection = Connection::open_in_memory().context("failed to open in-memory store")?;
        Ok(Self { connection })
    }

    pub fn close(self) -> Result<()> {
        if let Err((_, err)) = self.connection.close() {
            return Err(err).context("failed to close the store");
        }
        Ok(())
    }

    /// Replace the elevation tile index (full overwrite). Tile codes are
    /// normalized to lowercase.
    pub fn replace_tile_index(
        &mut self,
        index: &ElevationIndex,
        tiles: &[TileRecord],
    ) -> Result<usize> {
        let table = quote_identifier(&index.table)?;
        let (tile_col, version_col, geometry_col) = index_columns(index)?;

        let tx = self.connection.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
               {tile_col} TEXT PRIMARY KEY,
               {version_col} INTEGER,
               {geometry_col} TEXT NOT NULL,
               file_date TEXT
             );"
        ))?;

        {
            let mut statement = tx.prepare(&format!(
                "INSERT INTO {table} ({tile_col}, {version_col}, {geometry_col}, file_date)
                 VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for tile in tiles {
                statement.execute(params![
                    tile.tile_id.to_lowercase(),
                    tile.ahn_version.map(AhnVersion::as_int),
                    geometry::encode_polygon(&tile.geometry)?,
                    tile.file_date,
                ])?;
            }
        }

        tx.commit()?;
        Ok(tiles.len())
    }

    pub fn load_tile_index(&self, index: &ElevationIndex) -> Result<Vec<TileRecord>> {
        let table = quote_identifier(&index.table)?;
        let (tile_col, version_col, geometry_col) = index_columns(index)?;

        let mut statement = self.connection.prepare(&format!(
            "SELECT {tile_col}, {version_col}, {geometry_col}, file_date
             FROM {table} ORDER BY {tile_col}"
        ))?;
        let mut rows = statement.query([])?;

        let mut tiles = Vec::new();
        while let Some(row) = rows.next()? {
            let tile_id: String = row.get(0)?;
            let version: Option<i64> = row.get(1)?;
            let raw_geometry: String = row.get(2)?;
            let file_date: Option<NaiveDate> = row.get(3)?;

            let geometry = geometry::decode_polygon(&raw_geometry)
                .with_context(|| format!("invalid geometry for tile {tile_id}"))?;
            tiles.push(TileRecord {
                tile_id: tile_id.to_lowercase(),
                ahn_version: version.and_then(AhnVersion::from_int),
                geometry,
                file_date,
            });
        }

        Ok(tiles)
    }

    /// Replace the border table with the given (already relabeled) tiles.
    pub fn replace_border_table(
        &mut self,
        index: &ElevationIndex,
        border: &[TileRecord],
    ) -> Result<()> {
        let border_table = quote_identifier(&index.border_table)?;
        let (tile_col, version_col, geometry_col) = index_columns(index)?;

        let tx = self.connection.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {border_table};
             CREATE TABLE {border_table} (
               {tile_col} TEXT PRIMARY KEY,
               {version_col} INTEGER,
               {geometry_col} TEXT NOT NULL,
               file_date TEXT
             );"
        ))?;

        {
            let mut statement = tx.prepare(&format!(
                "INSERT INTO {border_table} ({tile_col}, {version_col}, {geometry_col}, file_date)
                 VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for tile in border {
                statement.execute(params![
                    tile.tile_id.to_lowercase(),
                    tile.ahn_version.map(AhnVersion::as_int),
                    geometry::encode_polygon(&tile.geometry)?,
                    tile.file_date,
                ])?;
            }
        }

        tx.commit()?;
        info!(tiles = border.len(), "replaced border table");
        Ok(())
    }

    /// Per-tile date updates on the border table. A tile without a resolved
    /// date loses its survey version as well, marking it unusable for the
    /// mixed-survey job.
    pub fn update_border_dates(
        &mut self,
        index: &ElevationIndex,
        dates: &[(String, Option<NaiveDate>)],
    ) -> Result<usize> {
        let border_table = quote_identifier(&index.border_table)?;
        let (tile_col, version_col, _) = index_columns(index)?;

        let tx = self.connection.transaction()?;
        let mut dated = 0;
        {
            let mut with_date = tx.prepare(&format!(
                "UPDATE {border_table} SET file_date = ?1 WHERE {tile_col} = ?2"
            ))?;
            let mut without_date = tx.prepare(&format!(
                "UPDATE {border_table} SET {version_col} = NULL, file_date = NULL
                 WHERE {tile_col} = ?1"
            ))?;

            for (tile, date) in dates {
                match date {
                    Some(date) => {
                        with_date.execute(params![date, tile.to_lowercase()])?;
                        dated += 1;
                    }
                    None => {
                        debug!(tile = %tile, "no file date for tile");
                        without_date.execute(params![tile.to_lowercase()])?;
                    }
                }
            }
        }

        tx.commit()?;
        Ok(dated)
    }

    pub fn border_tiles(&self, index: &ElevationIndex) -> Result<Vec<String>> {
        let border_table = quote_identifier(&index.border_table)?;
        let tile_col = quote_identifier(&index.fields.unit_name)?;

        let mut statement = self
            .connection
            .prepare(&format!("SELECT {tile_col} FROM {border_table} ORDER BY {tile_col}"))?;
        let tiles = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tiles.into_iter().map(|tile| tile.to_lowercase()).collect())
    }

    /// Tiles of the index with no border-table counterpart.
    pub fn interior_tiles(&self, index: &ElevationIndex) -> Result<Vec<String>> {
        let table = quote_identifier(&index.table)?;
        let border_table = quote_identifier(&index.border_table)?;
        let tile_col = quote_identifier(&index.fields.unit_name)?;

        let mut statement = self.connection.prepare(&format!(
            "SELECT a.{tile_col}
             FROM {table} a
             LEFT JOIN {border_table} b ON a.{tile_col} = b.{tile_col}
             WHERE b.{tile_col} IS NULL
             ORDER BY a.{tile_col}"
        ))?;
        let tiles = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tiles.into_iter().map(|tile| tile.to_lowercase()).collect())
    }

    /// (Re)create the quality-control tables and views over the bag3d
    /// table: valid buildings, invalid heights, missing ground/roof.
    pub fn create_quality_views(&self, bag3d_table: &str) -> Result<QualityViews> {
        validate_identifier(bag3d_table)?;
        let views = QualityViews {
            valid: format!("{bag3d_table}_valid"),
            invalid_height: format!("{bag3d_table}_invalid_height"),
            missing_ground: format!("{bag3d_table}_missing_ground"),
            missing_roof: format!("{bag3d_table}_missing_roof"),
        };

        let bag3d = quote_identifier(bag3d_table)?;
        let valid = quote_identifier(&views.valid)?;
        let invalid_height = quote_identifier(&views.invalid_height)?;
        let missing_ground = quote_identifier(&views.missing_ground)?;
        let missing_roof = quote_identifier(&views.missing_roof)?;

        let ground_nulls = null_check(GROUND_COLUMNS)?;
        let roof_nulls = null_check(
            &ROOF_STATS
                .iter()
                .map(|(column, _)| *column)
                .collect::<Vec<_>>(),
        )?;

        self.connection
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS {valid};
                 CREATE TABLE {valid} AS
                 SELECT * FROM {bag3d}
                 WHERE bouwjaar <= CAST(strftime('%Y', ahn_file_date) AS INTEGER)
                   AND pandstatus NOT IN (
                     'Bouwvergunning verleend',
                     'Bouw gestart',
                     'Niet gerealiseerd pand',
                     'Pand gesloopt'
                   );

                 DROP VIEW IF EXISTS {invalid_height};
                 CREATE VIEW {invalid_height} AS
                 SELECT * FROM {bag3d}
                 WHERE bouwjaar > CAST(strftime('%Y', ahn_file_date) AS INTEGER);

                 DROP VIEW IF EXISTS {missing_ground};
                 CREATE VIEW {missing_ground} AS
                 SELECT * FROM {valid} WHERE {ground_nulls};

                 DROP VIEW IF EXISTS {missing_roof};
                 CREATE VIEW {missing_roof} AS
                 SELECT * FROM {valid} WHERE {roof_nulls};"
            ))
            .with_context(|| format!("failed to create quality views for {bag3d_table}"))?;

        Ok(views)
    }

    /// Aggregate building counts into bag3d_quality, one row per run date,
    /// and return the inserted row. Percentages are NULL on an empty table.
    pub fn insert_quality_counts(&self, bag3d_table: &str) -> Result<QualityCounts> {
        let bag3d = quote_identifier(bag3d_table)?;

        self.connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS bag3d_quality (
               date TEXT PRIMARY KEY,
               total_cnt INTEGER,
               valid_height_pct REAL,
               invalid_height_pct REAL,
               ground_missing_pct REAL,
               roof_missing_pct REAL
             );",
        )?;

        self.connection.execute(
            &format!(
                "INSERT OR REPLACE INTO bag3d_quality
                 SELECT
                   date('now'),
                   t.total_cnt,
                   (t.total_cnt - i.invalid_cnt) * 100.0 / t.total_cnt,
                   i.invalid_cnt * 100.0 / t.total_cnt,
                   g.ground_missing_cnt * 100.0 / t.total_cnt,
                   r.roof_missing_cnt * 100.0 / t.total_cnt
                 FROM
                   (SELECT COUNT(gid) total_cnt FROM {bag3d}) t,
                   (SELECT COUNT(gid) ground_missing_cnt FROM {bag3d} WHERE nr_ground_pts = 0) g,
                   (SELECT COUNT(gid) roof_missing_cnt FROM {bag3d} WHERE nr_roof_pts = 0) r,
                   (SELECT COUNT(gid) invalid_cnt FROM {bag3d}
                    WHERE bouwjaar > CAST(strftime('%Y', ahn_file_date) AS INTEGER)) i"
            ),
            [],
        )?;

        let counts = self.connection.query_row(
            "SELECT date, total_cnt, valid_height_pct, invalid_height_pct,
                    ground_missing_pct, roof_missing_pct
             FROM bag3d_quality WHERE date = date('now')",
            [],
            |row| {
                Ok(QualityCounts {
                    date: row.get(0)?,
                    total_cnt: row.get(1)?,
                    valid_height_pct: row.get(2)?,
                    invalid_height_pct: row.get(3)?,
                    ground_missing_pct: row.get(4)?,
                    roof_missing_pct: row.get(5)?,
                })
            },
        )?;
        Ok(counts)
    }

    /// Bernoulli sample of the valid buildings on interior tiles: each row
    /// is kept independently with probability sample_size/100, ordered by
    /// tile for grouping locality downstream.
    pub fn sample_buildings(
        &self,
        valid_table: &str,
        geometry_column: &str,
        sample_size: f64,
        interior_tiles: &[String],
    ) -> Result<Vec<SampleRecord>> {
        if interior_tiles.is_empty() {
            return Ok(Vec::new());
        }

        let valid = quote_identifier(valid_table)?;
        let geometry_col = quote_identifier(geometry_column)?;
        let roof_columns = ROOF_STATS
            .iter()
            .map(|(column, _)| quote_identifier(column))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let placeholders = vec!["?"; interior_tiles.len()].join(", ");

        let sql = format!(
            "SELECT gid, {geometry_col}, {roof_columns}, tile_id, ahn_version
             FROM {valid}
             WHERE tile_id IN ({placeholders})
               AND ((random() / 9223372036854775808.0) + 1.0) / 2.0 < ?
             ORDER BY tile_id"
        );

        let bindings: Vec<Value> = interior_tiles
            .iter()
            .map(|tile| Value::Text(tile.to_lowercase()))
            .chain(std::iter::once(Value::Real(sample_size / 100.0)))
            .collect();

        let mut statement = self.connection.prepare(&sql)?;
        let mut rows = statement.query(params_from_iter(bindings))?;

        let mut sample = Vec::new();
        while let Some(row) = rows.next()? {
            let gid: i64 = row.get(0)?;
            let raw_geometry: String = row.get(1)?;
            let geometry = geometry::decode_polygon(&raw_geometry)
                .with_context(|| format!("invalid geometry for building {gid}"))?;

            let mut percentiles = std::collections::BTreeMap::new();
            for (offset, (_, stat)) in ROOF_STATS.iter().enumerate() {
                percentiles.insert(stat.to_string(), row.get::<_, Option<f64>>(2 + offset)?);
            }

            sample.push(SampleRecord {
                gid,
                geometry,
                tile_id: row.get::<_, String>(2 + ROOF_STATS.len())?.to_lowercase(),
                ahn_version: row.get(3 + ROOF_STATS.len())?,
                percentiles,
                reference: None,
            });
        }

        Ok(sample)
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn index_columns(index: &ElevationIndex) -> Result<(String, String, String)> {
    Ok((
        quote_identifier(&index.fields.unit_name)?,
        quote_identifier(&index.fields.version)?,
        quote_identifier(&index.fields.geometry)?,
    ))
}

fn null_check(columns: &[&str]) -> Result<String> {
    Ok(columns
        .iter()
        .map(|column| quote_identifier(column).map(|quoted| format!("{quoted} IS NULL")))
        .collect::<Result<Vec<_>>>()?
        .join(" OR "))
}

/// Identifiers (schema/table/column names) originate from configuration
/// files; only a conservative charset is accepted before quoting.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        bail!("invalid identifier in configuration: {name:?}");
    }
    Ok(())
}

pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}
