use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};

/// Matches the creation-date line of an AHN LAS header dump, e.g.
/// `file creation day/year: 70/2010` (day-of-year / year).
pub fn creation_date_pattern() -> Result<Regex> {
    Regex::new(r"(?i)file creation day/year\s*:\s*(\d{1,3})\s*/\s*(\d{4})")
        .context("failed to compile creation date regex")
}

pub fn metadata_path(dir: &Path, filename_pattern: &str, tile_id: &str) -> PathBuf {
    dir.join(filename_pattern.replace("{tile}", tile_id))
}

/// Read the acquisition date of a tile from its metadata file.
///
/// A missing or unreadable file, a header without the creation-date line
/// and an out-of-range date are all per-tile failures: the tile is appended
/// to `corrupted` and the caller gets `None`, leaving the date unset.
pub fn get_file_date(
    dir: &Path,
    filename_pattern: &str,
    tile_id: &str,
    pattern: &Regex,
    corrupted: &mut Vec<String>,
) -> Option<NaiveDate> {
    let path = metadata_path(dir, filename_pattern, tile_id);

    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(tile = %tile_id, path = %path.display(), error = %err, "cannot read metadata file");
            corrupted.push(tile_id.to_string());
            return None;
        }
    };
    let header = String::from_utf8_lossy(&raw);

    let Some(captures) = pattern.captures(&header) else {
        warn!(tile = %tile_id, path = %path.display(), "no creation date line in metadata file");
        corrupted.push(tile_id.to_string());
        return None;
    };

    let day = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
    let year = captures.get(2).and_then(|m| m.as_str().parse::<i32>().ok());
    let date = match (day, year) {
        (Some(day), Some(year)) => NaiveDate::from_yo_opt(year, day),
        _ => None,
    };

    if date.is_none() {
        warn!(tile = %tile_id, path = %path.display(), "malformed creation date in metadata file");
        corrupted.push(tile_id.to_string());
    }
    date
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chrono::NaiveDate;

    use super::{creation_date_pattern, get_file_date, metadata_path};

    struct Fixture {
        dir: PathBuf,
    }

    impl Fixture {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("bag3d-ahn-{}-{}", name, std::process::id()));
            fs::create_dir_all(&dir).expect("fixture dir");
            Self { dir }
        }

        fn write(&self, filename: &str, contents: &str) {
            fs::write(self.dir.join(filename), contents).expect("fixture file");
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    #[test]
    fn parses_day_of_year_date_from_header() {
        let fixture = Fixture::new("parse");
        fixture.write(
            "c25gn1.txt",
            "---------------------------------------------------------\n\
             Header Summary\n\
             file signature:             'LASF'\n\
             file creation day/year:     70/2010\n\
             ---------------------------------------------------------\n",
        );

        let pattern = creation_date_pattern().expect("pattern");
        let mut corrupted = Vec::new();
        let date = get_file_date(&fixture.dir, "{tile}.txt", "c25gn1", &pattern, &mut corrupted);

        assert_eq!(date, NaiveDate::from_ymd_opt(2010, 3, 11));
        assert!(corrupted.is_empty());
    }

    #[test]
    fn missing_file_records_tile_as_corrupted() {
        let fixture = Fixture::new("missing");
        let pattern = creation_date_pattern().expect("pattern");
        let mut corrupted = Vec::new();

        let date = get_file_date(&fixture.dir, "{tile}.txt", "c25gn2", &pattern, &mut corrupted);

        assert!(date.is_none());
        assert_eq!(corrupted, vec!["c25gn2".to_string()]);
    }

    #[test]
    fn header_without_date_line_records_tile_as_corrupted() {
        let fixture = Fixture::new("nodate");
        fixture.write("c25gn3.txt", "file signature: 'LASF'\nnothing else here\n");

        let pattern = creation_date_pattern().expect("pattern");
        let mut corrupted = Vec::new();
        let date = get_file_date(&fixture.dir, "{tile}.txt", "c25gn3", &pattern, &mut corrupted);

        assert!(date.is_none());
        assert_eq!(corrupted, vec!["c25gn3".to_string()]);
    }

    #[test]
    fn out_of_range_day_is_a_per_tile_failure() {
        let fixture = Fixture::new("range");
        fixture.write("c25gn4.txt", "file creation day/year: 999/2010\n");

        let pattern = creation_date_pattern().expect("pattern");
        let mut corrupted = Vec::new();
        let date = get_file_date(&fixture.dir, "{tile}.txt", "c25gn4", &pattern, &mut corrupted);

        assert!(date.is_none());
        assert_eq!(corrupted, vec!["c25gn4".to_string()]);
    }

    #[test]
    fn pattern_substitutes_tile_placeholder() {
        let path = metadata_path(std::path::Path::new("/data/ahn2"), "unit_{tile}.laz.txt", "c25gn1");
        assert_eq!(path, PathBuf::from("/data/ahn2/unit_c25gn1.laz.txt"));
    }
}
