use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::geometry;
use crate::model::{AhnVersion, TileRecord};

/// Find the AHN3 tiles that lie on the border of AHN3 coverage.
///
/// AHN3 does not cover the whole country, AHN2 does. A tile of the newer
/// survey whose extent touches (shares boundary, no interior) any AHN2 tile
/// only partially contains points, clipped at natural boundaries, and must
/// be processed as AHN2 extended with AHN3 data. The returned records are
/// therefore relabeled to AHN2, geometry preserved, sorted and distinct by
/// tile id.
///
/// With fewer than two survey versions present there is no border and the
/// result is empty.
pub fn detect_border_tiles(index: &[TileRecord]) -> Vec<TileRecord> {
    let ahn2: Vec<&TileRecord> = index
        .iter()
        .filter(|tile| tile.ahn_version == Some(AhnVersion::Ahn2))
        .collect();
    let ahn3: Vec<&TileRecord> = index
        .iter()
        .filter(|tile| tile.ahn_version == Some(AhnVersion::Ahn3))
        .collect();

    if ahn2.is_empty() || ahn3.is_empty() {
        info!(
            ahn2 = ahn2.len(),
            ahn3 = ahn3.len(),
            "fewer than two survey versions in the tile index, no border tiles"
        );
        return Vec::new();
    }

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut border = Vec::new();

    for tile in &ahn3 {
        if seen.contains(tile.tile_id.as_str()) {
            continue;
        }

        if ahn2
            .iter()
            .any(|older| geometry::touches(&tile.geometry, &older.geometry))
        {
            debug!(tile = %tile.tile_id, "tile touches AHN2 coverage");
            seen.insert(tile.tile_id.as_str());

            let mut relabeled = (*tile).clone();
            relabeled.ahn_version = Some(AhnVersion::Ahn2);
            border.push(relabeled);
        }
    }

    border.sort_by(|a, b| a.tile_id.cmp(&b.tile_id));
    border
}
