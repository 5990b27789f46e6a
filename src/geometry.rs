use anyhow::{Context, Result, bail};
use geo::{Contains, LineString, Point, Polygon, Relate};

/// Decode a polygon from its stored form: a JSON array of rings, the first
/// ring being the exterior shell.
pub fn decode_polygon(raw: &str) -> Result<Polygon<f64>> {
    let rings: Vec<Vec<[f64; 2]>> =
        serde_json::from_str(raw).context("failed to parse polygon rings")?;
    polygon_from_rings(&rings)
}

pub fn polygon_from_rings(rings: &[Vec<[f64; 2]>]) -> Result<Polygon<f64>> {
    let Some((exterior, interiors)) = rings.split_first() else {
        bail!("polygon has no rings");
    };
    if exterior.len() < 3 {
        bail!("polygon exterior has fewer than 3 vertices");
    }

    Ok(Polygon::new(
        ring_to_line_string(exterior),
        interiors.iter().map(|ring| ring_to_line_string(ring)).collect(),
    ))
}

pub fn encode_polygon(polygon: &Polygon<f64>) -> Result<String> {
    let mut rings = vec![line_string_to_ring(polygon.exterior())];
    for interior in polygon.interiors() {
        rings.push(line_string_to_ring(interior));
    }
    serde_json::to_string(&rings).context("failed to serialize polygon rings")
}

/// DE-9IM touches: the geometries share boundary points but no interior.
pub fn touches(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    a.relate(b).is_touches()
}

pub fn contains_point(polygon: &Polygon<f64>, x: f64, y: f64) -> bool {
    polygon.contains(&Point::new(x, y))
}

fn ring_to_line_string(ring: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(
        ring.iter()
            .map(|vertex| (vertex[0], vertex[1]))
            .collect::<Vec<_>>(),
    )
}

fn line_string_to_ring(line: &LineString<f64>) -> Vec<[f64; 2]> {
    line.coords().map(|coord| [coord.x, coord.y]).collect()
}

#[cfg(test)]
pub(crate) fn square(min_x: f64, min_y: f64, size: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (min_x, min_y),
            (min_x + size, min_y),
            (min_x + size, min_y + size),
            (min_x, min_y + size),
            (min_x, min_y),
        ]),
        vec![],
    )
}

#[cfg(test)]
mod tests {
    use super::{contains_point, decode_polygon, encode_polygon, square, touches};

    #[test]
    fn adjacent_squares_touch() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(1.0, 0.0, 1.0);
        assert!(touches(&a, &b));
        assert!(touches(&b, &a));
    }

    #[test]
    fn corner_contact_is_touching() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(1.0, 1.0, 1.0);
        assert!(touches(&a, &b));
    }

    #[test]
    fn overlapping_squares_do_not_touch() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(1.0, 1.0, 2.0);
        assert!(!touches(&a, &b));
    }

    #[test]
    fn disjoint_squares_do_not_touch() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(5.0, 5.0, 1.0);
        assert!(!touches(&a, &b));
    }

    #[test]
    fn polygon_round_trips_through_ring_encoding() {
        let polygon = square(2.0, 3.0, 4.0);
        let encoded = encode_polygon(&polygon).expect("encode should succeed");
        let decoded = decode_polygon(&encoded).expect("decode should succeed");
        assert_eq!(polygon, decoded);
    }

    #[test]
    fn decode_rejects_degenerate_rings() {
        assert!(decode_polygon("[]").is_err());
        assert!(decode_polygon("[[[0.0,0.0],[1.0,1.0]]]").is_err());
        assert!(decode_polygon("not json").is_err());
    }

    #[test]
    fn cell_center_containment() {
        let polygon = square(0.0, 0.0, 2.0);
        assert!(contains_point(&polygon, 1.0, 1.0));
        assert!(!contains_point(&polygon, 3.0, 1.0));
    }
}
