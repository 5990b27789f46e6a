use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::model::{DiffRecord, SampleRecord};

/// Per-record, per-percentile `computed - reference` differences.
///
/// A percentile contributes a difference only when both sides carry a
/// usable height; zero heights are sentinels for "no points" and count as
/// missing. Identifying fields pass through unchanged.
pub fn compute_diffs(sample: &[SampleRecord], stats: &[String]) -> Vec<DiffRecord> {
    let mut records = Vec::with_capacity(sample.len());

    for footprint in sample {
        let mut diffs = BTreeMap::new();
        for stat in stats {
            let computed = usable(footprint.percentiles.get(stat).copied().flatten());
            let reference = usable(
                footprint
                    .reference
                    .as_ref()
                    .and_then(|heights| heights.get(stat).copied())
                    .flatten(),
            );
            let diff = match (computed, reference) {
                (Some(computed), Some(reference)) => Some(computed - reference),
                _ => None,
            };
            diffs.insert(stat.clone(), diff);
        }

        records.push(DiffRecord {
            gid: footprint.gid,
            tile_id: footprint.tile_id.clone(),
            ahn_version: footprint.ahn_version,
            diffs,
        });
    }

    records
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|height| *height != 0.0)
}

/// Root mean square error of a set of signed differences.
pub fn rmse(diffs: &[f64]) -> f64 {
    let sum: f64 = diffs.iter().map(|diff| diff * diff).sum();
    (sum / diffs.len() as f64).sqrt()
}

/// RMSE per percentile across the whole sample, rounded to 2 decimals.
///
/// A percentile without a single usable difference is omitted from the
/// report rather than divided by zero.
pub fn compute_rmse(diffs: &[DiffRecord], stats: &[String]) -> BTreeMap<String, f64> {
    let mut report = BTreeMap::new();

    for stat in stats {
        let usable: Vec<f64> = diffs
            .iter()
            .filter_map(|record| record.diffs.get(stat).copied().flatten())
            .collect();

        if usable.is_empty() {
            warn!(stat = %stat, "no usable differences, omitting from report");
            continue;
        }

        debug!(stat = %stat, count = usable.len(), "aggregating differences");
        report.insert(stat.clone(), round2(rmse(&usable)));
    }

    report
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{compute_diffs, compute_rmse, rmse};
    use crate::geometry::square;
    use crate::model::SampleRecord;

    fn stat_names() -> Vec<String> {
        vec!["percentile_0.50".to_string(), "percentile_0.99".to_string()]
    }

    fn record(
        gid: i64,
        computed: &[(&str, Option<f64>)],
        reference: Option<&[(&str, Option<f64>)]>,
    ) -> SampleRecord {
        let to_map = |pairs: &[(&str, Option<f64>)]| {
            pairs
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect::<BTreeMap<_, _>>()
        };

        SampleRecord {
            gid,
            geometry: square(0.0, 0.0, 1.0),
            tile_id: "c25gn1".to_string(),
            ahn_version: Some(2),
            percentiles: to_map(computed),
            reference: reference.map(to_map),
        }
    }

    #[test]
    fn identical_computed_and_reference_yield_zero_diffs() {
        let sample = vec![record(
            1,
            &[("percentile_0.50", Some(4.2)), ("percentile_0.99", Some(9.1))],
            Some(&[("percentile_0.50", Some(4.2)), ("percentile_0.99", Some(9.1))]),
        )];

        let diffs = compute_diffs(&sample, &stat_names());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].diffs["percentile_0.50"], Some(0.0));
        assert_eq!(diffs[0].diffs["percentile_0.99"], Some(0.0));
    }

    #[test]
    fn missing_or_zero_heights_produce_null_diffs() {
        let sample = vec![record(
            1,
            &[("percentile_0.50", None), ("percentile_0.99", Some(0.0))],
            Some(&[("percentile_0.50", Some(3.0)), ("percentile_0.99", Some(3.0))]),
        )];

        let diffs = compute_diffs(&sample, &stat_names());
        assert_eq!(diffs[0].diffs["percentile_0.50"], None);
        assert_eq!(diffs[0].diffs["percentile_0.99"], None);
    }

    #[test]
    fn identifying_fields_pass_through() {
        let sample = vec![record(7, &[("percentile_0.50", Some(1.0))], None)];
        let diffs = compute_diffs(&sample, &stat_names());
        assert_eq!(diffs[0].gid, 7);
        assert_eq!(diffs[0].tile_id, "c25gn1");
        assert_eq!(diffs[0].ahn_version, Some(2));
    }

    #[test]
    fn rmse_of_single_difference_is_its_absolute_value() {
        assert_eq!(rmse(&[-2.5]), 2.5);
        assert_eq!(rmse(&[2.5]), 2.5);
    }

    #[test]
    fn rmse_is_sign_invariant() {
        assert_eq!(rmse(&[3.0, -3.0]), rmse(&[3.0, 3.0]));
        assert_eq!(rmse(&[3.0, -3.0]), 3.0);
    }

    #[test]
    fn matching_sample_reports_zero_rmse_for_every_stat() {
        let sample = vec![
            record(
                1,
                &[("percentile_0.50", Some(4.2)), ("percentile_0.99", Some(9.1))],
                Some(&[("percentile_0.50", Some(4.2)), ("percentile_0.99", Some(9.1))]),
            ),
            record(
                2,
                &[("percentile_0.50", Some(2.0)), ("percentile_0.99", Some(5.5))],
                Some(&[("percentile_0.50", Some(2.0)), ("percentile_0.99", Some(5.5))]),
            ),
        ];

        let diffs = compute_diffs(&sample, &stat_names());
        let report = compute_rmse(&diffs, &stat_names());
        assert_eq!(report["percentile_0.50"], 0.0);
        assert_eq!(report["percentile_0.99"], 0.0);
    }

    #[test]
    fn stat_without_usable_diffs_is_omitted() {
        let sample = vec![record(
            1,
            &[("percentile_0.50", Some(4.0)), ("percentile_0.99", None)],
            Some(&[("percentile_0.50", Some(3.0)), ("percentile_0.99", Some(3.0))]),
        )];

        let diffs = compute_diffs(&sample, &stat_names());
        let report = compute_rmse(&diffs, &stat_names());
        assert_eq!(report.get("percentile_0.50"), Some(&1.0));
        assert_eq!(report.get("percentile_0.99"), None);
    }

    #[test]
    fn report_values_are_rounded_to_two_decimals() {
        let sample = vec![record(
            1,
            &[("percentile_0.50", Some(1.234_5))],
            Some(&[("percentile_0.50", Some(1.0))]),
        )];

        let stats = vec!["percentile_0.50".to_string()];
        let diffs = compute_diffs(&sample, &stats);
        let report = compute_rmse(&diffs, &stats);
        assert_eq!(report["percentile_0.50"], 0.23);
    }
}
