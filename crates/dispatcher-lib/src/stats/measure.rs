//! Sample pairing and error measures

use crate::error::StatsError;
use crate::models::Sample;
use tracing::debug;

/// Usable-pair floor only applies at this granularity
const FINEST_GRANULARITY_SECS: i64 = 30;

/// One observed sample matched with one predicted sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementPair {
    pub observed: Sample,
    pub predicted: Sample,
}

/// Pair each observed sample with the first unused predicted sample whose
/// timestamp is strictly less than one granularity step away.
pub fn pair_samples(
    observed: &[Sample],
    predicted: &[Sample],
    granularity_secs: i64,
) -> Vec<MeasurementPair> {
    let mut remaining: Vec<Sample> = predicted.to_vec();
    let mut pairs = Vec::with_capacity(observed.len().min(predicted.len()));

    for obs in observed {
        let position = remaining
            .iter()
            .position(|p| (p.timestamp - obs.timestamp).abs() < granularity_secs);

        if let Some(idx) = position {
            let predicted = remaining.remove(idx);
            pairs.push(MeasurementPair {
                observed: *obs,
                predicted,
            });
        }
    }

    if pairs.is_empty() {
        debug!(
            observed = observed.len(),
            predicted = predicted.len(),
            granularity_secs = granularity_secs,
            "No overlap between observed and predicted samples"
        );
    }

    pairs
}

fn check_floor(used: usize, granularity_secs: i64, min_data_points: usize) -> Result<(), StatsError> {
    if used == 0 {
        return Err(StatsError::NoDataPoints);
    }
    if granularity_secs == FINEST_GRANULARITY_SECS && used < min_data_points {
        return Err(StatsError::DataPointsNotEnough {
            found: used,
            required: min_data_points,
        });
    }
    Ok(())
}

/// Mean absolute percentage error, in percent.
///
/// Pairs with an observed value of zero are skipped.
pub fn mape(
    pairs: &[MeasurementPair],
    granularity_secs: i64,
    min_data_points: usize,
) -> Result<f64, StatsError> {
    let mut sum = 0.0;
    let mut used = 0usize;

    for pair in pairs {
        let observed = pair.observed.value;
        if observed == 0.0 {
            debug!(timestamp = pair.observed.timestamp, "Observed value is 0, skipping point in MAPE");
            continue;
        }
        sum += (pair.predicted.value - observed).abs() / observed;
        used += 1;
    }

    check_floor(used, granularity_secs, min_data_points)?;

    let result = 100.0 * (sum / used as f64);
    debug!(mape = result, points = used, "MAPE calculated");
    Ok(result)
}

/// Root mean square error with each difference divided by `normalizer`
/// before squaring.
pub fn rmse(
    pairs: &[MeasurementPair],
    normalizer: f64,
    granularity_secs: i64,
    min_data_points: usize,
) -> Result<f64, StatsError> {
    check_floor(pairs.len(), granularity_secs, min_data_points)?;

    let sum: f64 = pairs
        .iter()
        .map(|pair| ((pair.predicted.value - pair.observed.value) / normalizer).powi(2))
        .sum();

    let result = (sum / pairs.len() as f64).sqrt();
    debug!(rmse = result, points = pairs.len(), normalizer = normalizer, "RMSE calculated");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs_from(values: &[(f64, f64)]) -> Vec<MeasurementPair> {
        values
            .iter()
            .enumerate()
            .map(|(i, (observed, predicted))| MeasurementPair {
                observed: Sample::new(i as i64 * 3600, *observed),
                predicted: Sample::new(i as i64 * 3600, *predicted),
            })
            .collect()
    }

    #[test]
    fn test_mape_fixture() {
        let pairs = pairs_from(&[
            (100.0, 90.0),
            (80.0, 100.0),
            (100.0, 150.0),
            (200.0, 100.0),
            (50.0, 100.0),
        ]);
        let result = mape(&pairs, 3600, 5).unwrap();
        assert!((result - 47.0).abs() < 1e-9, "got {}", result);
    }

    #[test]
    fn test_rmse_fixture() {
        let pairs = pairs_from(&[
            (9.0, 9.0),
            (100.0, 94.0),
            (150.0, 150.0),
            (100.0, 103.0),
            (50.0, 50.0),
        ]);
        let result = rmse(&pairs, 1.0, 3600, 5).unwrap();
        assert!((result - 3.0).abs() < 1e-9, "got {}", result);
    }

    #[test]
    fn test_rmse_normalizes_before_squaring() {
        let pairs = pairs_from(&[(0.0, 2_000_000.0), (1_000_000.0, 1_000_000.0)]);
        // ((2e6 / 1e6)^2 + 0) / 2 = 2
        let result = rmse(&pairs, 1_000_000.0, 3600, 1).unwrap();
        assert!((result - 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_mape_skips_zero_observed() {
        let pairs = pairs_from(&[(0.0, 10.0), (100.0, 110.0)]);
        let result = mape(&pairs, 3600, 1).unwrap();
        assert!((result - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_mape_all_zero_observed_is_no_data() {
        let pairs = pairs_from(&[(0.0, 10.0), (0.0, 5.0)]);
        assert_eq!(mape(&pairs, 3600, 1), Err(StatsError::NoDataPoints));
        // RMSE keeps zero observations
        assert!(rmse(&pairs, 1.0, 3600, 1).is_ok());
    }

    #[test]
    fn test_empty_pairs_is_no_data() {
        assert_eq!(mape(&[], 3600, 0), Err(StatsError::NoDataPoints));
        assert_eq!(rmse(&[], 1.0, 3600, 0), Err(StatsError::NoDataPoints));
    }

    #[test]
    fn test_floor_only_applies_at_30s() {
        let pairs = pairs_from(&[(100.0, 90.0), (100.0, 110.0)]);
        assert_eq!(
            mape(&pairs, 30, 5),
            Err(StatsError::DataPointsNotEnough {
                found: 2,
                required: 5
            })
        );
        assert_eq!(
            rmse(&pairs, 1.0, 30, 5),
            Err(StatsError::DataPointsNotEnough {
                found: 2,
                required: 5
            })
        );
        assert!(mape(&pairs, 3600, 5).is_ok());
        assert!(rmse(&pairs, 1.0, 86400, 5).is_ok());
    }

    #[test]
    fn test_pairing_is_first_match_with_removal() {
        let observed = vec![Sample::new(100, 1.0), Sample::new(110, 2.0)];
        let predicted = vec![
            Sample::new(95, 10.0),
            Sample::new(105, 20.0),
            Sample::new(500, 30.0),
        ];
        let pairs = pair_samples(&observed, &predicted, 30);

        assert_eq!(pairs.len(), 2);
        // 105 is closer to 100, first match still wins
        assert_eq!(pairs[0].predicted.timestamp, 95);
        assert_eq!(pairs[1].predicted.timestamp, 105);
    }

    #[test]
    fn test_pairing_tolerance_is_strict() {
        let observed = vec![Sample::new(0, 1.0)];
        let predicted = vec![Sample::new(30, 1.0)];
        assert!(pair_samples(&observed, &predicted, 30).is_empty());

        let predicted = vec![Sample::new(-29, 1.0)];
        assert_eq!(pair_samples(&observed, &predicted, 30).len(), 1);
    }
}
