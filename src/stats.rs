//! Order statistics used as detector baselines.
//!
//! Every function is total: an empty (or all non-finite) input yields 0.0 so callers
//! can gate on the value instead of handling an error.

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Percentile with linear interpolation between order statistics. `p` is in [0, 100]
/// and clamped.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let sorted = sorted_finite(values);
    percentile_sorted(&sorted, p)
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = if p.is_finite() { p.clamp(0.0, 100.0) } else { 50.0 };
    let rank = (sorted.len() - 1) as f64 * p / 100.0;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Interquartile range, P75 − P25.
pub fn iqr(values: &[f64]) -> f64 {
    let sorted = sorted_finite(values);
    percentile_sorted(&sorted, 75.0) - percentile_sorted(&sorted, 25.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_input_yields_zero() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(percentile(&[], 90.0), 0.0);
        assert_eq!(iqr(&[]), 0.0);
    }

    #[test]
    fn median_odd_and_even() {
        assert!(approx(median(&[3.0, 1.0, 2.0]), 2.0));
        assert!(approx(median(&[4.0, 1.0, 3.0, 2.0]), 2.5));
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let values = [10.0, 20.0, 30.0, 40.0];
        // rank = 3 * 0.25 = 0.75 → 10 + 0.75 * 10
        assert!(approx(percentile(&values, 25.0), 17.5));
        assert!(approx(percentile(&values, 0.0), 10.0));
        assert!(approx(percentile(&values, 100.0), 40.0));
        assert!(approx(percentile(&values, 250.0), 40.0));
    }

    #[test]
    fn iqr_of_uniform_series() {
        let values: Vec<f64> = (1..=9).map(f64::from).collect();
        // P25 = 3, P75 = 7
        assert!(approx(iqr(&values), 4.0));
        assert!(approx(iqr(&[50.0; 8]), 0.0));
    }

    #[test]
    fn non_finite_values_are_ignored() {
        assert!(approx(median(&[f64::NAN, 1.0, 3.0, f64::INFINITY]), 2.0));
    }
}
