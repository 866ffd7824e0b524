//! Distribution helpers shared by the regime classifier and execution guard.
//!
//! Thresholds in the gate are expressed against the data's own history
//! (percentile ranks, z-scores) wherever a fixed constant would mis-fit
//! instruments with very different volatility.

use statrs::statistics::Statistics;

/// Mean of a slice; 0.0 when empty.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().mean()
}

/// Sample standard deviation; 0.0 with fewer than two points.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    data.iter().std_dev()
}

/// Percentile rank of `value` within `data` (0.0 to 1.0).
/// Uses midpoint interpolation: ties count as half.
pub fn percentile_rank(value: f64, data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.5;
    }
    let count_below = data.iter().filter(|&&x| x < value).count();
    let count_equal = data
        .iter()
        .filter(|&&x| (x - value).abs() < f64::EPSILON)
        .count();
    (count_below as f64 + 0.5 * count_equal as f64) / data.len() as f64
}

/// Z-score of `value` relative to `data`; 0.0 if data has no variance.
pub fn z_score_of(value: f64, data: &[f64]) -> f64 {
    let sd = std_dev(data);
    if sd < f64::EPSILON {
        return 0.0;
    }
    (value - mean(data)) / sd
}

/// Population coefficient of variation (std / mean); 0.0 for degenerate input.
pub fn coefficient_of_variation(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    if m.abs() < f64::EPSILON {
        return 0.0;
    }
    data.iter().population_std_dev() / m
}
