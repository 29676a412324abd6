//! Scalar reductions shared by the engines. NaN is treated as missing
//! throughout: it is skipped by every reduction, and a reduction with no
//! finite input returns NaN.

use statrs::distribution::{ContinuousCDF, Normal};

/// Mean of the finite values; NaN when there are none.
pub fn nanmean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        if !v.is_nan() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Mean and population standard deviation (ddof = 0) of the finite values.
pub fn nanmean_std(values: &[f64]) -> (f64, f64) {
    let mean = nanmean(values.iter().copied());
    if mean.is_nan() {
        return (f64::NAN, f64::NAN);
    }
    let (ss, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(ss, n), &v| (ss + (v - mean).powi(2), n + 1));
    (mean, (ss / n as f64).sqrt())
}

/// Linear-interpolation quantile of pre-sorted data: `h = (n-1)·q`.
/// `None` when the slice is empty or `q` lies outside `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 || !(0.0..=1.0).contains(&q) {
        return None;
    }
    if n == 1 {
        return Some(sorted[0]);
    }
    let h = (n - 1) as f64 * q;
    let j = h.floor() as usize;
    let g = h - h.floor();
    if j + 1 >= n {
        Some(sorted[n - 1])
    } else {
        Some((1.0 - g) * sorted[j] + g * sorted[j + 1])
    }
}

/// Quantiles of the finite entries of `values` (reordered in place).
/// Every requested quantile is NaN when no finite value remains.
pub fn nanquantiles(values: &mut Vec<f64>, qs: &[f64]) -> Vec<f64> {
    values.retain(|v| !v.is_nan());
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    qs.iter()
        .map(|&q| quantile_sorted(values, q).unwrap_or(f64::NAN))
        .collect()
}

/// Gaussian CDF `Φ(x; μ, σ)`.
///
/// σ = 0 degenerates to a step at μ (`1` for `x ≥ μ`). NaN in any argument,
/// or a negative σ, yields NaN.
pub fn normal_cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    if x.is_nan() || mu.is_nan() || sigma.is_nan() || sigma < 0.0 {
        return f64::NAN;
    }
    if sigma == 0.0 {
        return if x >= mu { 1.0 } else { 0.0 };
    }
    match Normal::new(mu, sigma) {
        Ok(dist) => dist.cdf(x),
        Err(_) => f64::NAN,
    }
}

/// Ordinary least squares fit `y = slope·x + intercept` over pairs where
/// both values are finite. `None` with fewer than two pairs or a
/// degenerate `x` spread.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = pairs.iter().map(|p| (p.0 - mx).powi(2)).sum();
    let sxy: f64 = pairs.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    if sxx < 1e-14 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    Some((slope, intercept))
}
