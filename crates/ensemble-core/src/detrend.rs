//! Linear trend removal along valid time.
//!
//! Each grid point gets one OLS line of value against the decimal year of
//! the forecast's valid time (init + lead), fitted over every lead and member
//! of the inits inside the reference period. The whole line is removed from
//! every sample, so detrended values are centered near zero.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::eval::{map_indices_with, EvalMode};
use crate::field::{GriddedField, SpatialGrid};
use crate::period::ReferencePeriod;
use crate::stats::linear_fit;

/// Per-point trend line `value = slope · year + intercept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendCoefficients {
    pub name: String,
    pub grid: SpatialGrid,
    /// Units per year; NaN where the fit is undetermined.
    #[serde(with = "crate::field::nan_as_null")]
    pub slope: Vec<f64>,
    #[serde(with = "crate::field::nan_as_null")]
    pub intercept: Vec<f64>,
    pub period: ReferencePeriod,
}

impl TrendCoefficients {
    #[inline]
    pub fn trend_at(&self, point: usize, year: f64) -> f64 {
        self.slope[point] * year + self.intercept[point]
    }
}

/// Fractional year of `date`, e.g. 2000-07-02 → ~2000.5.
pub fn decimal_year(date: NaiveDate) -> f64 {
    let days = if NaiveDate::from_ymd_opt(date.year(), 2, 29).is_some() { 366.0 } else { 365.0 };
    date.year() as f64 + date.ordinal0() as f64 / days
}

fn valid_times(field: &GriddedField) -> Vec<Vec<f64>> {
    let leads: Vec<f64> = match &field.lead {
        Some(lead) => lead.clone(),
        None => vec![0.0],
    };
    field
        .samples
        .dates
        .iter()
        .map(|&d| {
            let t0 = decimal_year(d);
            leads.iter().map(|l| t0 + l / 12.0).collect()
        })
        .collect()
}

/// Fit the per-point trend over samples in `[start_year, end_year]`.
///
/// Fails with a range error for inverted or out-of-extent years. `mode`
/// picks the executor for the per-point fits.
pub fn fit_linear_trend(
    field: &GriddedField,
    start_year: i32,
    end_year: i32,
    mode: EvalMode,
) -> Result<TrendCoefficients> {
    let period = ReferencePeriod::new(start_year, end_year)?;
    period.check_within(field.year_extent()?)?;
    let samples = field.samples.indices_in(period);
    if samples.is_empty() {
        return Err(Error::Range(format!("no samples of `{}` fall in {period}", field.name)));
    }
    debug!(variable = %field.name, %period, samples = samples.len(), "fitting linear trend");

    let times = valid_times(field);
    let (nl, nm, np) = (field.n_lead(), field.n_member(), field.n_points());
    let fits = map_indices_with(mode.exec(), np, |p| {
        let mut x = Vec::with_capacity(samples.len() * nl * nm);
        let mut y = Vec::with_capacity(samples.len() * nl * nm);
        for &s in &samples {
            for l in 0..nl {
                for m in 0..nm {
                    x.push(times[s][l]);
                    y.push(field.get(s, l, m, p));
                }
            }
        }
        linear_fit(&x, &y).unwrap_or((f64::NAN, f64::NAN))
    });

    let (slope, intercept): (Vec<f64>, Vec<f64>) = fits.into_iter().unzip();
    info!(
        variable = %field.name,
        %period,
        undetermined = slope.iter().filter(|s| s.is_nan()).count(),
        "linear trend fitted"
    );

    Ok(TrendCoefficients {
        name: field.name.clone(),
        grid: field.grid.clone(),
        slope,
        intercept,
        period,
    })
}

/// Subtract the fitted line from every sample of `field`.
pub fn remove_trend(field: &GriddedField, trend: &TrendCoefficients) -> Result<GriddedField> {
    field.grid.check_same_shape(&trend.grid, "trend")?;
    let times = valid_times(field);
    let mut out = field.clone();
    for (s, sample_times) in times.iter().enumerate() {
        for (l, &t) in sample_times.iter().enumerate() {
            for m in 0..field.n_member() {
                for p in 0..field.n_points() {
                    out.set(s, l, m, p, field.get(s, l, m, p) - trend.trend_at(p, t));
                }
            }
        }
    }
    out.attrs
        .insert("detrended".to_string(), format!("linear, fitted over {}", trend.period));
    Ok(out)
}
