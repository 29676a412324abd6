//! Tercile products.
//!
//! Pipeline:
//!   1. boundaries: 1/3 and 2/3 quantiles of the pooled (init × member)
//!      reforecast ensemble, per init month, lead and point.
//!   2. probability: one forecast's ensemble spread as a Gaussian, evaluated
//!      against the boundaries of the nearest init month.
//!   3. periods: display labels for the init and each lead bin.
//!
//! The boundary fields keep the historical names `f_lowmid` (1/3 quantile)
//! and `f_midhigh` (2/3 quantile); no orientation is inferred from them.

pub mod periods;
pub mod probability;

use std::collections::BTreeSet;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StatsConfig;
use crate::coords::prepare_field;
use crate::error::{Error, Result};
use crate::eval::{map_indices_with, EvalMode};
use crate::field::{GriddedField, SampleDim, SpatialGrid};
use crate::period::ReferencePeriod;
use crate::stats::{nanmean, nanquantiles};

pub use periods::{forecast_period_labels, ForecastPeriods};
pub use probability::{generate_tercile_probability, TercileProbability};

const TERCILES: [f64; 2] = [1.0 / 3.0, 2.0 / 3.0];

/// Tercile boundaries laid out `[month][lead][point]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TercileBoundary {
    pub name: String,
    /// Distinct initialization months present, ascending.
    pub month: Vec<u32>,
    #[serde(default)]
    pub lead: Option<Vec<f64>>,
    pub grid: SpatialGrid,
    /// 1/3 quantile of the pooled ensemble.
    #[serde(with = "crate::field::nan_as_null")]
    pub f_lowmid: Vec<f64>,
    /// 2/3 quantile of the pooled ensemble.
    #[serde(with = "crate::field::nan_as_null")]
    pub f_midhigh: Vec<f64>,
    pub period: ReferencePeriod,
}

impl TercileBoundary {
    #[inline]
    pub fn n_lead(&self) -> usize {
        self.lead.as_ref().map_or(1, |l| l.len())
    }

    /// Fails with a shape mismatch unless both boundary arrays match the
    /// month, lead and grid extents.
    pub fn check_shape(&self) -> Result<()> {
        let expected = self.month.len() * self.n_lead() * self.grid.n_points();
        for (what, values) in [("f_lowmid", &self.f_lowmid), ("f_midhigh", &self.f_midhigh)] {
            if values.len() != expected {
                return Err(Error::ShapeMismatch(format!(
                    "{what} of `{}` holds {} values, expected {expected}",
                    self.name,
                    values.len()
                )));
            }
        }
        Ok(())
    }

    #[inline]
    fn offset(&self, month: usize, lead: usize, point: usize) -> usize {
        (month * self.n_lead() + lead) * self.grid.n_points() + point
    }

    #[inline]
    pub fn lowmid(&self, month: usize, lead: usize, point: usize) -> f64 {
        self.f_lowmid[self.offset(month, lead, point)]
    }

    #[inline]
    pub fn midhigh(&self, month: usize, lead: usize, point: usize) -> f64 {
        self.f_midhigh[self.offset(month, lead, point)]
    }

    /// Position of the init month numerically closest to `month`; the
    /// earlier month wins a tie.
    pub fn nearest_month(&self, month: u32) -> Option<usize> {
        self.month
            .iter()
            .enumerate()
            .min_by_key(|(_, &m)| (m as i64 - month as i64).abs())
            .map(|(i, _)| i)
    }
}

/// Lead-time bin edges; bin `i` holds leads in `(edges[i], edges[i+1]]`.
///
/// `[0, 3, 6, 9, 12]` over mid-month leads 0.5–11.5 gives four three-month
/// means. A lead sitting exactly on the first edge falls in no bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct LeadBins {
    edges: Vec<f64>,
}

impl LeadBins {
    /// Fails with a range error unless there are at least two finite,
    /// strictly increasing edges.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Range(format!("lead bins need at least two edges, got {edges:?}")));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Range(format!("lead bin edges must increase strictly: {edges:?}")));
        }
        Ok(Self { edges })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn bin_of(&self, lead: f64) -> Option<usize> {
        self.edges
            .windows(2)
            .position(|w| lead > w[0] && lead <= w[1])
    }

    /// Mean of `value(lead_index)` over the leads of each bin; NaN for a
    /// bin without leads.
    pub(crate) fn reduce<F: Fn(usize) -> f64>(&self, leads: &[f64], value: F) -> Vec<f64> {
        (0..self.n_bins())
            .map(|b| {
                nanmean(
                    leads
                        .iter()
                        .enumerate()
                        .filter(|(_, &lead)| self.bin_of(lead) == Some(b))
                        .map(|(l, _)| value(l)),
                )
            })
            .collect()
    }
}

impl TryFrom<Vec<f64>> for LeadBins {
    type Error = Error;

    fn try_from(edges: Vec<f64>) -> Result<Self> {
        LeadBins::new(edges)
    }
}

impl From<LeadBins> for Vec<f64> {
    fn from(bins: LeadBins) -> Self {
        bins.edges
    }
}

/// Tercile boundary estimation over an initialized reforecast.
pub struct TercileEngine {
    field: GriddedField,
    mode: EvalMode,
}

impl TercileEngine {
    /// Normalizes coordinates and requires an `init` sample axis.
    pub fn new(field: GriddedField, config: &StatsConfig) -> Result<Self> {
        let field = prepare_field(field, config)?;
        field.check_sample_dim(SampleDim::Init)?;
        Ok(Self { field, mode: config.evaluation })
    }

    pub fn field(&self) -> &GriddedField {
        &self.field
    }

    /// 1/3 and 2/3 quantiles of the (init × member) ensemble per init
    /// month, lead and point, over inits in `[start_year, end_year]`.
    ///
    /// Fails with a range error for inverted years or when no init falls in
    /// the range.
    pub fn generate_tercile(&self, start_year: i32, end_year: i32) -> Result<TercileBoundary> {
        let period = ReferencePeriod::new(start_year, end_year)?;
        let field = &self.field;
        let in_period = field.samples.indices_in(period);
        if in_period.is_empty() {
            return Err(Error::Range(format!(
                "no initializations of `{}` fall in {period}",
                field.name
            )));
        }

        let months: Vec<u32> = in_period
            .iter()
            .map(|&s| field.samples.dates[s].month())
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();
        debug!(variable = %field.name, %period, ?months, "computing tercile boundaries");

        let (nl, nm, np) = (field.n_lead(), field.n_member(), field.n_points());
        let exec = self.mode.exec();
        let mut f_lowmid = Vec::with_capacity(months.len() * nl * np);
        let mut f_midhigh = Vec::with_capacity(months.len() * nl * np);

        for &month in &months {
            let inits: Vec<usize> = in_period
                .iter()
                .copied()
                .filter(|&s| field.samples.dates[s].month() == month)
                .collect();
            let bounds = map_indices_with(exec, nl * np, |j| {
                let (l, p) = (j / np, j % np);
                let mut allens: Vec<f64> = Vec::with_capacity(inits.len() * nm);
                for &s in &inits {
                    for m in 0..nm {
                        allens.push(field.get(s, l, m, p));
                    }
                }
                let q = nanquantiles(&mut allens, &TERCILES);
                (q[0], q[1])
            });
            for (lo, hi) in bounds {
                f_lowmid.push(lo);
                f_midhigh.push(hi);
            }
        }

        info!(variable = %field.name, %period, months = months.len(), "tercile boundaries computed");

        Ok(TercileBoundary {
            name: field.name.clone(),
            month: months,
            lead: field.lead.clone(),
            grid: field.grid.clone(),
            f_lowmid,
            f_midhigh,
            period,
        })
    }
}
