//! Tercile probabilities of a single forecast.
//!
//! The ensemble at each (lead bin, point) is summarized as a Gaussian with
//! the members' mean and population spread, and the reforecast boundaries
//! are read off its CDF.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StatsConfig;
use crate::coords::prepare_field;
use crate::error::{Error, Result};
use crate::eval::map_indices_with;
use crate::field::{GriddedField, SampleDim, SpatialGrid};
use crate::period::ReferencePeriod;
use crate::stats::{nanmean_std, normal_cdf};

use super::{LeadBins, TercileBoundary};

/// Lower/middle/upper tercile probabilities laid out `[lead][point]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TercileProbability {
    pub name: String,
    pub init: NaiveDate,
    /// Init month of the boundaries used.
    pub boundary_month: u32,
    /// Native leads, or bin indices `0..n` when binned.
    pub lead: Vec<f64>,
    #[serde(default)]
    pub lead_bins: Option<LeadBins>,
    pub grid: SpatialGrid,
    #[serde(with = "crate::field::nan_as_null")]
    pub prob_lower: Vec<f64>,
    #[serde(with = "crate::field::nan_as_null")]
    pub prob_middle: Vec<f64>,
    #[serde(with = "crate::field::nan_as_null")]
    pub prob_upper: Vec<f64>,
    /// Signed dominant probability: `-p` lower, `0` middle, `+p` upper.
    #[serde(with = "crate::field::nan_as_null")]
    pub tercile_prob_max: Vec<f64>,
    pub period: ReferencePeriod,
}

impl TercileProbability {
    #[inline]
    fn offset(&self, lead: usize, point: usize) -> usize {
        lead * self.grid.n_points() + point
    }

    /// `[lower, middle, upper]` at one (lead, point).
    pub fn probs(&self, lead: usize, point: usize) -> [f64; 3] {
        let i = self.offset(lead, point);
        [self.prob_lower[i], self.prob_middle[i], self.prob_upper[i]]
    }

    pub fn prob_max(&self, lead: usize, point: usize) -> f64 {
        self.tercile_prob_max[self.offset(lead, point)]
    }
}

/// Tercile probabilities for a forecast holding exactly one init.
///
/// Uses the boundaries of the init month closest to the forecast's. With
/// `lead_bins`, members and boundaries are both averaged over each bin
/// before the distribution is fitted. Coordinates go through the same
/// alias and 0–360 handling as every engine input.
pub fn generate_tercile_probability(
    single_init_field: &GriddedField,
    varname: &str,
    tercile_boundaries: &TercileBoundary,
    lead_bins: Option<&LeadBins>,
    config: &StatsConfig,
) -> Result<TercileProbability> {
    single_init_field.check_variable(varname)?;
    single_init_field.check_shape()?;
    single_init_field.check_sample_dim(SampleDim::Init)?;
    if single_init_field.n_samples() != 1 {
        return Err(Error::ShapeMismatch(format!(
            "expected a single initialization, `{varname}` holds {}",
            single_init_field.n_samples()
        )));
    }
    tercile_boundaries.check_shape()?;
    let field = prepare_field(single_init_field.clone(), config)?;
    field.grid.check_same_shape(&tercile_boundaries.grid, "tercile boundaries")?;
    if field.n_lead() != tercile_boundaries.n_lead() {
        return Err(Error::ShapeMismatch(format!(
            "forecast has {} leads, tercile boundaries have {}",
            field.n_lead(),
            tercile_boundaries.n_lead()
        )));
    }

    let init = field.samples.dates[0];
    let month_idx = tercile_boundaries.nearest_month(init.month()).ok_or_else(|| {
        Error::Validation("tercile boundaries hold no initialization months".to_string())
    })?;
    let boundary_month = tercile_boundaries.month[month_idx];
    debug!(variable = varname, %init, boundary_month, binned = lead_bins.is_some(), "tercile probability");

    let leads: Vec<f64> = field
        .lead
        .clone()
        .unwrap_or_else(|| (0..field.n_lead()).map(|l| l as f64).collect());
    let out_lead: Vec<f64> = match lead_bins {
        Some(bins) => (0..bins.n_bins()).map(|b| b as f64).collect(),
        None => leads.clone(),
    };
    let (nb, nm, np) = (out_lead.len(), field.n_member(), field.n_points());

    let per_point = map_indices_with(config.evaluation.exec(), np, |p| {
        let members: Vec<Vec<f64>> = (0..nm)
            .map(|m| along_leads(lead_bins, &leads, |l| field.get(0, l, m, p)))
            .collect();
        let lowmid = along_leads(lead_bins, &leads, |l| tercile_boundaries.lowmid(month_idx, l, p));
        let midhigh = along_leads(lead_bins, &leads, |l| tercile_boundaries.midhigh(month_idx, l, p));

        (0..nb)
            .map(|b| {
                let ens: Vec<f64> = members.iter().map(|v| v[b]).collect();
                let (mu, sigma) = nanmean_std(&ens);
                tercile_probs(lowmid[b], midhigh[b], mu, sigma)
            })
            .collect::<Vec<[f64; 3]>>()
    });

    let mut prob_lower = vec![f64::NAN; nb * np];
    let mut prob_middle = vec![f64::NAN; nb * np];
    let mut prob_upper = vec![f64::NAN; nb * np];
    let mut tercile_prob_max = vec![f64::NAN; nb * np];
    for (p, bins) in per_point.iter().enumerate() {
        for (b, probs) in bins.iter().enumerate() {
            let i = b * np + p;
            prob_lower[i] = probs[0];
            prob_middle[i] = probs[1];
            prob_upper[i] = probs[2];
            tercile_prob_max[i] = signed_max(*probs);
        }
    }

    info!(variable = varname, %init, leads = nb, "tercile probability computed");

    Ok(TercileProbability {
        name: field.name.clone(),
        init,
        boundary_month,
        lead: out_lead,
        lead_bins: lead_bins.cloned(),
        grid: field.grid.clone(),
        prob_lower,
        prob_middle,
        prob_upper,
        tercile_prob_max,
        period: tercile_boundaries.period,
    })
}

/// `value` per native lead, or its mean per lead bin.
fn along_leads<F: Fn(usize) -> f64>(bins: Option<&LeadBins>, leads: &[f64], value: F) -> Vec<f64> {
    match bins {
        Some(bins) => bins.reduce(leads, value),
        None => (0..leads.len()).map(value).collect(),
    }
}

fn tercile_probs(lowmid: f64, midhigh: f64, mu: f64, sigma: f64) -> [f64; 3] {
    if [lowmid, midhigh, mu, sigma].iter().any(|v| v.is_nan()) {
        return [f64::NAN; 3];
    }
    let lower = normal_cdf(lowmid, mu, sigma);
    let upper = 1.0 - normal_cdf(midhigh, mu, sigma);
    [lower, 1.0 - lower - upper, upper]
}

/// Category (-1, 0, +1) of the largest probability times that probability.
fn signed_max(probs: [f64; 3]) -> f64 {
    if probs.iter().any(|p| p.is_nan()) {
        return f64::NAN;
    }
    let mut best = 0;
    for i in 1..3 {
        if probs[i] > probs[best] {
            best = i;
        }
    }
    (best as f64 - 1.0) * probs[best]
}
