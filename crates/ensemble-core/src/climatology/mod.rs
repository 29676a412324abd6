//! Climatological baselines.
//!
//! A baseline is the per-group mean of a field over a reference period,
//! where the group is the calendar month or day-of-year of a continuous time
//! axis (historical runs) or the calendar month of the initialization axis
//! (forecasts). Two engines share one reduction:
//!
//!   [`HistoricalClimatology`]: `time` grouped by [`TimeFrequency`].
//!   [`ForecastClimatology`]: `init` grouped by month; lead and member kept.

pub mod forecast;
pub mod historical;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TimeFrequency;
use crate::error::{Error, Result};
use crate::eval::{map_indices, Deferred, EvalMode, Exec};
use crate::field::{GriddedField, SpatialGrid};
use crate::period::ReferencePeriod;
use crate::stats::nanmean;

pub use forecast::ForecastClimatology;
pub use historical::HistoricalClimatology;

/// Key a sample is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// Calendar month (1–12) of a continuous time axis.
    Month,
    /// Day of year (1–366) of a continuous time axis.
    DayOfYear,
    /// Calendar month of the initialization date.
    InitMonth,
}

impl Grouping {
    #[inline]
    pub fn key(self, date: NaiveDate) -> u32 {
        match self {
            Grouping::Month | Grouping::InitMonth => date.month(),
            Grouping::DayOfYear => date.ordinal(),
        }
    }

    /// Name of the coordinate the grouped axis becomes.
    pub fn coord_name(self) -> &'static str {
        match self {
            Grouping::Month | Grouping::InitMonth => "month",
            Grouping::DayOfYear => "dayofyear",
        }
    }
}

impl From<TimeFrequency> for Grouping {
    fn from(f: TimeFrequency) -> Self {
        match f {
            TimeFrequency::Month => Grouping::Month,
            TimeFrequency::DayOfYear => Grouping::DayOfYear,
        }
    }
}

/// Per-group mean baseline, laid out `[group][lead][member][point]`.
///
/// `period` records the literal reference years the baseline was built
/// from. A baseline deserialized without it is rejected by anomaly
/// computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimatologyBaseline {
    pub name: String,
    pub grouping: Grouping,
    /// Group keys in storage order.
    pub keys: Vec<u32>,
    #[serde(default)]
    pub lead: Option<Vec<f64>>,
    #[serde(default)]
    pub member: Option<Vec<u32>>,
    pub grid: SpatialGrid,
    #[serde(with = "crate::field::nan_as_null")]
    pub data: Vec<f64>,
    #[serde(default)]
    pub period: Option<ReferencePeriod>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl ClimatologyBaseline {
    #[inline]
    pub fn n_groups(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn n_lead(&self) -> usize {
        self.lead.as_ref().map_or(1, |l| l.len())
    }

    #[inline]
    pub fn n_member(&self) -> usize {
        self.member.as_ref().map_or(1, |m| m.len())
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.grid.n_points()
    }

    #[inline]
    pub fn block_len(&self) -> usize {
        self.n_lead() * self.n_member() * self.n_points()
    }

    /// Storage position of a group key.
    pub fn group_position(&self, key: u32) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }

    /// Values of one group, laid out `[lead][member][point]`.
    pub fn group_block(&self, key: u32) -> Option<&[f64]> {
        let g = self.group_position(key)?;
        let len = self.block_len();
        Some(&self.data[g * len..(g + 1) * len])
    }

    #[inline]
    pub fn value(&self, group: usize, lead: usize, member: usize, point: usize) -> f64 {
        let i = ((group * self.n_lead() + lead) * self.n_member() + member) * self.n_points() + point;
        self.data[i]
    }

    /// Reference period the baseline was built from.
    pub fn require_period(&self) -> Result<ReferencePeriod> {
        self.period.ok_or_else(|| {
            Error::Validation(format!(
                "climatology of `{}` carries no reference-period provenance",
                self.name
            ))
        })
    }

    pub fn check_shape(&self) -> Result<()> {
        let expected = self.n_groups() * self.block_len();
        if self.data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "climatology of `{}` holds {} values, expected {expected}",
                self.name,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Baseline averaged over members (member axis dropped).
    pub fn ensemble_mean(&self) -> ClimatologyBaseline {
        let (nl, nm, np) = (self.n_lead(), self.n_member(), self.n_points());
        let mut data = Vec::with_capacity(self.n_groups() * nl * np);
        for g in 0..self.n_groups() {
            for l in 0..nl {
                for p in 0..np {
                    data.push(nanmean((0..nm).map(|m| self.value(g, l, m, p))));
                }
            }
        }
        ClimatologyBaseline {
            member: None,
            data,
            ..self.clone()
        }
    }
}

/// Shared interface of the historical and forecast climatology engines.
pub trait Climatology {
    /// The normalized input field.
    fn field(&self) -> &Arc<GriddedField>;

    fn grouping(&self) -> Grouping;

    /// Keys the baseline is indexed by. Keys without samples in the
    /// reference period still appear, holding NaN.
    fn group_keys(&self) -> Vec<u32>;

    /// Per-group mean over `[start_year, end_year]`.
    ///
    /// Fails with a range error when the years are inverted or not fully
    /// inside the data. `mode` only decides when the reduction runs.
    fn generate_climo(
        &self,
        start_year: i32,
        end_year: i32,
        mode: EvalMode,
    ) -> Result<Deferred<ClimatologyBaseline>> {
        let period = ReferencePeriod::new(start_year, end_year)?;
        let field = self.field();
        period.check_within(field.year_extent()?)?;

        let grouping = self.grouping();
        let keys = self.group_keys();
        debug!(
            variable = %field.name,
            ?grouping,
            groups = keys.len(),
            %period,
            ?mode,
            "scheduling climatology"
        );
        let field = Arc::clone(field);
        Ok(mode.schedule(move |exec| build_baseline(&field, grouping, keys, period, exec)))
    }
}

/// Reduce `field` to its per-group mean over `period`.
pub(crate) fn build_baseline(
    field: &GriddedField,
    grouping: Grouping,
    keys: Vec<u32>,
    period: ReferencePeriod,
    exec: Exec,
) -> ClimatologyBaseline {
    let in_period = field.samples.indices_in(period);
    let block = field.block_len();

    let mut data = Vec::with_capacity(keys.len() * block);
    for &key in &keys {
        let members: Vec<usize> = in_period
            .iter()
            .copied()
            .filter(|&s| grouping.key(field.samples.dates[s]) == key)
            .collect();
        if members.is_empty() {
            debug!(key, "climatology group has no samples; filling with NaN");
        }
        data.extend(map_indices(exec, block, |j| {
            nanmean(members.iter().map(|&s| field.data[s * block + j]))
        }));
    }

    info!(variable = %field.name, %period, groups = keys.len(), "climatology built");

    ClimatologyBaseline {
        name: field.name.clone(),
        grouping,
        keys,
        lead: field.lead.clone(),
        member: field.member.clone(),
        grid: field.grid.clone(),
        data,
        period: Some(period),
        attrs: field.attrs.clone(),
    }
}
