//! Marine-heatwave detection on initialized forecasts.
//!
//! Pipeline (batch):
//!   detrend (optional) → forecast climatology → anomaly → pooled quantile
//!   threshold → per-init member exceedance statistics.
//!
//! A member exceeds when its anomaly is at or above the threshold; the
//! comparison is inclusive.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anomaly::{broadcast_value, check_broadcast, AnomalyEngine};
use crate::climatology::{ClimatologyBaseline, ForecastClimatology};
use crate::config::StatsConfig;
use crate::coords::prepare_field;
use crate::detrend::{fit_linear_trend, remove_trend, TrendCoefficients};
use crate::error::{Error, Result};
use crate::eval::{map_indices_with, EvalMode, Exec};
use crate::field::{GriddedField, SampleDim, SpatialGrid};
use crate::period::ReferencePeriod;
use crate::quantile::{QuantileEngine, QuantileThreshold};
use crate::stats::nanmean;

/// Exceedance statistics of one initialization.
///
/// `member_exceedance` is laid out `[lead][member][point]` and holds 1.0,
/// 0.0, or NaN where the anomaly or threshold is missing. The ensemble
/// products are laid out `[lead][point]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatwaveStatistics {
    pub name: String,
    pub init: NaiveDate,
    pub percentile: f64,
    #[serde(default)]
    pub lead: Option<Vec<f64>>,
    #[serde(default)]
    pub member: Option<Vec<u32>>,
    pub grid: SpatialGrid,
    #[serde(with = "crate::field::nan_as_null")]
    pub member_exceedance: Vec<f64>,
    /// Fraction of members with a finite anomaly that exceed.
    #[serde(with = "crate::field::nan_as_null")]
    pub mhw_prob: Vec<f64>,
    /// Ensemble-mean anomaly.
    #[serde(with = "crate::field::nan_as_null")]
    pub ssta_avg: Vec<f64>,
    /// `ssta_avg` where it reaches the threshold, NaN elsewhere.
    #[serde(with = "crate::field::nan_as_null")]
    pub mhw_mag_identified_ens: Vec<f64>,
    #[serde(default)]
    pub climatology_period: Option<ReferencePeriod>,
}

impl HeatwaveStatistics {
    pub fn n_lead(&self) -> usize {
        self.lead.as_ref().map_or(1, |l| l.len())
    }

    /// Product variable name of the probability, e.g. `mhw_prob90`.
    pub fn prob_var_name(&self) -> String {
        format!("mhw_prob{:02}", self.percentile.round() as i64)
    }

    #[inline]
    pub fn prob(&self, lead: usize, point: usize) -> f64 {
        self.mhw_prob[lead * self.grid.n_points() + point]
    }
}

/// Output of a batch run: the shared threshold and climatology, one set of
/// statistics per init, and the removed trend when detrending was on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatwaveBatch {
    pub threshold: QuantileThreshold,
    pub climatology: ClimatologyBaseline,
    pub events: Vec<HeatwaveStatistics>,
    #[serde(default)]
    pub trend: Option<TrendCoefficients>,
}

pub struct MarineHeatwaveForecast {
    field: Arc<GriddedField>,
    mode: EvalMode,
}

impl MarineHeatwaveForecast {
    /// Normalizes coordinates and requires an `init` sample axis.
    pub fn new(field: GriddedField, config: &StatsConfig) -> Result<Self> {
        let field = prepare_field(field, config)?;
        field.check_sample_dim(SampleDim::Init)?;
        Ok(Self { field: Arc::new(field), mode: config.evaluation })
    }

    pub fn field(&self) -> &GriddedField {
        &self.field
    }

    /// Statistics for the init labeled `YYYY-MM` against a precomputed
    /// climatology and threshold.
    ///
    /// An unparseable label or an init absent from the data is a range
    /// error; a climatology without the init month is a validation error.
    pub fn generate_forecast_single(
        &self,
        init_label: &str,
        climatology: &ClimatologyBaseline,
        threshold: &QuantileThreshold,
    ) -> Result<HeatwaveStatistics> {
        let init = parse_init_label(init_label)?;
        let sample = self.field.find_sample(init.year(), init.month()).ok_or_else(|| {
            Error::Range(format!("init {init_label} is not present in `{}`", self.field.name))
        })?;
        check_inputs(&self.field, climatology, threshold)?;
        detect(&self.field, sample, climatology, threshold, self.mode.exec())
    }

    /// Full pipeline over the data: climatology over
    /// `[climo_start, climo_end]`, anomalies and the `quantile_threshold`
    /// percentile over `[anom_start, anom_end]`, then statistics for every
    /// init in the anomaly period.
    ///
    /// With `detrend`, a per-point linear trend fitted over the climatology
    /// period is removed first and returned alongside.
    pub fn generate_forecast_batch(
        &self,
        climo_start: i32,
        climo_end: i32,
        anom_start: i32,
        anom_end: i32,
        quantile_threshold: f64,
        detrend: bool,
    ) -> Result<HeatwaveBatch> {
        let extent = self.field.year_extent()?;
        ReferencePeriod::new(climo_start, climo_end)?.check_within(extent)?;
        ReferencePeriod::new(anom_start, anom_end)?.check_within(extent)?;
        if !(0.0..=100.0).contains(&quantile_threshold) {
            return Err(Error::Range(format!(
                "percentile {quantile_threshold} is outside [0, 100]"
            )));
        }
        debug!(
            variable = %self.field.name,
            climo_start,
            climo_end,
            anom_start,
            anom_end,
            quantile_threshold,
            detrend,
            "heatwave batch"
        );

        let (field, trend) = if detrend {
            let trend = fit_linear_trend(&self.field, climo_start, climo_end, self.mode)?;
            (Arc::new(remove_trend(&self.field, &trend)?), Some(trend))
        } else {
            (Arc::clone(&self.field), None)
        };

        let climo = ForecastClimatology::from_prepared(Arc::clone(&field));
        let anom = AnomalyEngine::new(&climo)
            .anom_from_scratch(climo_start, climo_end, anom_start, anom_end, self.mode)?
            .materialize();

        let eager = self.mode != EvalMode::Lazy;
        let threshold = QuantileEngine::new(anom.anomaly.field)?
            .generate_quantile(anom_start, anom_end, quantile_threshold, eager)?
            .materialize();

        let exec = self.mode.exec();
        let mut events = Vec::new();
        for s in field.samples.indices_in(ReferencePeriod::new(anom_start, anom_end)?) {
            events.push(detect(&field, s, &anom.climatology, &threshold, exec)?);
        }

        info!(
            variable = %field.name,
            inits = events.len(),
            threshold = %threshold.var_name(),
            detrended = trend.is_some(),
            "heatwave batch complete"
        );

        Ok(HeatwaveBatch {
            threshold,
            climatology: anom.climatology,
            events,
            trend,
        })
    }
}

fn parse_init_label(label: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{label}-01"), "%Y-%m-%d")
        .map_err(|e| Error::Range(format!("init label `{label}` is not YYYY-MM: {e}")))
}

fn check_inputs(
    field: &GriddedField,
    climatology: &ClimatologyBaseline,
    threshold: &QuantileThreshold,
) -> Result<()> {
    climatology.check_shape()?;
    threshold.check_shape()?;
    field.grid.check_same_shape(&climatology.grid, "climatology")?;
    field.grid.check_same_shape(&threshold.grid, "threshold")?;
    check_broadcast("lead", climatology.n_lead(), field.n_lead())?;
    check_broadcast("member", climatology.n_member(), field.n_member())?;
    check_broadcast("threshold lead", threshold.n_lead(), field.n_lead())?;
    Ok(())
}

fn detect(
    field: &GriddedField,
    sample: usize,
    climatology: &ClimatologyBaseline,
    threshold: &QuantileThreshold,
    exec: Exec,
) -> Result<HeatwaveStatistics> {
    let init = field.samples.dates[sample];
    let key = climatology.grouping.key(init);
    let group = climatology.group_position(key).ok_or_else(|| {
        Error::Validation(format!(
            "climatology has no `{}` group {key} for init {init}",
            climatology.grouping.coord_name()
        ))
    })?;

    let (nl, nm, np) = (field.n_lead(), field.n_member(), field.n_points());
    let per_cell = map_indices_with(exec, nl * np, |j| {
        let (l, p) = (j / np, j % np);
        let thr = threshold.value(if threshold.n_lead() == 1 { 0 } else { l }, p);
        let anoms: Vec<f64> = (0..nm)
            .map(|m| field.get(sample, l, m, p) - broadcast_value(climatology, group, l, m, p))
            .collect();
        let exceed: Vec<f64> = anoms
            .iter()
            .map(|&a| if a.is_nan() || thr.is_nan() { f64::NAN } else if a >= thr { 1.0 } else { 0.0 })
            .collect();

        let valid = exceed.iter().filter(|e| !e.is_nan()).count();
        let prob = if valid == 0 {
            f64::NAN
        } else {
            exceed.iter().filter(|&&e| e == 1.0).count() as f64 / valid as f64
        };
        let avg = nanmean(anoms.iter().copied());
        let mag = if avg >= thr { avg } else { f64::NAN };
        (exceed, prob, avg, mag)
    });

    let mut member_exceedance = vec![f64::NAN; nl * nm * np];
    let mut mhw_prob = Vec::with_capacity(nl * np);
    let mut ssta_avg = Vec::with_capacity(nl * np);
    let mut mhw_mag_identified_ens = Vec::with_capacity(nl * np);
    for (j, (exceed, prob, avg, mag)) in per_cell.into_iter().enumerate() {
        let (l, p) = (j / np, j % np);
        for (m, e) in exceed.into_iter().enumerate() {
            member_exceedance[(l * nm + m) * np + p] = e;
        }
        mhw_prob.push(prob);
        ssta_avg.push(avg);
        mhw_mag_identified_ens.push(mag);
    }

    debug!(variable = %field.name, %init, "heatwave statistics computed");

    Ok(HeatwaveStatistics {
        name: field.name.clone(),
        init,
        percentile: threshold.percentile,
        lead: field.lead.clone(),
        member: field.member.clone(),
        grid: field.grid.clone(),
        member_exceedance,
        mhw_prob,
        ssta_avg,
        mhw_mag_identified_ens,
        climatology_period: climatology.period,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climatology::Climatology;
    use crate::fixtures;
    use approx::assert_relative_eq;

    /// Member m at year offset k holds m·k, so over 2000–2002 the
    /// climatology is m and the 2002 anomalies are 0, 1, 2.
    fn spread_forecast() -> GriddedField {
        fixtures::forecast(&fixtures::inits(2000..=2002, &[3]), 1, 3, fixtures::grid(1, 1), |d, _, m, _| {
            (m as i32 * (d.year() - 2000)) as f64
        })
    }

    fn flat_threshold(value: f64, grid: &SpatialGrid) -> QuantileThreshold {
        QuantileThreshold {
            name: "tos".into(),
            percentile: 90.0,
            lead: Some(vec![0.0]),
            grid: grid.clone(),
            data: vec![value; grid.n_points()],
            period: ReferencePeriod::new(2000, 2002).unwrap(),
        }
    }

    fn setup() -> (MarineHeatwaveForecast, ClimatologyBaseline) {
        let cfg = StatsConfig::default();
        let mhw = MarineHeatwaveForecast::new(spread_forecast(), &cfg).unwrap();
        let climo = ForecastClimatology::new(spread_forecast(), &cfg)
            .unwrap()
            .generate_climo(2000, 2002, EvalMode::Compute)
            .unwrap()
            .materialize();
        (mhw, climo)
    }

    #[test]
    fn threshold_equal_to_member_anomaly_counts() {
        let (mhw, climo) = setup();
        let thr = flat_threshold(1.0, &mhw.field().grid);
        let stats = mhw.generate_forecast_single("2002-03", &climo, &thr).unwrap();
        assert_eq!(stats.member_exceedance, vec![0.0, 1.0, 1.0]);
        assert_relative_eq!(stats.prob(0, 0), 2.0 / 3.0);
        assert_relative_eq!(stats.ssta_avg[0], 1.0);
        assert_relative_eq!(stats.mhw_mag_identified_ens[0], 1.0);
        assert_eq!(stats.prob_var_name(), "mhw_prob90");
        assert_eq!(stats.climatology_period, Some(ReferencePeriod::new(2000, 2002).unwrap()));

        let thr = flat_threshold(1.0 + 1e-9, &mhw.field().grid);
        let stats = mhw.generate_forecast_single("2002-03", &climo, &thr).unwrap();
        assert_relative_eq!(stats.prob(0, 0), 1.0 / 3.0);
        assert!(stats.mhw_mag_identified_ens[0].is_nan());
    }

    #[test]
    fn missing_members_leave_the_denominator() {
        let mut field = spread_forecast();
        field.set(2, 0, 0, 0, f64::NAN);
        let cfg = StatsConfig::default();
        let climo = ForecastClimatology::new(spread_forecast(), &cfg)
            .unwrap()
            .generate_climo(2000, 2002, EvalMode::Compute)
            .unwrap()
            .materialize();
        let mhw = MarineHeatwaveForecast::new(field, &cfg).unwrap();
        let thr = flat_threshold(1.5, &mhw.field().grid);
        let stats = mhw.generate_forecast_single("2002-03", &climo, &thr).unwrap();
        assert!(stats.member_exceedance[0].is_nan());
        assert_relative_eq!(stats.prob(0, 0), 0.5);
        assert_relative_eq!(stats.ssta_avg[0], 1.5);
    }

    #[test]
    fn unknown_or_malformed_init_is_a_range_error() {
        let (mhw, climo) = setup();
        let thr = flat_threshold(0.0, &mhw.field().grid);
        assert!(matches!(mhw.generate_forecast_single("2003-03", &climo, &thr), Err(Error::Range(_))));
        assert!(matches!(mhw.generate_forecast_single("2002/03", &climo, &thr), Err(Error::Range(_))));
        assert!(matches!(mhw.generate_forecast_single("2002-13", &climo, &thr), Err(Error::Range(_))));
    }

    #[test]
    fn batch_runs_every_init_in_the_anomaly_period() {
        let field = fixtures::forecast(&fixtures::inits(1993..=1997, &[3, 9]), 2, 4, fixtures::grid(2, 2), |d, l, m, p| {
            ((d.year() - 1993) * 4 + m as i32) as f64 * 0.1 + l as f64 + p as f64
        });
        let mhw = MarineHeatwaveForecast::new(field.clone(), &StatsConfig::default()).unwrap();
        let batch = mhw.generate_forecast_batch(1993, 1997, 1995, 1997, 90.0, false).unwrap();

        assert_eq!(batch.events.len(), 6);
        assert!(batch.trend.is_none());
        assert_eq!(batch.climatology.keys, vec![3, 9]);
        assert_eq!(batch.threshold.var_name(), "tos_threshold90");
        assert_eq!(batch.threshold.period, ReferencePeriod::new(1995, 1997).unwrap());

        // the threshold is the pooled quantile of the anomalies themselves
        let climo = ForecastClimatology::new(field, &StatsConfig::default()).unwrap();
        let anom = AnomalyEngine::new(&climo)
            .anom_from_scratch(1993, 1997, 1995, 1997, EvalMode::Compute)
            .unwrap()
            .materialize();
        let expected = QuantileEngine::new(anom.anomaly.field)
            .unwrap()
            .generate_quantile(1995, 1997, 90.0, true)
            .unwrap()
            .materialize();
        assert_eq!(batch.threshold.data, expected.data);

        let last = batch.events.last().unwrap();
        assert_eq!(last.init, fixtures::ymd(1997, 9, 1));
        assert!(last.mhw_prob.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn batch_detrend_emits_coefficients() {
        let field = fixtures::forecast(&fixtures::inits(1993..=2002, &[1, 7]), 1, 2, fixtures::grid(1, 2), |d, _, m, _| {
            0.03 * crate::detrend::decimal_year(d) + if m == 0 { -0.1 } else { 0.1 }
        });
        let mhw = MarineHeatwaveForecast::new(field, &StatsConfig::default()).unwrap();
        let batch = mhw.generate_forecast_batch(1993, 2002, 1993, 2002, 90.0, true).unwrap();
        let trend = batch.trend.unwrap();
        assert_relative_eq!(trend.slope[0], 0.03, epsilon = 1e-9);
        assert_relative_eq!(trend.slope[1], 0.03, epsilon = 1e-9);
        // member offsets are absorbed by the per-member climatology
        assert!(batch.threshold.data.iter().all(|v| v.abs() < 1e-9));
        assert!(batch.events.iter().all(|e| e.ssta_avg.iter().all(|v| v.abs() < 1e-9)));
    }

    #[test]
    fn batch_rejects_bad_requests_before_computing() {
        let mhw = MarineHeatwaveForecast::new(spread_forecast(), &StatsConfig::default()).unwrap();
        assert!(matches!(mhw.generate_forecast_batch(2002, 2000, 2000, 2002, 90.0, false), Err(Error::Range(_))));
        assert!(matches!(mhw.generate_forecast_batch(2000, 2002, 1999, 2002, 90.0, false), Err(Error::Range(_))));
        assert!(matches!(mhw.generate_forecast_batch(2000, 2002, 2000, 2002, 120.0, false), Err(Error::Range(_))));
    }

    #[test]
    fn ragged_threshold_is_rejected_not_indexed() {
        let (mhw, climo) = setup();
        let mut thr = flat_threshold(0.5, &mhw.field().grid);
        thr.data.clear();
        assert!(matches!(
            mhw.generate_forecast_single("2002-03", &climo, &thr),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn statistics_with_missing_cells_survive_json() {
        let mut field = spread_forecast();
        for m in 0..3 {
            field.set(2, 0, m, 0, f64::NAN);
        }
        let (_, climo) = setup();
        let mhw = MarineHeatwaveForecast::new(field, &StatsConfig::default()).unwrap();
        let stats = mhw
            .generate_forecast_single("2002-03", &climo, &flat_threshold(1.0, &mhw.field().grid))
            .unwrap();
        assert!(stats.mhw_prob[0].is_nan());

        let json = serde_json::to_string(&stats).unwrap();
        let back: HeatwaveStatistics = serde_json::from_str(&json).unwrap();
        assert!(back.mhw_prob[0].is_nan());
        assert!(back.ssta_avg[0].is_nan());
        assert!(back.mhw_mag_identified_ens[0].is_nan());
        assert!(back.member_exceedance.iter().all(|e| e.is_nan()));
    }
}
