//! Anomalies relative to a climatological baseline.
//!
//! The baseline either comes from the same engine over a climatology period
//! ([`BaselineSource::FromScratch`]) or is supplied precomputed
//! ([`BaselineSource::FromBaseline`]). A supplied baseline must carry its
//! reference-period provenance. Subtraction is group-wise: each sample's
//! group key selects the baseline block, and baseline lead/member axes of
//! extent 1 broadcast across the field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::climatology::{build_baseline, Climatology, ClimatologyBaseline};
use crate::error::{Error, Result};
use crate::eval::{map_indices, Deferred, EvalMode, Exec};
use crate::field::GriddedField;
use crate::period::ReferencePeriod;

/// Raw minus baseline, with the provenance of the baseline used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyField {
    pub field: GriddedField,
    /// Reference period of the baseline that was subtracted.
    pub climatology_period: ReferencePeriod,
}

/// The anomaly and the exact baseline used to produce it.
#[derive(Debug, Clone)]
pub struct AnomalyResult {
    pub anomaly: AnomalyField,
    pub climatology: ClimatologyBaseline,
}

/// Where the baseline of an anomaly batch comes from.
#[derive(Debug, Clone, Copy)]
pub enum BaselineSource<'a> {
    /// Build the baseline over the climatology period first.
    FromScratch,
    /// Use a precomputed baseline; it must carry provenance.
    FromBaseline(&'a ClimatologyBaseline),
}

/// Anomaly computation on top of a climatology engine.
pub struct AnomalyEngine<'c, C: Climatology + ?Sized> {
    climo: &'c C,
}

impl<'c, C: Climatology + ?Sized> AnomalyEngine<'c, C> {
    pub fn new(climo: &'c C) -> Self {
        Self { climo }
    }

    /// Dispatch on `source`. The climatology years are only used when the
    /// baseline is built from scratch.
    pub fn generate_anom_batch(
        &self,
        climo_start: i32,
        climo_end: i32,
        anom_start: i32,
        anom_end: i32,
        mode: EvalMode,
        source: BaselineSource<'_>,
    ) -> Result<Deferred<AnomalyResult>> {
        match source {
            BaselineSource::FromScratch => {
                self.anom_from_scratch(climo_start, climo_end, anom_start, anom_end, mode)
            }
            BaselineSource::FromBaseline(baseline) => {
                self.anom_from_baseline(baseline, anom_start, anom_end, mode)
            }
        }
    }

    /// Build the baseline over `[climo_start, climo_end]`, then subtract it
    /// from every sample in `[anom_start, anom_end]`.
    pub fn anom_from_scratch(
        &self,
        climo_start: i32,
        climo_end: i32,
        anom_start: i32,
        anom_end: i32,
        mode: EvalMode,
    ) -> Result<Deferred<AnomalyResult>> {
        let field = self.climo.field();
        let extent = field.year_extent()?;
        let climo_period = ReferencePeriod::new(climo_start, climo_end)?;
        climo_period.check_within(extent)?;
        let anom_period = ReferencePeriod::new(anom_start, anom_end)?;
        anom_period.check_within(extent)?;

        let grouping = self.climo.grouping();
        let keys = self.climo.group_keys();
        debug!(
            variable = %field.name,
            %climo_period,
            %anom_period,
            ?mode,
            "scheduling anomaly with fresh climatology"
        );
        let field = Arc::clone(field);
        Ok(mode.schedule(move |exec| {
            let baseline = build_baseline(&field, grouping, keys, climo_period, exec);
            let anomaly = subtract(&field, &baseline, anom_period, climo_period, exec);
            AnomalyResult { anomaly, climatology: baseline }
        }))
    }

    /// Subtract a precomputed `baseline` from every sample in
    /// `[anom_start, anom_end]`.
    ///
    /// Fails with a validation error when the baseline lacks provenance or
    /// has no group for a sample in the anomaly period, and with a shape
    /// mismatch when its axes cannot broadcast onto the field.
    pub fn anom_from_baseline(
        &self,
        baseline: &ClimatologyBaseline,
        anom_start: i32,
        anom_end: i32,
        mode: EvalMode,
    ) -> Result<Deferred<AnomalyResult>> {
        let climo_period = baseline.require_period()?;
        let field = self.climo.field();
        let anom_period = ReferencePeriod::new(anom_start, anom_end)?;
        anom_period.check_within(field.year_extent()?)?;
        check_compatible(field, baseline, anom_period)?;

        debug!(
            variable = %field.name,
            %climo_period,
            %anom_period,
            ?mode,
            "scheduling anomaly against supplied climatology"
        );
        let field = Arc::clone(field);
        let baseline = baseline.clone();
        Ok(mode.schedule(move |exec| {
            let anomaly = subtract(&field, &baseline, anom_period, climo_period, exec);
            AnomalyResult { anomaly, climatology: baseline }
        }))
    }
}

/// Broadcast rules between a field and a baseline, checked before any
/// subtraction is scheduled.
pub(crate) fn check_compatible(
    field: &GriddedField,
    baseline: &ClimatologyBaseline,
    period: ReferencePeriod,
) -> Result<()> {
    baseline.check_shape()?;
    field.grid.check_same_shape(&baseline.grid, "climatology")?;
    check_broadcast("lead", baseline.n_lead(), field.n_lead())?;
    check_broadcast("member", baseline.n_member(), field.n_member())?;
    for s in field.samples.indices_in(period) {
        let key = baseline.grouping.key(field.samples.dates[s]);
        if baseline.group_position(key).is_none() {
            return Err(Error::Validation(format!(
                "climatology has no `{}` group {key} for sample {}",
                baseline.grouping.coord_name(),
                field.samples.dates[s]
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_broadcast(dim: &str, from: usize, to: usize) -> Result<()> {
    if from != 1 && from != to {
        return Err(Error::ShapeMismatch(format!(
            "cannot broadcast {dim} of extent {from} onto {to}"
        )));
    }
    Ok(())
}

/// Baseline value matching field position `(lead, member, point)` within a
/// group block, with extent-1 axes broadcast.
#[inline]
pub(crate) fn broadcast_value(
    baseline: &ClimatologyBaseline,
    group: usize,
    lead: usize,
    member: usize,
    point: usize,
) -> f64 {
    let l = if baseline.n_lead() == 1 { 0 } else { lead };
    let m = if baseline.n_member() == 1 { 0 } else { member };
    baseline.value(group, l, m, point)
}

fn subtract(
    field: &GriddedField,
    baseline: &ClimatologyBaseline,
    anom_period: ReferencePeriod,
    climo_period: ReferencePeriod,
    exec: Exec,
) -> AnomalyField {
    let mut out = field.select_period(anom_period);
    let (nm, np) = (out.n_member(), out.n_points());
    let block = out.block_len();

    for s in 0..out.n_samples() {
        let key = baseline.grouping.key(out.samples.dates[s]);
        // Checked eagerly by the callers.
        let Some(g) = baseline.group_position(key) else {
            out.data[s * block..(s + 1) * block].fill(f64::NAN);
            continue;
        };
        let raw = out.sample_block(s);
        let anom = map_indices(exec, block, |j| {
            let (l, m, p) = (j / (nm * np), (j / np) % nm, j % np);
            raw[j] - broadcast_value(baseline, g, l, m, p)
        });
        out.data[s * block..(s + 1) * block].copy_from_slice(&anom);
    }

    info!(
        variable = %out.name,
        %anom_period,
        %climo_period,
        samples = out.n_samples(),
        "anomaly computed"
    );
    AnomalyField { field: out, climatology_period: climo_period }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climatology::{ForecastClimatology, HistoricalClimatology};
    use crate::config::StatsConfig;
    use crate::fixtures;
    use approx::assert_relative_eq;
    use chrono::Datelike;

    fn reforecast() -> GriddedField {
        fixtures::forecast(
            &fixtures::inits(1993..=1995, &[3, 6]),
            2,
            3,
            fixtures::grid(2, 2),
            |d, l, m, p| (d.year() - 1993) as f64 + d.month() as f64 + l as f64 * 0.5 + m as f64 + p as f64,
        )
    }

    #[test]
    fn from_scratch_removes_group_means() {
        let climo = ForecastClimatology::new(reforecast(), &StatsConfig::default()).unwrap();
        let engine = AnomalyEngine::new(&climo);
        let res = engine
            .generate_anom_batch(1993, 1995, 1994, 1995, EvalMode::Compute, BaselineSource::FromScratch)
            .unwrap()
            .materialize();
        let anom = &res.anomaly.field;
        assert_eq!(anom.n_samples(), 4);
        assert_eq!(res.anomaly.climatology_period, ReferencePeriod::new(1993, 1995).unwrap());
        // climatology offset is the mean year offset (1); 1994 → 0, 1995 → 1
        for s in 0..anom.n_samples() {
            let expected = (anom.samples.dates[s].year() - 1994) as f64;
            for &v in anom.sample_block(s) {
                assert_relative_eq!(v, expected, epsilon = 1e-12);
            }
        }
        assert_eq!(res.climatology.keys, vec![3, 6]);
    }

    #[test]
    fn from_baseline_uses_supplied_period_and_broadcasts_members() {
        let climo = ForecastClimatology::new(reforecast(), &StatsConfig::default()).unwrap();
        let baseline = climo
            .generate_climo(1993, 1994, EvalMode::Compute)
            .unwrap()
            .materialize()
            .ensemble_mean();
        let engine = AnomalyEngine::new(&climo);
        let res = engine
            .anom_from_baseline(&baseline, 1993, 1993, EvalMode::Compute)
            .unwrap()
            .materialize();
        assert_eq!(res.anomaly.climatology_period, ReferencePeriod::new(1993, 1994).unwrap());
        let anom = &res.anomaly.field;
        // 1993 offset 0 minus mean offset 0.5; member m minus member mean 1
        assert_relative_eq!(anom.get(0, 1, 2, 3), -0.5 + 1.0, epsilon = 1e-12);
        assert_relative_eq!(anom.get(1, 0, 0, 0), -0.5 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn baseline_without_provenance_is_rejected() {
        let climo = ForecastClimatology::new(reforecast(), &StatsConfig::default()).unwrap();
        let mut baseline = climo.generate_climo(1993, 1994, EvalMode::Compute).unwrap().materialize();
        baseline.period = None;
        let engine = AnomalyEngine::new(&climo);
        let res = engine.generate_anom_batch(
            1993,
            1993,
            1993,
            1993,
            EvalMode::Compute,
            BaselineSource::FromBaseline(&baseline),
        );
        assert!(matches!(res, Err(Error::Validation(_))));
    }

    #[test]
    fn range_errors_are_raised_before_scheduling() {
        let climo = ForecastClimatology::new(reforecast(), &StatsConfig::default()).unwrap();
        let engine = AnomalyEngine::new(&climo);
        let lazy = |c0, c1, a0, a1| engine.anom_from_scratch(c0, c1, a0, a1, EvalMode::Lazy);
        assert!(matches!(lazy(1994, 1993, 1993, 1993), Err(Error::Range(_))));
        assert!(matches!(lazy(1993, 1994, 1994, 1993), Err(Error::Range(_))));
        assert!(matches!(lazy(1993, 1994, 1991, 1992), Err(Error::Range(_))));
        assert!(matches!(lazy(1990, 1994, 1993, 1993), Err(Error::Range(_))));
    }

    #[test]
    fn incompatible_baselines_are_rejected() {
        let climo = ForecastClimatology::new(reforecast(), &StatsConfig::default()).unwrap();
        let engine = AnomalyEngine::new(&climo);
        let good = climo.generate_climo(1993, 1995, EvalMode::Compute).unwrap().materialize();

        let mut wrong_members = good.clone();
        wrong_members.member = Some(vec![1, 2]);
        wrong_members.data.truncate(wrong_members.n_groups() * wrong_members.block_len());
        assert!(matches!(
            engine.anom_from_baseline(&wrong_members, 1993, 1993, EvalMode::Compute),
            Err(Error::ShapeMismatch(_))
        ));

        let mut march_only = good.clone();
        march_only.keys = vec![3];
        march_only.data.truncate(march_only.block_len());
        assert!(matches!(
            engine.anom_from_baseline(&march_only, 1993, 1993, EvalMode::Compute),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn historical_monthly_anomaly() {
        let field = fixtures::historical(fixtures::monthly_dates(2000..=2003), fixtures::grid(1, 2), |d, p| {
            d.month() as f64 * 2.0 + (d.year() - 2000) as f64 + p as f64
        });
        let climo = HistoricalClimatology::new(field, &StatsConfig::default()).unwrap();
        let res = AnomalyEngine::new(&climo)
            .anom_from_scratch(2000, 2003, 2003, 2003, EvalMode::Persist)
            .unwrap()
            .materialize();
        assert_eq!(res.anomaly.field.n_samples(), 12);
        assert!(res.anomaly.field.data.iter().all(|&v| (v - 1.5).abs() < 1e-12));
    }

    #[test]
    fn modes_agree() {
        let climo = ForecastClimatology::new(reforecast(), &StatsConfig::default()).unwrap();
        let engine = AnomalyEngine::new(&climo);
        let run = |mode| engine.anom_from_scratch(1993, 1995, 1993, 1995, mode).unwrap().materialize();
        let a = run(EvalMode::Lazy).anomaly.field.data;
        let b = run(EvalMode::Persist).anomaly.field.data;
        let c = run(EvalMode::Compute).anomaly.field.data;
        assert_eq!(a, b);
        assert_eq!(b, c);
    }
}
