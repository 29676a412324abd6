//! Empirical quantile thresholds over pooled ensemble realizations.
//!
//! Every member of every sample inside the reference period is treated as
//! one realization; the pool is reduced to a single linear-interpolation
//! quantile per (lead, point). Used for marine-heatwave thresholds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::eval::{map_indices, Deferred, EvalMode, Exec};
use crate::field::{GriddedField, SpatialGrid};
use crate::period::ReferencePeriod;
use crate::stats::nanquantiles;

/// One threshold per (lead, point), laid out `[lead][point]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileThreshold {
    pub name: String,
    /// Percentile in `[0, 100]`.
    pub percentile: f64,
    #[serde(default)]
    pub lead: Option<Vec<f64>>,
    pub grid: SpatialGrid,
    #[serde(with = "crate::field::nan_as_null")]
    pub data: Vec<f64>,
    pub period: ReferencePeriod,
}

impl QuantileThreshold {
    #[inline]
    pub fn n_lead(&self) -> usize {
        self.lead.as_ref().map_or(1, |l| l.len())
    }

    /// Fails with a shape mismatch when `data` is ragged against the lead
    /// axis and grid, e.g. after reading a hand-edited product.
    pub fn check_shape(&self) -> Result<()> {
        let expected = self.n_lead() * self.grid.n_points();
        if self.data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "threshold of `{}` holds {} values, expected {expected}",
                self.name,
                self.data.len()
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn value(&self, lead: usize, point: usize) -> f64 {
        self.data[lead * self.grid.n_points() + point]
    }

    /// Product variable name, e.g. `tos_threshold90`.
    pub fn var_name(&self) -> String {
        format!("{}_threshold{:02}", self.name, self.percentile.round() as i64)
    }
}

pub struct QuantileEngine {
    field: Arc<GriddedField>,
}

impl QuantileEngine {
    /// `field` is usually an anomaly field; any sample axis is accepted.
    pub fn new(field: GriddedField) -> Result<Self> {
        field.check_shape()?;
        Ok(Self { field: Arc::new(field) })
    }

    /// Threshold at `percentile` of the realizations in
    /// `[start_year, end_year]`.
    ///
    /// Fails with a range error for inverted or out-of-extent years and for
    /// a percentile outside `[0, 100]`. `eager` only decides whether the
    /// reduction runs now or on materialization.
    pub fn generate_quantile(
        &self,
        start_year: i32,
        end_year: i32,
        percentile: f64,
        eager: bool,
    ) -> Result<Deferred<QuantileThreshold>> {
        let period = ReferencePeriod::new(start_year, end_year)?;
        period.check_within(self.field.year_extent()?)?;
        if !(0.0..=100.0).contains(&percentile) {
            return Err(Error::Range(format!("percentile {percentile} is outside [0, 100]")));
        }

        let mode = EvalMode::from_eager(eager);
        debug!(variable = %self.field.name, %period, percentile, ?mode, "scheduling quantile");
        let field = Arc::clone(&self.field);
        Ok(mode.schedule(move |exec| pooled_quantile(&field, period, percentile, exec)))
    }
}

fn pooled_quantile(
    field: &GriddedField,
    period: ReferencePeriod,
    percentile: f64,
    exec: Exec,
) -> QuantileThreshold {
    let samples = field.samples.indices_in(period);
    let (nl, nm, np) = (field.n_lead(), field.n_member(), field.n_points());
    let q = percentile / 100.0;

    let data = map_indices(exec, nl * np, |j| {
        let (l, p) = (j / np, j % np);
        let mut pool: Vec<f64> = Vec::with_capacity(samples.len() * nm);
        for &s in &samples {
            for m in 0..nm {
                pool.push(field.get(s, l, m, p));
            }
        }
        nanquantiles(&mut pool, &[q])[0]
    });

    info!(
        variable = %field.name,
        %period,
        percentile,
        realizations = samples.len() * nm,
        "quantile threshold computed"
    );

    QuantileThreshold {
        name: field.name.clone(),
        percentile,
        lead: field.lead.clone(),
        grid: field.grid.clone(),
        data,
        period,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use approx::assert_relative_eq;
    use chrono::Datelike;

    /// Realization k (over init × member) at point p holds k + 100·p.
    fn pooled(n_member: usize) -> GriddedField {
        fixtures::forecast(
            &fixtures::inits(1993..=1997, &[3]),
            2,
            n_member,
            fixtures::grid(1, 2),
            move |d, l, m, p| {
                let k = (d.year() - 1993) as usize * n_member + m;
                k as f64 + 100.0 * p as f64 + 1000.0 * l as f64
            },
        )
    }

    #[test]
    fn pools_inits_and_members() {
        let engine = QuantileEngine::new(pooled(4)).unwrap();
        let t = engine.generate_quantile(1993, 1997, 90.0, true).unwrap().materialize();
        // 20 realizations 0..=19: h = 19·0.9 = 17.1
        assert_relative_eq!(t.value(0, 0), 17.1, epsilon = 1e-9);
        assert_relative_eq!(t.value(0, 1), 117.1, epsilon = 1e-9);
        assert_relative_eq!(t.value(1, 0), 1017.1, epsilon = 1e-9);
        assert_eq!(t.var_name(), "tos_threshold90");
    }

    #[test]
    fn period_restricts_the_pool() {
        let engine = QuantileEngine::new(pooled(2)).unwrap();
        let t = engine.generate_quantile(1993, 1993, 100.0, true).unwrap().materialize();
        assert_relative_eq!(t.value(0, 0), 1.0);
        let t = engine.generate_quantile(1997, 1997, 0.0, true).unwrap().materialize();
        assert_relative_eq!(t.value(0, 0), 8.0);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let engine = QuantileEngine::new(pooled(3)).unwrap();
        let a = engine.generate_quantile(1993, 1996, 90.0, false).unwrap().materialize();
        let b = engine.generate_quantile(1993, 1996, 90.0, false).unwrap().materialize();
        assert_eq!(a, b);
        let c = engine.generate_quantile(1993, 1996, 90.0, true).unwrap().materialize();
        assert_eq!(a, c);
    }

    #[test]
    fn invalid_requests() {
        let engine = QuantileEngine::new(pooled(1)).unwrap();
        assert!(matches!(engine.generate_quantile(1994, 1993, 90.0, true), Err(Error::Range(_))));
        assert!(matches!(engine.generate_quantile(1990, 1993, 90.0, true), Err(Error::Range(_))));
        assert!(matches!(engine.generate_quantile(1993, 1994, 101.0, true), Err(Error::Range(_))));
    }

    #[test]
    fn all_missing_point_is_nan() {
        let mut field = pooled(2);
        for s in 0..field.n_samples() {
            for l in 0..2 {
                for m in 0..2 {
                    field.set(s, l, m, 1, f64::NAN);
                }
            }
        }
        let t = QuantileEngine::new(field)
            .unwrap()
            .generate_quantile(1993, 1997, 50.0, true)
            .unwrap()
            .materialize();
        assert!(t.value(0, 1).is_nan());
        assert!(!t.value(0, 0).is_nan());
    }

    #[test]
    fn missing_thresholds_survive_json() {
        let mut field = pooled(2);
        for s in 0..field.n_samples() {
            for l in 0..2 {
                for m in 0..2 {
                    field.set(s, l, m, 1, f64::NAN);
                }
            }
        }
        let t = QuantileEngine::new(field)
            .unwrap()
            .generate_quantile(1993, 1997, 90.0, true)
            .unwrap()
            .materialize();
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("null"));
        let back: QuantileThreshold = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data.len(), t.data.len());
        assert_relative_eq!(back.value(0, 0), t.value(0, 0));
        assert!(back.value(0, 1).is_nan());
        assert!(back.check_shape().is_ok());
    }

    #[test]
    fn ragged_threshold_is_a_shape_mismatch() {
        let t = QuantileThreshold {
            name: "tos".into(),
            percentile: 90.0,
            lead: Some(vec![0.0, 1.0]),
            grid: SpatialGrid::new(1, 1),
            data: vec![0.5],
            period: ReferencePeriod::new(1993, 1997).unwrap(),
        };
        assert!(matches!(t.check_shape(), Err(Error::ShapeMismatch(_))));
    }
}
