use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::LeadBins;

/// Display labels for a binned forecast, e.g. init `Mar 2022` with periods
/// `Mar-May 2022`, `Jun-Aug 2022`, …
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPeriods {
    pub init: String,
    pub periods: Vec<String>,
}

/// Label each lead bin by the calendar months it spans from `init`.
///
/// Bins are assumed evenly spaced: every period spans
/// `edges[1] - edges[0]` months. Edges must be whole, non-negative months.
pub fn forecast_period_labels(init: NaiveDate, lead_bins: &LeadBins) -> Result<ForecastPeriods> {
    let edges = lead_bins.edges();
    if edges.iter().any(|e| *e < 0.0 || e.fract() != 0.0) {
        return Err(Error::Range(format!(
            "period labels need whole-month lead bin edges, got {edges:?}"
        )));
    }
    let first = init
        .with_day(1)
        .ok_or_else(|| Error::Range(format!("cannot take the first of {init}")))?;
    let span = (edges[1] - edges[0]) as u32 - 1;

    let shifted = |months: u32| {
        first
            .checked_add_months(Months::new(months))
            .ok_or_else(|| Error::Range(format!("{init} + {months} months overflows the calendar")))
    };

    let mut periods = Vec::with_capacity(lead_bins.n_bins());
    for &start in &edges[..edges.len() - 1] {
        let start = start as u32;
        let from = shifted(start)?;
        let to = shifted(start + span)?;
        periods.push(format!("{}-{}", from.format("%b"), to.format("%b %Y")));
    }

    Ok(ForecastPeriods {
        init: first.format("%b %Y").to_string(),
        periods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ymd;

    #[test]
    fn seasonal_labels_cross_the_year() {
        let bins = LeadBins::new(vec![0.0, 3.0, 6.0, 9.0, 12.0]).unwrap();
        let labels = forecast_period_labels(ymd(2022, 3, 1), &bins).unwrap();
        assert_eq!(labels.init, "Mar 2022");
        assert_eq!(
            labels.periods,
            vec!["Mar-May 2022", "Jun-Aug 2022", "Sep-Nov 2022", "Dec-Feb 2023"]
        );
    }

    #[test]
    fn single_month_bins() {
        let bins = LeadBins::new(vec![1.0, 2.0, 3.0]).unwrap();
        let labels = forecast_period_labels(ymd(2021, 12, 15), &bins).unwrap();
        assert_eq!(labels.init, "Dec 2021");
        assert_eq!(labels.periods, vec!["Jan-Jan 2022", "Feb-Feb 2022"]);
    }

    #[test]
    fn fractional_edges_are_rejected() {
        let bins = LeadBins::new(vec![0.0, 1.5, 3.0]).unwrap();
        assert!(matches!(forecast_period_labels(ymd(2022, 3, 1), &bins), Err(Error::Range(_))));
    }
}
