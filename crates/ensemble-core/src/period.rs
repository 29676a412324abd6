use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inclusive calendar-year range a statistic is built over.
///
/// A baseline carries the exact period it was computed from; that record is
/// what anomaly computation checks before accepting a precomputed baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct ReferencePeriod {
    pub start_year: i32,
    pub end_year: i32,
}

#[derive(Deserialize)]
struct RawPeriod {
    start_year: i32,
    end_year: i32,
}

impl TryFrom<RawPeriod> for ReferencePeriod {
    type Error = Error;

    fn try_from(raw: RawPeriod) -> Result<Self> {
        ReferencePeriod::new(raw.start_year, raw.end_year)
    }
}

impl ReferencePeriod {
    /// Fails with a range error when `start_year > end_year`.
    pub fn new(start_year: i32, end_year: i32) -> Result<Self> {
        if start_year > end_year {
            return Err(Error::Range(format!(
                "start year {start_year} is after end year {end_year}"
            )));
        }
        Ok(Self { start_year, end_year })
    }

    #[inline]
    pub fn contains_year(&self, year: i32) -> bool {
        year >= self.start_year && year <= self.end_year
    }

    /// Fails unless the period lies entirely inside `extent` (inclusive years).
    pub fn check_within(&self, extent: (i32, i32)) -> Result<()> {
        let (first, last) = extent;
        if self.start_year < first || self.end_year > last {
            return Err(Error::Range(format!(
                "period {}-{} is outside the data extent {first}-{last}",
                self.start_year, self.end_year
            )));
        }
        Ok(())
    }

    pub fn n_years(&self) -> usize {
        (self.end_year - self.start_year + 1) as usize
    }
}

impl std::fmt::Display for ReferencePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start_year, self.end_year)
    }
}
