use std::sync::Arc;

use crate::config::{StatsConfig, TimeFrequency};
use crate::coords::prepare_field;
use crate::error::Result;
use crate::field::{GriddedField, SampleDim};

use super::{Climatology, Grouping};

/// Climatology of a continuous-time (historical run) field, grouped by
/// calendar month or day of year.
pub struct HistoricalClimatology {
    field: Arc<GriddedField>,
    frequency: TimeFrequency,
}

impl HistoricalClimatology {
    /// Normalizes coordinates and requires a `time` sample axis.
    pub fn new(field: GriddedField, config: &StatsConfig) -> Result<Self> {
        let field = prepare_field(field, config)?;
        field.check_sample_dim(SampleDim::Time)?;
        Ok(Self {
            field: Arc::new(field),
            frequency: config.time_frequency,
        })
    }

    pub fn frequency(&self) -> TimeFrequency {
        self.frequency
    }
}

impl Climatology for HistoricalClimatology {
    fn field(&self) -> &Arc<GriddedField> {
        &self.field
    }

    fn grouping(&self) -> Grouping {
        self.frequency.into()
    }

    fn group_keys(&self) -> Vec<u32> {
        match self.frequency {
            TimeFrequency::Month => (1..=12).collect(),
            TimeFrequency::DayOfYear => (1..=366).collect(),
        }
    }
}
