use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Datelike;

use crate::config::StatsConfig;
use crate::coords::prepare_field;
use crate::error::Result;
use crate::field::{GriddedField, SampleDim};

use super::{Climatology, Grouping};

/// Climatology of an initialized forecast/reforecast field.
///
/// Forecasts are only initialized in a fixed set of calendar months, so the
/// `init` axis is grouped by init month; lead and member axes are kept. The
/// result is stacked along a `month` key holding every init month present.
pub struct ForecastClimatology {
    field: Arc<GriddedField>,
}

impl ForecastClimatology {
    /// Normalizes coordinates and requires an `init` sample axis.
    pub fn new(field: GriddedField, config: &StatsConfig) -> Result<Self> {
        let field = prepare_field(field, config)?;
        field.check_sample_dim(SampleDim::Init)?;
        Ok(Self { field: Arc::new(field) })
    }

    pub(crate) fn from_prepared(field: Arc<GriddedField>) -> Self {
        Self { field }
    }

    /// Distinct initialization months in the data, ascending.
    pub fn init_months(&self) -> Vec<u32> {
        init_months(&self.field)
    }
}

pub(crate) fn init_months(field: &GriddedField) -> Vec<u32> {
    field
        .samples
        .dates
        .iter()
        .map(|d| d.month())
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect()
}

impl Climatology for ForecastClimatology {
    fn field(&self) -> &Arc<GriddedField> {
        &self.field
    }

    fn grouping(&self) -> Grouping {
        Grouping::InitMonth
    }

    fn group_keys(&self) -> Vec<u32> {
        self.init_months()
    }
}
