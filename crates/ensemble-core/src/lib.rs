//! Ensemble statistics for gridded ocean forecasts and historical runs:
//! climatologies, anomalies, quantile thresholds, tercile boundaries and
//! probabilities, marine-heatwave exceedance, and the Gulf Stream index.

pub mod anomaly;
pub mod climatology;
pub mod config;
pub mod coords;
pub mod detrend;
pub mod error;
pub mod eval;
pub mod field;
pub mod heatwave;
pub mod indexes;
pub mod period;
pub mod quantile;
pub mod regional;
pub mod stats;
pub mod tercile;

#[cfg(test)]
mod fixtures;

pub use anomaly::{AnomalyEngine, AnomalyField, AnomalyResult, BaselineSource};
pub use climatology::{
    Climatology, ClimatologyBaseline, ForecastClimatology, Grouping, HistoricalClimatology,
};
pub use config::{StatsConfig, TimeFrequency};
pub use coords::{prepare_field, rename_coord, CoordinateWrangle};
pub use detrend::{fit_linear_trend, remove_trend, TrendCoefficients};
pub use error::{Error, Result};
pub use eval::{Deferred, EvalMode};
pub use field::{GriddedField, SampleAxis, SampleDim, SpatialGrid};
pub use heatwave::{HeatwaveBatch, HeatwaveStatistics, MarineHeatwaveForecast};
pub use indexes::{gulf_stream_index, gulf_stream_index_within, FocusBox, GulfStreamIndex};
pub use period::ReferencePeriod;
pub use quantile::{QuantileEngine, QuantileThreshold};
pub use regional::{regional_mean, regional_terciles, RegionMask, RegionalTercile};
pub use tercile::{
    forecast_period_labels, generate_tercile_probability, ForecastPeriods, LeadBins,
    TercileBoundary, TercileEngine, TercileProbability,
};
