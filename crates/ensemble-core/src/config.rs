use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eval::EvalMode;

/// Grouping frequency of a historical (continuous-time) climatology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFrequency {
    #[default]
    Month,
    #[serde(alias = "day_of_year")]
    DayOfYear,
}

/// Engine configuration, passed explicitly to every engine constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Grouping used by the historical climatology.
    pub time_frequency: TimeFrequency,
    /// Materialization used by operations that take no explicit mode
    /// (tercile boundaries, heatwave batches).
    pub evaluation: EvalMode,
    /// Curvilinear coordinate names renamed to `lon`/`lat` before
    /// validation, e.g. `["geolon", "geolat"]`.
    pub coord_aliases: Option<[String; 2]>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            time_frequency: TimeFrequency::Month,
            evaluation: EvalMode::Compute,
            coord_aliases: None,
        }
    }
}

impl StatsConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: StatsConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some([lon, lat]) = &self.coord_aliases {
            if lon.is_empty() || lat.is_empty() || lon == lat {
                return Err(Error::Config(format!(
                    "coordinate aliases must be two distinct names, got [{lon:?}, {lat:?}]"
                )));
            }
        }
        Ok(())
    }
}
