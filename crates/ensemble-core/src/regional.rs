//! Area-weighted regional averages and regional tercile boundaries.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StatsConfig;
use crate::coords::{prepare_field, CoordinateWrangle, LAT, LON};
use crate::error::{Error, Result};
use crate::field::{GriddedField, SpatialGrid};
use crate::tercile::{TercileBoundary, TercileEngine};

/// Per-point weights of one region: mask × cell area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMask {
    pub name: String,
    pub weights: Vec<f64>,
}

impl RegionMask {
    /// Missing mask or area values count as zero weight. Fails when the
    /// lengths differ or the region has no positive weight.
    pub fn new(name: &str, mask: &[f64], area: &[f64]) -> Result<Self> {
        if mask.len() != area.len() {
            return Err(Error::ShapeMismatch(format!(
                "region `{name}` mask has {} points, area has {}",
                mask.len(),
                area.len()
            )));
        }
        let weights: Vec<f64> = mask
            .iter()
            .zip(area)
            .map(|(&m, &a)| {
                let w = m * a;
                if w.is_finite() && w > 0.0 { w } else { 0.0 }
            })
            .collect();
        if weights.iter().all(|&w| w == 0.0) {
            return Err(Error::Validation(format!("region `{name}` covers no weighted cells")));
        }
        Ok(Self { name: name.to_string(), weights })
    }

    fn weighted_mean<I: Iterator<Item = f64>>(&self, values: I) -> f64 {
        let (mut sum, mut wsum) = (0.0, 0.0);
        for (v, &w) in values.zip(&self.weights) {
            if w > 0.0 && !v.is_nan() {
                sum += v * w;
                wsum += w;
            }
        }
        if wsum == 0.0 { f64::NAN } else { sum / wsum }
    }
}

/// Tercile boundaries of one region's averaged series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalTercile {
    pub region: String,
    pub boundary: TercileBoundary,
}

/// Weighted mean over the region for every (sample, lead, member), as a
/// one-point field located at the region's weighted centroid.
pub fn regional_mean(field: &GriddedField, region: &RegionMask) -> Result<GriddedField> {
    CoordinateWrangle::new(field).check_coord_name()?;
    let np = field.n_points();
    if region.weights.len() != np {
        return Err(Error::ShapeMismatch(format!(
            "region `{}` has {} weights for {np} grid points",
            region.name,
            region.weights.len()
        )));
    }

    let centroid = |name: &str| -> Result<f64> {
        let coord = field
            .grid
            .coord(name)
            .ok_or_else(|| Error::MissingCoordinate(name.to_string()))?;
        Ok(region.weighted_mean(coord.iter().copied()))
    };
    let grid = SpatialGrid::new(1, 1)
        .with_coord(LON, vec![centroid(LON)?])?
        .with_coord(LAT, vec![centroid(LAT)?])?;

    let data: Vec<f64> = field
        .data
        .chunks(np)
        .map(|cell| region.weighted_mean(cell.iter().copied()))
        .collect();

    let mut attrs = field.attrs.clone();
    attrs.insert("region".to_string(), region.name.clone());
    debug!(variable = %field.name, region = %region.name, "regional mean");

    GriddedField::new(&field.name, field.samples.clone(), field.lead.clone(), field.member.clone(), grid, data)
        .map(|f| GriddedField { attrs, ..f })
}

/// Tercile boundaries of each region's weighted mean over
/// `[start_year, end_year]`.
///
/// The raw field is prepared once with the configured coordinate aliases,
/// so curvilinear model output can be passed as is.
pub fn regional_terciles(
    field: &GriddedField,
    regions: &[RegionMask],
    start_year: i32,
    end_year: i32,
    config: &StatsConfig,
) -> Result<Vec<RegionalTercile>> {
    let field = prepare_field(field.clone(), config)?;
    let mut out = Vec::with_capacity(regions.len());
    for region in regions {
        let averaged = regional_mean(&field, region)?;
        let boundary = TercileEngine::new(averaged, config)?.generate_tercile(start_year, end_year)?;
        out.push(RegionalTercile { region: region.name.clone(), boundary });
    }
    info!(variable = %field.name, regions = out.len(), "regional terciles computed");
    Ok(out)
}
