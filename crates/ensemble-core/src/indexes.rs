//! Circulation indexes derived from sea-surface height.
//!
//! The Gulf Stream index tracks the path of largest SSH variability:
//!   1. anomaly against the monthly climatology of the whole record,
//!   2. per longitude, the latitude where the anomaly's time spread peaks,
//!   3. per time step, the longitude mean of the anomaly along that path,
//!   4. that series divided by its own spread over time.
//!
//! Input must already sit on a regular lon/lat grid; only the focus box is
//! cut out here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anomaly::AnomalyEngine;
use crate::climatology::{Climatology, HistoricalClimatology};
use crate::config::{StatsConfig, TimeFrequency};
use crate::coords::{LAT, LON};
use crate::error::{Error, Result};
use crate::eval::map_indices_with;
use crate::field::{GriddedField, SpatialGrid};
use crate::period::ReferencePeriod;
use crate::stats::{nanmean, nanmean_std};

/// Region searched for the Gulf Stream path, in degrees. Longitudes may be
/// given on either convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl Default for FocusBox {
    fn default() -> Self {
        Self { lon_min: -72.0, lon_max: -51.9, lat_min: 36.0, lat_max: 42.0 }
    }
}

impl FocusBox {
    fn lon_range(&self) -> (f64, f64) {
        let wrap = |v: f64| if v < 0.0 { v + 360.0 } else { v };
        (wrap(self.lon_min), wrap(self.lon_max))
    }
}

/// Standardized Gulf Stream index, one value per time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GulfStreamIndex {
    pub name: String,
    pub time: Vec<NaiveDate>,
    /// Longitudes of the focus box columns, 0–360.
    pub lon: Vec<f64>,
    /// Latitude of maximum anomaly spread per column; NaN for land columns.
    #[serde(with = "crate::field::nan_as_null")]
    pub lat_of_max_std: Vec<f64>,
    #[serde(with = "crate::field::nan_as_null")]
    pub gulf_stream_index: Vec<f64>,
    pub climatology_period: ReferencePeriod,
}

/// Gulf Stream index of an SSH field over the default focus box.
pub fn gulf_stream_index(field: GriddedField, config: &StatsConfig) -> Result<GulfStreamIndex> {
    gulf_stream_index_within(field, &FocusBox::default(), config)
}

/// Gulf Stream index over `focus`.
///
/// The field must be a historical run (`time` axis) without lead or
/// member extent, on a rectilinear grid. The climatology is always monthly,
/// whatever `config.time_frequency` says.
pub fn gulf_stream_index_within(
    field: GriddedField,
    focus: &FocusBox,
    config: &StatsConfig,
) -> Result<GulfStreamIndex> {
    let monthly = StatsConfig { time_frequency: TimeFrequency::Month, ..config.clone() };
    let climo = HistoricalClimatology::new(field, &monthly)?;
    let prepared = climo.field();
    if prepared.n_lead() != 1 || prepared.n_member() != 1 {
        return Err(Error::ShapeMismatch(format!(
            "gulf stream index needs a single-member series, `{}` has {} leads and {} members",
            prepared.name,
            prepared.n_lead(),
            prepared.n_member()
        )));
    }

    let (lon, lat) = rectilinear_axes(&prepared.grid)?;
    let (lon_lo, lon_hi) = focus.lon_range();
    let cols: Vec<usize> = (0..lon.len()).filter(|&x| lon[x] >= lon_lo && lon[x] <= lon_hi).collect();
    let rows: Vec<usize> = (0..lat.len())
        .filter(|&y| lat[y] >= focus.lat_min && lat[y] <= focus.lat_max)
        .collect();
    if cols.is_empty() || rows.is_empty() {
        return Err(Error::Validation(format!("no grid points of `{}` fall in {focus:?}", prepared.name)));
    }

    let (first, last) = prepared.year_extent()?;
    debug!(variable = %prepared.name, columns = cols.len(), rows = rows.len(), first, last, "gulf stream index");
    let anom = AnomalyEngine::new(&climo)
        .anom_from_scratch(first, last, first, last, config.evaluation)?
        .materialize();
    let anomaly = &anom.anomaly.field;
    let (nt, nx) = (anomaly.n_samples(), prepared.grid.nx);

    let exec = config.evaluation.exec();
    let path: Vec<Option<usize>> = map_indices_with(exec, cols.len(), |i| {
        let x = cols[i];
        let mut best: Option<(usize, f64)> = None;
        for &y in &rows {
            let series: Vec<f64> = (0..nt).map(|t| anomaly.get(t, 0, 0, y * nx + x)).collect();
            let (_, sd) = nanmean_std(&series);
            if !sd.is_nan() && best.map_or(true, |(_, b)| sd > b) {
                best = Some((y, sd));
            }
        }
        best.map(|(y, _)| y)
    });

    let along_path: Vec<f64> = (0..nt)
        .map(|t| {
            nanmean(
                cols.iter()
                    .zip(&path)
                    .filter_map(|(&x, row)| row.map(|y| anomaly.get(t, 0, 0, y * nx + x))),
            )
        })
        .collect();
    let (_, spread) = nanmean_std(&along_path);
    let gulf_stream_index: Vec<f64> = along_path
        .iter()
        .map(|v| if spread > 0.0 { v / spread } else { f64::NAN })
        .collect();

    info!(
        variable = %prepared.name,
        steps = nt,
        land_columns = path.iter().filter(|r| r.is_none()).count(),
        "gulf stream index computed"
    );

    Ok(GulfStreamIndex {
        name: prepared.name.clone(),
        time: prepared.samples.dates.clone(),
        lon: cols.iter().map(|&x| lon[x]).collect(),
        lat_of_max_std: path.iter().map(|row| row.map_or(f64::NAN, |y| lat[y])).collect(),
        gulf_stream_index,
        climatology_period: anom.anomaly.climatology_period,
    })
}

/// 1-D `lon` per column and `lat` per row; fails unless the 2-D
/// coordinates are constant along the other axis.
fn rectilinear_axes(grid: &SpatialGrid) -> Result<(Vec<f64>, Vec<f64>)> {
    let coord = |name: &str| grid.coord(name).ok_or_else(|| Error::MissingCoordinate(name.to_string()));
    let (lon2d, lat2d) = (coord(LON)?, coord(LAT)?);
    let nx = grid.nx;
    let lon: Vec<f64> = lon2d[..nx].to_vec();
    let lat: Vec<f64> = (0..grid.ny).map(|y| lat2d[y * nx]).collect();
    for p in 0..grid.n_points() {
        if lon2d[p] != lon[p % nx] || lat2d[p] != lat[p / nx] {
            return Err(Error::Validation(
                "gulf stream index needs a rectilinear lon/lat grid; regrid the field first".to_string(),
            ));
        }
    }
    Ok((lon, lat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use approx::assert_relative_eq;
    use chrono::Datelike;

    const LONS: [f64; 4] = [-72.0, -68.0, -64.0, -50.0];
    const LATS: [f64; 5] = [35.0, 36.0, 38.0, 39.0, 41.0];

    fn step(d: NaiveDate) -> usize {
        (d.year() - 2000) as usize * 12 + d.month0() as usize
    }

    fn signal(t: usize) -> f64 {
        (t as f64 * 0.37).sin() + 0.05 * t as f64
    }

    /// Seasonal cycle plus `amp(row, col) · signal(t)`. Column 0 peaks at
    /// 38N, column 2 at 39N, column 1 is land, column 3 and the 35N row lie
    /// outside the default focus box.
    fn ssh() -> GriddedField {
        let dates = fixtures::monthly_dates(2000..=2004);
        let grid = SpatialGrid::rectilinear(&LONS, &LATS);
        let mut field = fixtures::historical(dates, grid, |d, p| {
            let (y, x) = (p / LONS.len(), p % LONS.len());
            if x == 1 {
                return f64::NAN;
            }
            let peak = if x == 2 { 3 } else { 2 };
            let amp = match y {
                0 => 10.0,
                y if y == peak => 3.0,
                y => 1.0 + 0.1 * y as f64,
            };
            5.0 * (d.month() as f64).cos() + amp * signal(step(d))
        });
        field.name = "ssh".into();
        field
    }

    /// signal minus its own calendar-month mean, standardized.
    fn expected_index() -> Vec<f64> {
        let n = 60;
        let anom: Vec<f64> = (0..n)
            .map(|t| {
                let same_month = nanmean((0..n).filter(|s| s % 12 == t % 12).map(signal));
                signal(t) - same_month
            })
            .collect();
        let (_, sd) = nanmean_std(&anom);
        anom.iter().map(|a| a / sd).collect()
    }

    #[test]
    fn follows_latitude_of_maximum_spread() {
        let gsi = gulf_stream_index(ssh(), &StatsConfig::default()).unwrap();
        assert_eq!(gsi.lon, vec![288.0, 292.0, 296.0]);
        assert_relative_eq!(gsi.lat_of_max_std[0], 38.0);
        assert!(gsi.lat_of_max_std[1].is_nan());
        assert_relative_eq!(gsi.lat_of_max_std[2], 39.0);
        assert_eq!(gsi.time.len(), 60);
        assert_eq!(gsi.climatology_period, ReferencePeriod::new(2000, 2004).unwrap());

        for (got, want) in gsi.gulf_stream_index.iter().zip(expected_index()) {
            assert_relative_eq!(*got, want, epsilon = 1e-9);
        }
        let (mean, sd) = nanmean_std(&gsi.gulf_stream_index);
        assert_relative_eq!(mean, 0.0, epsilon = 1e-9);
        assert_relative_eq!(sd, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn day_of_year_config_still_uses_monthly_climatology() {
        let daily = StatsConfig { time_frequency: TimeFrequency::DayOfYear, ..StatsConfig::default() };
        let a = gulf_stream_index(ssh(), &daily).unwrap();
        let b = gulf_stream_index(ssh(), &StatsConfig::default()).unwrap();
        assert_eq!(a.lat_of_max_std.len(), b.lat_of_max_std.len());
        for (x, y) in a.gulf_stream_index.iter().zip(&b.gulf_stream_index) {
            assert_relative_eq!(*x, *y);
        }
    }

    #[test]
    fn focus_box_and_grid_are_checked() {
        let far = FocusBox { lon_min: 0.0, lon_max: 10.0, ..FocusBox::default() };
        assert!(matches!(
            gulf_stream_index_within(ssh(), &far, &StatsConfig::default()),
            Err(Error::Validation(_))
        ));

        let mut skewed = ssh();
        if let Some(lat) = skewed.grid.coords.get_mut(LAT) {
            lat[1] += 0.5;
        }
        assert!(matches!(gulf_stream_index(skewed, &StatsConfig::default()), Err(Error::Validation(_))));

        let forecast = fixtures::forecast(&[(2000, 3)], 1, 1, fixtures::grid(1, 1), |_, _, _, _| 0.0);
        assert!(matches!(gulf_stream_index(forecast, &StatsConfig::default()), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn index_survives_json() {
        let gsi = gulf_stream_index(ssh(), &StatsConfig::default()).unwrap();
        let back: GulfStreamIndex = serde_json::from_str(&serde_json::to_string(&gsi).unwrap()).unwrap();
        assert!(back.lat_of_max_std[1].is_nan());
        assert_relative_eq!(back.gulf_stream_index[7], gsi.gulf_stream_index[7], epsilon = 1e-12);
    }
}
