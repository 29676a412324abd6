/// Spatial coordinate validation and longitude convention handling.
/// All engines expect coordinates named exactly `lon` and `lat`, with
/// longitudes on the 0–360 convention.

use crate::config::StatsConfig;
use crate::error::{Error, Result};
use crate::field::GriddedField;

pub const LON: &str = "lon";
pub const LAT: &str = "lat";

/// Checks and normalizes the horizontal coordinates of a field.
pub struct CoordinateWrangle<'a> {
    field: &'a GriddedField,
}

impl<'a> CoordinateWrangle<'a> {
    pub fn new(field: &'a GriddedField) -> Self {
        Self { field }
    }

    /// Fails with `MissingCoordinate` naming the first of `lon`, `lat`
    /// that the field does not carry.
    pub fn check_coord_name(&self) -> Result<()> {
        for name in [LON, LAT] {
            if !self.field.grid.coords.contains_key(name) {
                return Err(Error::MissingCoordinate(name.to_string()));
            }
        }
        Ok(())
    }

    /// Copy of the field with longitudes mapped from -180–180 to 0–360.
    /// Values already ≥ 0 are left unchanged. Assumes validated names.
    pub fn to_360(&self) -> GriddedField {
        let mut out = self.field.clone();
        if let Some(lon) = out.grid.coords.get_mut(LON) {
            for v in lon.iter_mut() {
                if *v < 0.0 {
                    *v += 360.0;
                }
            }
        }
        out
    }

    /// Validate, then convert to 0–360.
    pub fn normalized(&self) -> Result<GriddedField> {
        self.check_coord_name()?;
        Ok(self.to_360())
    }
}

/// Rename a coordinate variable, e.g. `geolon` → `lon`.
/// A missing source name is not an error; the field is returned unchanged.
pub fn rename_coord(mut field: GriddedField, from: &str, to: &str) -> GriddedField {
    if let Some(values) = field.grid.coords.remove(from) {
        field.grid.coords.insert(to.to_string(), values);
    }
    field
}

/// Apply the configured coordinate aliases, then validate and convert to
/// 0–360. Every engine runs its input through this once on construction.
pub fn prepare_field(field: GriddedField, config: &StatsConfig) -> Result<GriddedField> {
    let field = match &config.coord_aliases {
        Some([lon, lat]) => rename_coord(rename_coord(field, lon, LON), lat, LAT),
        None => field,
    };
    field.check_shape()?;
    CoordinateWrangle::new(&field).normalized()
}
