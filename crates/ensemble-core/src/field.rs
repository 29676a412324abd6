use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::period::ReferencePeriod;

/// Which dated axis the samples of a field run along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleDim {
    /// Continuous time axis of a historical run.
    Time,
    /// Forecast initialization axis.
    Init,
}

impl SampleDim {
    pub fn name(self) -> &'static str {
        match self {
            SampleDim::Time => "time",
            SampleDim::Init => "init",
        }
    }
}

/// Dated sample axis (`time` or `init`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleAxis {
    pub dim: SampleDim,
    pub dates: Vec<NaiveDate>,
}

impl SampleAxis {
    pub fn time(dates: Vec<NaiveDate>) -> Self {
        Self { dim: SampleDim::Time, dates }
    }

    pub fn init(dates: Vec<NaiveDate>) -> Self {
        Self { dim: SampleDim::Init, dates }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// First and last calendar year present, or `None` for an empty axis.
    pub fn year_extent(&self) -> Option<(i32, i32)> {
        let first = self.dates.iter().map(|d| d.year()).min()?;
        let last = self.dates.iter().map(|d| d.year()).max()?;
        Some((first, last))
    }

    /// Indices of the samples whose year falls in `period`.
    pub fn indices_in(&self, period: ReferencePeriod) -> Vec<usize> {
        self.dates
            .iter()
            .enumerate()
            .filter(|(_, d)| period.contains_year(d.year()))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Horizontal grid: `ny × nx` points flattened row-major, with named
/// coordinate variables of length `ny * nx` (curvilinear-capable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialGrid {
    pub ny: usize,
    pub nx: usize,
    #[serde(default)]
    pub coords: BTreeMap<String, Vec<f64>>,
}

impl SpatialGrid {
    /// Grid without coordinate variables.
    pub fn new(ny: usize, nx: usize) -> Self {
        Self { ny, nx, coords: BTreeMap::new() }
    }

    /// Regular lon/lat mesh: rows follow `lat`, columns follow `lon`.
    pub fn rectilinear(lon: &[f64], lat: &[f64]) -> Self {
        let (ny, nx) = (lat.len(), lon.len());
        let mut lon2d = Vec::with_capacity(ny * nx);
        let mut lat2d = Vec::with_capacity(ny * nx);
        for &y in lat {
            for &x in lon {
                lon2d.push(x);
                lat2d.push(y);
            }
        }
        let mut coords = BTreeMap::new();
        coords.insert("lon".to_string(), lon2d);
        coords.insert("lat".to_string(), lat2d);
        Self { ny, nx, coords }
    }

    /// Attach a coordinate variable; its length must match the point count.
    pub fn with_coord(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        if values.len() != self.n_points() {
            return Err(Error::ShapeMismatch(format!(
                "coordinate `{name}` has {} values for {} grid points",
                values.len(),
                self.n_points()
            )));
        }
        self.coords.insert(name.to_string(), values);
        Ok(self)
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.ny * self.nx
    }

    pub fn coord(&self, name: &str) -> Option<&[f64]> {
        self.coords.get(name).map(|v| v.as_slice())
    }

    pub fn same_shape(&self, other: &SpatialGrid) -> bool {
        self.ny == other.ny && self.nx == other.nx
    }

    pub(crate) fn check_same_shape(&self, other: &SpatialGrid, what: &str) -> Result<()> {
        if !self.same_shape(other) {
            return Err(Error::ShapeMismatch(format!(
                "{what} grid is {}x{}, field grid is {}x{}",
                other.ny, other.nx, self.ny, self.nx
            )));
        }
        Ok(())
    }
}

/// A labeled gridded ensemble field.
///
/// Values are stored row-major as `[sample][lead][member][point]`; a field
/// without a lead or member dimension has extent 1 along it. NaN marks
/// missing values (land, gaps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GriddedField {
    /// Variable name, e.g. `tos`.
    pub name: String,
    pub samples: SampleAxis,
    /// Lead times in months since initialization.
    #[serde(default)]
    pub lead: Option<Vec<f64>>,
    #[serde(default)]
    pub member: Option<Vec<u32>>,
    pub grid: SpatialGrid,
    #[serde(with = "nan_as_null")]
    pub data: Vec<f64>,
    /// Free-form metadata, passed through to products.
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl GriddedField {
    /// Build a field, checking that `data` matches the declared dimensions.
    pub fn new(
        name: &str,
        samples: SampleAxis,
        lead: Option<Vec<f64>>,
        member: Option<Vec<u32>>,
        grid: SpatialGrid,
        data: Vec<f64>,
    ) -> Result<Self> {
        let field = Self {
            name: name.to_string(),
            samples,
            lead,
            member,
            grid,
            data,
            attrs: BTreeMap::new(),
        };
        field.check_shape()?;
        Ok(field)
    }

    /// Build a field with every value set to `fill`.
    pub fn filled(
        name: &str,
        samples: SampleAxis,
        lead: Option<Vec<f64>>,
        member: Option<Vec<u32>>,
        grid: SpatialGrid,
        fill: f64,
    ) -> Self {
        let n_lead = lead.as_ref().map_or(1, |l| l.len());
        let n_member = member.as_ref().map_or(1, |m| m.len());
        let len = samples.len() * n_lead * n_member * grid.n_points();
        Self {
            name: name.to_string(),
            samples,
            lead,
            member,
            grid,
            data: vec![fill; len],
            attrs: BTreeMap::new(),
        }
    }

    /// Fails with a shape mismatch when `data` is ragged against the axes.
    pub fn check_shape(&self) -> Result<()> {
        let expected = self.n_samples() * self.block_len();
        if self.data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "`{}` holds {} values, dimensions {:?} require {expected}",
                self.name,
                self.data.len(),
                self.dims()
            )));
        }
        Ok(())
    }

    /// Dimension names in storage order.
    pub fn dims(&self) -> Vec<&'static str> {
        let mut dims = vec![self.samples.dim.name()];
        if self.lead.is_some() {
            dims.push("lead");
        }
        if self.member.is_some() {
            dims.push("member");
        }
        dims.extend(["y", "x"]);
        dims
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn n_lead(&self) -> usize {
        self.lead.as_ref().map_or(1, |l| l.len())
    }

    #[inline]
    pub fn n_member(&self) -> usize {
        self.member.as_ref().map_or(1, |m| m.len())
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.grid.n_points()
    }

    /// Number of values per sample (`lead × member × point`).
    #[inline]
    pub fn block_len(&self) -> usize {
        self.n_lead() * self.n_member() * self.n_points()
    }

    #[inline]
    pub fn index(&self, sample: usize, lead: usize, member: usize, point: usize) -> usize {
        ((sample * self.n_lead() + lead) * self.n_member() + member) * self.n_points() + point
    }

    #[inline]
    pub fn get(&self, sample: usize, lead: usize, member: usize, point: usize) -> f64 {
        self.data[self.index(sample, lead, member, point)]
    }

    #[inline]
    pub fn set(&mut self, sample: usize, lead: usize, member: usize, point: usize, val: f64) {
        let i = self.index(sample, lead, member, point);
        self.data[i] = val;
    }

    /// All values of one sample, laid out `[lead][member][point]`.
    pub fn sample_block(&self, sample: usize) -> &[f64] {
        let len = self.block_len();
        &self.data[sample * len..(sample + 1) * len]
    }

    /// Year extent of the sample axis; an empty axis is a range error.
    pub fn year_extent(&self) -> Result<(i32, i32)> {
        self.samples.year_extent().ok_or_else(|| {
            Error::Range(format!("`{}` has no {} samples", self.name, self.samples.dim.name()))
        })
    }

    /// New field holding only the listed samples, in the given order.
    pub fn select_samples(&self, indices: &[usize]) -> GriddedField {
        let mut data = Vec::with_capacity(indices.len() * self.block_len());
        for &i in indices {
            data.extend_from_slice(self.sample_block(i));
        }
        GriddedField {
            name: self.name.clone(),
            samples: SampleAxis {
                dim: self.samples.dim,
                dates: indices.iter().map(|&i| self.samples.dates[i]).collect(),
            },
            lead: self.lead.clone(),
            member: self.member.clone(),
            grid: self.grid.clone(),
            data,
            attrs: self.attrs.clone(),
        }
    }

    /// New field restricted to samples whose year falls in `period`.
    pub fn select_period(&self, period: ReferencePeriod) -> GriddedField {
        self.select_samples(&self.samples.indices_in(period))
    }

    /// Index of the sample dated in the given year and month.
    pub fn find_sample(&self, year: i32, month: u32) -> Option<usize> {
        self.samples
            .dates
            .iter()
            .position(|d| d.year() == year && d.month() == month)
    }

    /// Fails unless the field carries `varname`.
    pub fn check_variable(&self, varname: &str) -> Result<()> {
        if self.name != varname {
            return Err(Error::MissingVariable {
                expected: varname.to_string(),
                found: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Fails unless the samples run along `dim`.
    pub(crate) fn check_sample_dim(&self, dim: SampleDim) -> Result<()> {
        if self.samples.dim != dim {
            return Err(Error::ShapeMismatch(format!(
                "`{}` is sampled along `{}`, expected `{}`",
                self.name,
                self.samples.dim.name(),
                dim.name()
            )));
        }
        Ok(())
    }
}

/// JSON has no NaN: missing values travel as `null`.
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| if v.is_nan() { None } else { Some(*v) }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
