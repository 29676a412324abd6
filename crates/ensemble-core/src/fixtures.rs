//! Synthetic fields for unit tests.

use chrono::{Datelike, NaiveDate};

use crate::field::{GriddedField, SampleAxis, SpatialGrid};

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `nx × ny` grid spanning western longitudes so normalization has work to do.
pub fn grid(ny: usize, nx: usize) -> SpatialGrid {
    let lon: Vec<f64> = (0..nx).map(|i| -75.0 + i as f64).collect();
    let lat: Vec<f64> = (0..ny).map(|j| 35.0 + j as f64).collect();
    SpatialGrid::rectilinear(&lon, &lat)
}

/// Forecast field initialized on the first of each `(year, month)` pair,
/// valued by `f(init, lead, member, point)`.
pub fn forecast<F>(
    inits: &[(i32, u32)],
    n_lead: usize,
    n_member: usize,
    grid: SpatialGrid,
    f: F,
) -> GriddedField
where
    F: Fn(NaiveDate, usize, usize, usize) -> f64,
{
    let dates: Vec<NaiveDate> = inits.iter().map(|&(y, m)| ymd(y, m, 1)).collect();
    let mut field = GriddedField::filled(
        "tos",
        SampleAxis::init(dates.clone()),
        Some((0..n_lead).map(|l| l as f64).collect()),
        Some((1..=n_member as u32).collect()),
        grid,
        0.0,
    );
    for (s, &d) in dates.iter().enumerate() {
        for l in 0..n_lead {
            for m in 0..n_member {
                for p in 0..field.n_points() {
                    field.set(s, l, m, p, f(d, l, m, p));
                }
            }
        }
    }
    field
}

/// Every `(year, month)` init for the given years and init months.
pub fn inits(years: std::ops::RangeInclusive<i32>, months: &[u32]) -> Vec<(i32, u32)> {
    years
        .flat_map(|y| months.iter().map(move |&m| (y, m)))
        .collect()
}

/// Historical field on the given dates, valued by `f(date, point)`.
pub fn historical<F>(dates: Vec<NaiveDate>, grid: SpatialGrid, f: F) -> GriddedField
where
    F: Fn(NaiveDate, usize) -> f64,
{
    let mut field = GriddedField::filled("tos", SampleAxis::time(dates.clone()), None, None, grid, 0.0);
    for (s, &d) in dates.iter().enumerate() {
        for p in 0..field.n_points() {
            field.set(s, 0, 0, p, f(d, p));
        }
    }
    field
}

/// Mid-month dates for every month of the given years.
pub fn monthly_dates(years: std::ops::RangeInclusive<i32>) -> Vec<NaiveDate> {
    years
        .flat_map(|y| (1..=12).map(move |m| ymd(y, m, 15)))
        .collect()
}

/// Daily dates for the given years.
pub fn daily_dates(years: std::ops::RangeInclusive<i32>) -> Vec<NaiveDate> {
    let (first, last) = (*years.start(), *years.end());
    ymd(first, 1, 1)
        .iter_days()
        .take_while(|d| d.year() <= last)
        .collect()
}
