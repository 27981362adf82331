//! Area of interest and acquisition date ranges

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius (IUGG) in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Axis-aligned geographic rectangle in WGS84 degrees.
///
/// Immutable once built; [`AreaOfInterest::new`] rejects out-of-range or
/// inverted bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaOfInterest {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl AreaOfInterest {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        for (name, value, limit) in [
            ("north", north, 90.0),
            ("south", south, 90.0),
            ("east", east, 180.0),
            ("west", west, 180.0),
        ] {
            if !value.is_finite() || value.abs() > limit {
                return Err(Error::Validation(format!(
                    "{} bound {} outside [-{}, {}]",
                    name, value, limit, limit
                )));
            }
        }
        if north <= south {
            return Err(Error::Validation(format!(
                "north ({}) must be greater than south ({})",
                north, south
            )));
        }
        if east <= west {
            return Err(Error::Validation(format!(
                "east ({}) must be greater than west ({})",
                east, west
            )));
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    /// Spherical area of the rectangle: R² · Δλ · (sin φn − sin φs)
    pub fn area_km2(&self) -> f64 {
        let dlon = (self.east - self.west).to_radians();
        let band = self.north.to_radians().sin() - self.south.to_radians().sin();
        EARTH_RADIUS_KM * EARTH_RADIUS_KM * dlon * band
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }
}

/// Inclusive calendar interval an image composite is built over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::Validation(format!(
                "date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| Error::Validation(format!("invalid date '{}': {}", s, e)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_inverted_bounds() {
        assert!(matches!(
            AreaOfInterest::new(10.0, 20.0, 5.0, 0.0),
            Err(Error::Validation(_))
        ));
        assert!(AreaOfInterest::new(10.0, 0.0, 0.0, 5.0).is_err());
        assert!(AreaOfInterest::new(91.0, 0.0, 5.0, 0.0).is_err());
        assert!(AreaOfInterest::new(f64::NAN, 0.0, 5.0, 0.0).is_err());
    }

    #[test]
    fn test_one_degree_cell_at_equator() {
        let aoi = AreaOfInterest::new(1.0, 0.0, 1.0, 0.0).unwrap();
        // ~111.2 km x ~111.2 km
        assert_relative_eq!(aoi.area_km2(), 12_364.0, max_relative = 1e-3);
    }

    #[test]
    fn test_area_shrinks_towards_pole() {
        let low = AreaOfInterest::new(1.0, 0.0, 1.0, 0.0).unwrap();
        let high = AreaOfInterest::new(61.0, 60.0, 1.0, 0.0).unwrap();
        assert!(high.area_km2() < low.area_km2() * 0.51);
    }

    #[test]
    fn test_contains() {
        let aoi = AreaOfInterest::new(38.0, 37.0, -122.0, -123.0).unwrap();
        assert!(aoi.contains(-122.5, 37.5));
        assert!(!aoi.contains(-121.5, 37.5));
    }

    #[test]
    fn test_date_range() {
        let range = DateRange::parse("2020-01-01", "2020-12-31").unwrap();
        assert_eq!(range.to_string(), "2020-01-01 to 2020-12-31");
        assert!(DateRange::parse("2021-01-01", "2020-01-01").is_err());
        assert!(DateRange::parse("2021-13-01", "2022-01-01").is_err());

        let other = DateRange::parse("2020-12-31", "2021-06-30").unwrap();
        assert!(range.overlaps(&other));
    }
}
