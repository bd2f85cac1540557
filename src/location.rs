use geo_types::Point;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LocationError {
    #[error("location needs two comma separated fields: \"lng,lat\"")]
    Fields,
    #[error("could not parse coordinate: {0}")]
    Parse(#[from] std::num::ParseFloatError),
    #[error("longitude {0} out of range [-180, 180]")]
    Longitude(f64),
    #[error("latitude {0} out of range [-90, 90]")]
    Latitude(f64),
}

/// A WGS-84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lng: f64,
    pub lat: f64,
}

impl Location {
    pub fn new(lng: f64, lat: f64) -> Result<Self, LocationError> {
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(LocationError::Longitude(lng));
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(LocationError::Latitude(lat));
        }
        Ok(Self { lng, lat })
    }
}

impl From<Location> for [f64; 2] {
    fn from(loc: Location) -> Self {
        [loc.lng, loc.lat]
    }
}

impl From<Location> for Point<f64> {
    fn from(loc: Location) -> Self {
        Point::new(loc.lng, loc.lat)
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coords: Vec<&str> = s.split(',').collect();
        if coords.len() != 2 {
            return Err(LocationError::Fields);
        }
        let lng = coords[0].trim().parse::<f64>()?;
        let lat = coords[1].trim().parse::<f64>()?;
        Location::new(lng, lat)
    }
}
