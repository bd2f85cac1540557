use crate::location::Location;
use csv::StringRecord;
use geo_types::{Geometry, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which flavour of the dataset to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Polygons,
    Points,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Polygons
    }
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Polygons => "polygons",
            DataType::Points => "points",
        }
    }

    fn columns(&self) -> usize {
        match self {
            DataType::Polygons => 6,
            DataType::Points => 5,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "polygons" => Ok(DataType::Polygons),
            "points" => Ok(DataType::Points),
            other => Err(format!("unknown data type {:?}, expected polygons or points", other)),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("expected at least {expected} columns, found {found}")]
    Columns { expected: usize, found: usize },
    #[error("column {column}: could not parse {value:?}")]
    Number { column: &'static str, value: String },
    #[error("invalid position: {0}")]
    Location(String),
    #[error("confidence {0} is outside [0, 1]")]
    Confidence(f64),
}

/// One building of the dataset.
///
/// Shard rows are header-less CSV. Polygon shards carry
/// `latitude,longitude,area_in_meters,confidence,geometry,full_plus_code`,
/// point shards the same without `geometry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub area_in_meters: Option<f64>,
    pub confidence: f64,
    /// Footprint as WKT, kept unparsed until export.
    pub geometry: Option<String>,
    pub full_plus_code: Option<String>,
}

fn number(row: &StringRecord, idx: usize, column: &'static str) -> Result<f64, RowError> {
    let value = row.get(idx).unwrap_or("").trim();
    value.parse::<f64>().map_err(|_| RowError::Number {
        column,
        value: value.to_string(),
    })
}

fn optional(row: &StringRecord, idx: usize) -> Option<String> {
    row.get(idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

impl BuildingRecord {
    pub fn from_row(row: &StringRecord, data_type: DataType) -> Result<Self, RowError> {
        let expected = data_type.columns() - 1;
        if row.len() < expected {
            return Err(RowError::Columns {
                expected,
                found: row.len(),
            });
        }
        let latitude = number(row, 0, "latitude")?;
        let longitude = number(row, 1, "longitude")?;
        Location::new(longitude, latitude).map_err(|e| RowError::Location(e.to_string()))?;
        let area_in_meters = match optional(row, 2) {
            Some(_) => Some(number(row, 2, "area_in_meters")?),
            None => None,
        };
        let confidence = number(row, 3, "confidence")?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(RowError::Confidence(confidence));
        }
        let (geometry, full_plus_code) = match data_type {
            DataType::Polygons => (optional(row, 4), optional(row, 5)),
            DataType::Points => (None, optional(row, 4)),
        };
        Ok(BuildingRecord {
            latitude,
            longitude,
            area_in_meters,
            confidence,
            geometry,
            full_plus_code,
        })
    }

    pub fn location(&self) -> Location {
        Location {
            lng: self.longitude,
            lat: self.latitude,
        }
    }

    /// Parses the WKT footprint. Anything other than a polygon is ignored.
    pub fn footprint(&self) -> Option<Polygon<f64>> {
        let text = self.geometry.as_deref()?;
        let wkt = wkt::Wkt::<f64>::from_str(text).ok()?;
        match Geometry::<f64>::try_from(wkt).ok()? {
            Geometry::Polygon(polygon) => Some(polygon),
            _ => None,
        }
    }
}
