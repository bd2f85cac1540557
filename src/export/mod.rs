//! Serialization of collected buildings into downloadable artifacts.

use crate::record::{BuildingRecord, DataType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use thiserror::Error;

mod geojson;
mod shapefile;

pub use self::geojson::{read_geojson, to_feature_collection, write_geojson};
pub use self::shapefile::{write_shapefile_zip, SHAPEFILE_PARTS};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("geojson: {0}")]
    GeoJson(#[from] ::geojson::Error),
    #[error("shapefile: {0}")]
    Shapefile(String),
    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("feature {index}: {message}")]
    Feature { index: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    GeoJson,
    Shapefile,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::GeoJson
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::GeoJson => "geojson",
            OutputFormat::Shapefile => "zip",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::GeoJson => "application/geo+json",
            OutputFormat::Shapefile => "application/zip",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::GeoJson => f.write_str("geojson"),
            OutputFormat::Shapefile => f.write_str("shapefile"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geojson" | "json" => Ok(OutputFormat::GeoJson),
            "shapefile" | "shp" | "zip" => Ok(OutputFormat::Shapefile),
            other => Err(format!(
                "unknown output format {:?}, expected geojson or shapefile",
                other
            )),
        }
    }
}

/// An exported file, ready to be written to disk or sent to a client.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
}

/// File stem for buildings of a named region from a boundary source.
pub fn region_file_stem(data_type: DataType, source: &str, code: &str) -> String {
    format!("open_buildings_v3_{}_{}_{}", data_type, source, code)
}

/// File stem for buildings of a user supplied polygon.
pub fn wkt_file_stem(data_type: DataType) -> String {
    format!("open_buildings_v3_{}_your_own_wkt_polygon", data_type)
}

pub fn export(
    records: &[BuildingRecord],
    data_type: DataType,
    format: OutputFormat,
    stem: &str,
) -> Result<Artifact, ExportError> {
    let bytes = match format {
        OutputFormat::GeoJson => write_geojson(records, data_type).into_bytes(),
        OutputFormat::Shapefile => write_shapefile_zip(records, data_type, stem)?,
    };
    Ok(Artifact {
        bytes,
        filename: format!("{}.{}", stem, format.extension()),
        content_type: format.content_type(),
    })
}
