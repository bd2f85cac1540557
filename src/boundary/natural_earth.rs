use super::{Boundary, BoundaryError};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Reader, Shape};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use zip::ZipArchive;

const CODE_KEYS: [&str; 2] = ["ISO_A3", "ADM0_A3"];
const NAME_KEYS: [&str; 4] = ["NAME", "ADMIN", "WB_NAME", "NAME_EN"];
const NO_CODE: &str = "-99";

/// Published admin-0 boundary archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorderSource {
    #[serde(rename = "ne_110m")]
    NaturalEarth110m,
    #[serde(rename = "ne_10m")]
    NaturalEarth10m,
    #[serde(rename = "wb_10m")]
    WorldBank10m,
}

impl BorderSource {
    pub const ALL: [BorderSource; 3] = [
        BorderSource::NaturalEarth110m,
        BorderSource::NaturalEarth10m,
        BorderSource::WorldBank10m,
    ];

    pub fn source_name(&self) -> &'static str {
        match self {
            BorderSource::NaturalEarth110m => "ne_110m",
            BorderSource::NaturalEarth10m => "ne_10m",
            BorderSource::WorldBank10m => "wb_10m",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            BorderSource::NaturalEarth110m => {
                "https://naciscdn.org/naturalearth/110m/cultural/ne_110m_admin_0_countries.zip"
            }
            BorderSource::NaturalEarth10m => {
                "https://naciscdn.org/naturalearth/10m/cultural/ne_10m_admin_0_countries.zip"
            }
            BorderSource::WorldBank10m => {
                "https://datacatalogfiles.worldbank.org/ddh-published/0038272/DR0046659/wb_countries_admin0_10m.zip"
            }
        }
    }

    fn file_name(&self) -> &'static str {
        self.url().rsplit('/').next().unwrap_or("borders.zip")
    }
}

impl Default for BorderSource {
    fn default() -> Self {
        BorderSource::NaturalEarth110m
    }
}

impl fmt::Display for BorderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_name())
    }
}

impl FromStr for BorderSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BorderSource::ALL
            .iter()
            .find(|source| source.source_name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown border source {:?}, expected ne_110m, ne_10m or wb_10m", s))
    }
}

/// Downloads the archive of `source` into `dir` unless it is already there.
pub async fn download_border_source(source: BorderSource, dir: &Path) -> Result<PathBuf, BoundaryError> {
    let path = dir.join(source.file_name());
    if tokio::fs::metadata(&path).await.is_ok() {
        debug!(path = %path.display(), "border archive already present");
        return Ok(path);
    }
    let network = |e: reqwest::Error| BoundaryError::Network(e.to_string());
    let body = reqwest::get(source.url())
        .await
        .map_err(network)?
        .error_for_status()
        .map_err(network)?
        .bytes()
        .await
        .map_err(network)?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, &body).await?;
    info!(url = source.url(), path = %path.display(), bytes = body.len(), "downloaded border archive");
    Ok(path)
}

fn character<'a>(record: &'a Record, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| match record.get(key) {
            Some(FieldValue::Character(Some(value))) => Some(value.trim()),
            _ => None,
        })
        .find(|value| !value.is_empty() && *value != NO_CODE)
}

fn ring(points: &[shapefile::Point]) -> LineString<f64> {
    LineString(points.iter().map(|p| Coord { x: p.x, y: p.y }).collect())
}

/// Outer rings start a polygon, the inner rings that follow are its holes.
fn shp_to_geo(shape: &shapefile::Polygon) -> MultiPolygon<f64> {
    let mut polygons = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();
    for r in shape.rings() {
        match r {
            PolygonRing::Outer(points) => {
                if let Some(previous) = exterior.replace(ring(points)) {
                    polygons.push(Polygon::new(previous, std::mem::take(&mut holes)));
                }
            }
            PolygonRing::Inner(points) => holes.push(ring(points)),
        }
    }
    if let Some(last) = exterior {
        polygons.push(Polygon::new(last, holes));
    }
    MultiPolygon(polygons)
}

fn find_shp(dir: &Path) -> Result<Option<PathBuf>, BoundaryError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(found) = find_shp(&path)? {
                return Ok(Some(found));
            }
        } else if path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"))
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Country boundaries of a zipped admin-0 shapefile.
pub fn read_border_archive(path: &Path) -> Result<Vec<Boundary>, BoundaryError> {
    let format = |e: &dyn fmt::Display| BoundaryError::Format(format!("{}: {}", path.display(), e));
    let mut archive = ZipArchive::new(File::open(path)?).map_err(|e| format(&e))?;
    let dir = tempfile::tempdir()?;
    archive.extract(dir.path()).map_err(|e| format(&e))?;
    let shp = find_shp(dir.path())?.ok_or_else(|| format(&"archive holds no .shp file"))?;

    let mut reader = Reader::from_path(&shp).map_err(|e| format(&e))?;
    let mut boundaries = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|e| format(&e))?;
        let polygon = match shape {
            Shape::Polygon(polygon) => polygon,
            _ => continue,
        };
        let name = match character(&record, &NAME_KEYS) {
            Some(name) => name,
            None => continue,
        };
        let code = character(&record, &CODE_KEYS);
        if let Some(boundary) = Boundary::new(shp_to_geo(&polygon), code, name, 2) {
            boundaries.push(boundary);
        }
    }
    info!(path = %path.display(), boundaries = boundaries.len(), "read border archive");
    Ok(boundaries)
}
