//! Named administrative boundaries.
//!
//! Boundaries are kept in an R-tree, so besides lookups by code or name a
//! set can also answer which boundaries contain a location. Sets are loaded
//! from a countries GeoJSON, a zipped admin-0 shapefile or an OSM extract,
//! and can be stored as a bincode index.

use crate::location::Location;
use crate::region::Region;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo_types::{MultiPolygon, Point};
use rstar::primitives::Rectangle;
use rstar::Envelope;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::info;

mod countries;
mod natural_earth;
mod osm;

pub use countries::read_countries;
pub use natural_earth::{download_border_source, read_border_archive, BorderSource};
pub use osm::get_osm_boundaries;

type Point2D = [f64; 2];

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("no boundary matches {0:?}")]
    NotFound(String),
    #[error("{query:?} matches several boundaries: {}", candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("malformed boundary data: {0}")]
    Format(String),
    #[error("download failed: {0}")]
    Network(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Boundary {
    rect: Rectangle<Point2D>,
    /// ISO 3166-1 alpha-3 code, when the source has one.
    pub code: Option<String>,
    pub name: String,
    pub admin_level: u8,
    area: f64,
    pub mp: MultiPolygon<f64>,
}

impl Boundary {
    pub fn new(mp: MultiPolygon<f64>, code: Option<&str>, name: &str, admin_level: u8) -> Option<Self> {
        let rect = mp.bounding_rect()?;
        let lower = [rect.min().x, rect.min().y];
        let upper = [rect.max().x, rect.max().y];
        let aabb = AABB::from_corners(lower, upper);
        let area = aabb.area();
        let rect = Rectangle::from_aabb(aabb);
        Some(Boundary {
            rect,
            code: code.map(str::to_uppercase),
            name: name.to_string(),
            admin_level,
            area,
            mp,
        })
    }

    pub fn contains(&self, point: &Point2D) -> bool {
        let [x, y] = point;
        self.mp.contains(&Point::new(*x, *y))
    }

    /// `"KEN (Kenya)"`, or the bare name without a code.
    pub fn label(&self) -> String {
        match &self.code {
            Some(code) => format!("{} ({})", code, self.name),
            None => self.name.clone(),
        }
    }
}

impl RTreeObject for Boundary {
    type Envelope = AABB<Point2D>;

    fn envelope(&self) -> Self::Envelope {
        self.rect.envelope()
    }
}

impl PointDistance for Boundary {
    fn distance_2(&self, point: &Point2D) -> f64 {
        self.rect.distance_2(point)
    }
}

/// A boundary resolved to a region ready for retrieval.
#[derive(Debug, Clone)]
pub struct NamedRegion {
    pub code: String,
    pub name: String,
    pub region: Region,
}

pub trait BoundaryProvider: Send + Sync {
    /// Short name of the data source, used in artifact names.
    fn source_name(&self) -> &str;

    /// Resolves `"KEN"`, `"KEN (Kenya)"` or `"kenya"`.
    fn lookup(&self, query: &str) -> Result<NamedRegion, BoundaryError>;
}

#[derive(Serialize, Deserialize)]
pub struct BoundarySet {
    source: String,
    tree: RTree<Boundary>,
}

enum Query<'a> {
    Code(String),
    Name(&'a str),
    CodeOrName(&'a str),
}

fn parse_query(query: &str) -> Query<'_> {
    let query = query.trim();
    if let Some(open) = query.find(" (") {
        if query.ends_with(')') {
            return Query::Code(query[..open].trim().to_uppercase());
        }
    }
    if query.len() == 3 && query.chars().all(|c| c.is_ascii_alphabetic()) {
        Query::CodeOrName(query)
    } else {
        Query::Name(query)
    }
}

impl BoundarySet {
    pub fn new(source: impl Into<String>, boundaries: Vec<Boundary>) -> Self {
        BoundarySet {
            source: source.into(),
            tree: RTree::bulk_load(boundaries),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Boundaries containing `loc`.
    pub fn locate(&self, loc: &Location) -> Vec<&Boundary> {
        let point: Point2D = (*loc).into();
        self.tree
            .locate_all_at_point(&point)
            .filter(|boundary| boundary.contains(&point))
            .collect()
    }

    /// Sorted, unique labels of every boundary in the set.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.tree.iter().map(Boundary::label).collect();
        labels.sort();
        labels.dedup();
        labels
    }

    pub fn load(path: &Path) -> Result<Self, BoundaryError> {
        let file = BufReader::new(File::open(path)?);
        let set: BoundarySet =
            bincode::deserialize_from(file).map_err(|e| BoundaryError::Format(e.to_string()))?;
        info!(path = %path.display(), boundaries = set.len(), "loaded boundary index");
        Ok(set)
    }

    pub fn save(&self, path: &Path) -> Result<(), BoundaryError> {
        let file = BufWriter::new(File::create(path)?);
        bincode::serialize_into(file, self).map_err(|e| BoundaryError::Format(e.to_string()))
    }

    fn by_code(&self, code: &str) -> Vec<&Boundary> {
        self.tree
            .iter()
            .filter(|b| b.code.as_deref().map_or(false, |c| c.eq_ignore_ascii_case(code)))
            .collect()
    }

    fn by_name(&self, name: &str) -> Vec<&Boundary> {
        let name = name.to_lowercase();
        self.tree
            .iter()
            .filter(|b| b.name.to_lowercase() == name)
            .collect()
    }

    fn matches(&self, query: &str) -> Vec<&Boundary> {
        match parse_query(query) {
            Query::Code(code) => self.by_code(&code),
            Query::Name(name) => self.by_name(name),
            Query::CodeOrName(text) => {
                let found = self.by_code(text);
                if found.is_empty() {
                    self.by_name(text)
                } else {
                    found
                }
            }
        }
    }
}

impl BoundaryProvider for BoundarySet {
    fn source_name(&self) -> &str {
        &self.source
    }

    fn lookup(&self, query: &str) -> Result<NamedRegion, BoundaryError> {
        let found = self.matches(query);
        let first = match found.first() {
            Some(first) => *first,
            None => return Err(BoundaryError::NotFound(query.trim().to_string())),
        };
        let mut candidates: Vec<String> = found.iter().map(|b| b.label()).collect();
        candidates.sort();
        candidates.dedup();
        let same_boundary = found
            .iter()
            .all(|b| b.code == first.code && (b.code.is_some() || b.name == first.name));
        if !same_boundary {
            return Err(BoundaryError::Ambiguous {
                query: query.trim().to_string(),
                candidates,
            });
        }

        // pieces sharing a code are merged into one region
        let polygons = found.iter().flat_map(|b| b.mp.0.iter().cloned()).collect();
        let region = Region::new(MultiPolygon(polygons))
            .map_err(|e| BoundaryError::Format(format!("{}: {}", first.label(), e)))?;
        Ok(NamedRegion {
            code: first.code.clone().unwrap_or_else(|| first.name.clone()),
            name: first.name.clone(),
            region,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    struct AABBWrapper(AABB<Point2D>);
    impl From<AABBWrapper> for MultiPolygon<f64> {
        fn from(aabb: AABBWrapper) -> Self {
            let [min_x, min_y] = aabb.0.lower();
            let [max_x, max_y] = aabb.0.upper();
            polygon![
                (x: min_x, y: min_y),
                (x: max_x, y: min_y),
                (x: max_x, y: max_y),
                (x: min_x, y: max_y),
                (x: min_x, y: min_y),
            ]
            .into()
        }
    }

    fn get_test_boundaries() -> Vec<Boundary> {
        vec![
            ([0.0, 0.0], [0.4, 1.0], Some("LFT"), "Left"),
            ([0.6, 0.0], [1.0, 1.0], Some("RGT"), "Right"),
            ([2.0, 0.0], [3.0, 1.0], Some("RGT"), "Right"),
            ([0.25, 0.0], [0.75, 1.0], Some("MID"), "Georgia"),
            ([5.0, 5.0], [6.0, 6.0], Some("GEO"), "Georgia"),
            ([0., 0.], [1.0, 1.0], None, "Huge"),
        ]
        .into_iter()
        .filter_map(|(lower, upper, code, name)| {
            let aabb = AABB::from_corners(lower, upper);
            let mp: MultiPolygon<f64> = AABBWrapper(aabb).into();
            Boundary::new(mp, code, name, 2)
        })
        .collect()
    }

    fn test_set() -> BoundarySet {
        BoundarySet::new("test", get_test_boundaries())
    }

    #[test]
    fn locates_points_in_boundaries() {
        let set = test_set();
        let mut names: Vec<String> = set
            .locate(&Location::new(0.3, 0.2).unwrap())
            .into_iter()
            .map(|b| b.name.clone())
            .collect();
        names.sort();
        assert_eq!(names, ["Georgia", "Huge", "Left"]);
        assert!(set.locate(&Location::new(1.5, 0.5).unwrap()).is_empty());
    }

    #[test]
    fn looks_up_codes_and_names() {
        let set = test_set();
        assert_eq!(set.lookup("lft").unwrap().name, "Left");
        assert_eq!(set.lookup("LFT (Left)").unwrap().code, "LFT");
        assert_eq!(set.lookup("left").unwrap().code, "LFT");
        let huge = set.lookup("huge").unwrap();
        assert_eq!(huge.code, "Huge");
    }

    #[test]
    fn merges_pieces_of_one_code() {
        let right = test_set().lookup("RGT").unwrap();
        assert_eq!(right.region.geometry().0.len(), 2);
        let rect = right.region.lat_lng_rect();
        assert_eq!((rect.lng_lo, rect.lng_hi), (0.6, 3.0));
    }

    #[test]
    fn reports_missing_and_ambiguous_queries() {
        let set = test_set();
        assert!(matches!(set.lookup("Atlantis"), Err(BoundaryError::NotFound(_))));
        match set.lookup("georgia") {
            Err(BoundaryError::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates, ["GEO (Georgia)", "MID (Georgia)"])
            }
            other => panic!("expected an ambiguous match, got {:?}", other.map(|r| r.code)),
        }
    }

    #[test]
    fn index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boundaries.bin");
        test_set().save(&path).unwrap();
        let loaded = BoundarySet::load(&path).unwrap();
        assert_eq!(loaded.source_name(), "test");
        assert_eq!(loaded.len(), 6);
        assert_eq!(loaded.labels()[0], "GEO (Georgia)");
    }
}
