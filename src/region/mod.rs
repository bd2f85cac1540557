use crate::cell::{Cell, LatLngRect};
use crate::location::Location;
use geo::{Area, BoundingRect, CoordsIter, Intersects};
use geo_types::{Coord, Geometry, Line, LineString, MultiPolygon, Rect};
use rstar::{RTree, RTreeObject, AABB};
use std::str::FromStr;
use thiserror::Error;

type Point2D = [f64; 2];

/// Each cell edge is split into this many pieces before relating a cell to
/// a region, so the lon/lat polygon follows the geodesic edge closely.
const CELL_EDGE_SEGMENTS: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum RegionError {
    #[error("could not parse WKT: {0}")]
    Wkt(String),
    #[error("region must be a POLYGON or MULTIPOLYGON, got {0}")]
    NotPolygonal(&'static str),
    #[error("region is empty")]
    Empty,
    #[error("polygon {0} of the region has fewer than 4 exterior coordinates")]
    Ring(usize),
    #[error("coordinate ({0}, {1}) is outside the lon/lat range")]
    Coordinate(f64, f64),
    #[error("region has zero area")]
    ZeroArea,
}

/// A validated polygonal area in lon/lat degrees.
#[derive(Debug, Clone)]
pub struct Region {
    geometry: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

impl Region {
    pub fn new(geometry: MultiPolygon<f64>) -> Result<Self, RegionError> {
        if geometry.0.is_empty() {
            return Err(RegionError::Empty);
        }
        for (idx, polygon) in geometry.0.iter().enumerate() {
            if polygon.exterior().0.len() < 4 {
                return Err(RegionError::Ring(idx));
            }
        }
        for coord in geometry.coords_iter() {
            if Location::new(coord.x, coord.y).is_err() {
                return Err(RegionError::Coordinate(coord.x, coord.y));
            }
        }
        if geometry.unsigned_area() <= 0.0 {
            return Err(RegionError::ZeroArea);
        }
        let bounds = geometry.bounding_rect().ok_or(RegionError::Empty)?;
        Ok(Region { geometry, bounds })
    }

    pub fn from_geometry(geometry: Geometry<f64>) -> Result<Self, RegionError> {
        match geometry {
            Geometry::Polygon(polygon) => Region::new(MultiPolygon(vec![polygon])),
            Geometry::MultiPolygon(mp) => Region::new(mp),
            other => Err(RegionError::NotPolygonal(geometry_name(&other))),
        }
    }

    pub fn from_wkt(text: &str) -> Result<Self, RegionError> {
        let wkt = wkt::Wkt::<f64>::from_str(text.trim())
            .map_err(|e| RegionError::Wkt(e.to_string()))?;
        let geometry: Geometry<f64> = wkt
            .try_into()
            .map_err(|e: wkt::conversion::Error| RegionError::Wkt(e.to_string()))?;
        Region::from_geometry(geometry)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn lat_lng_rect(&self) -> LatLngRect {
        let (min, max) = (self.bounds.min(), self.bounds.max());
        LatLngRect::new(min.y, max.y, min.x, max.x)
    }
}

fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) => "LINE",
        Geometry::LineString(_) => "LINESTRING",
        Geometry::Polygon(_) => "POLYGON",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        Geometry::Rect(_) => "RECT",
        Geometry::Triangle(_) => "TRIANGLE",
    }
}

/// How a cell lies relative to a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRelation {
    Disjoint,
    /// The region covers the whole cell, every row qualifies.
    Covered,
    /// The cell straddles the region boundary, rows must be tested.
    Partial,
}

/// One edge of a region ring, tagged with the polygon it belongs to.
#[derive(Debug)]
struct RegionEdge {
    line: Line<f64>,
    part: usize,
}

impl RTreeObject for RegionEdge {
    type Envelope = AABB<Point2D>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.line.start.into(), self.line.end.into())
    }
}

/// A region indexed for repeated containment tests.
///
/// Every ring edge sits in an R-tree, so a point test only visits the edges
/// a ray from the point crosses and relating a cell only visits the edges
/// near that cell. Points on the region boundary count as inside, so a cell
/// the region covers and the rows inside that cell always agree.
#[derive(Debug)]
pub struct PreparedRegion {
    edges: RTree<RegionEdge>,
    rect: LatLngRect,
}

impl PreparedRegion {
    pub fn new(region: Region) -> Self {
        let edges = region
            .geometry()
            .0
            .iter()
            .enumerate()
            .flat_map(|(part, polygon)| {
                std::iter::once(polygon.exterior())
                    .chain(polygon.interiors())
                    .flat_map(LineString::lines)
                    .map(move |line| RegionEdge { line, part })
            })
            .collect();
        PreparedRegion {
            edges: RTree::bulk_load(edges),
            rect: region.lat_lng_rect(),
        }
    }

    pub fn covers(&self, loc: &Location) -> bool {
        if !self.rect.contains(loc) {
            return false;
        }
        let point: Point2D = (*loc).into();
        let coord = Coord::from(point);
        let on_boundary = self
            .edges
            .locate_in_envelope_intersecting(&AABB::from_point(point))
            .any(|edge| edge.line.intersects(&coord));
        if on_boundary {
            return true;
        }

        // even-odd count of the crossings of a ray running east, per polygon
        let ray = AABB::from_corners(point, [self.rect.lng_hi, loc.lat]);
        let mut crossings: Vec<usize> = self
            .edges
            .locate_in_envelope_intersecting(&ray)
            .filter(|edge| crosses_east(&edge.line, coord))
            .map(|edge| edge.part)
            .collect();
        crossings.sort_unstable();
        crossings
            .chunk_by(|a, b| a == b)
            .any(|run| run.len() % 2 == 1)
    }

    pub fn relate_cell(&self, cell: &Cell) -> CellRelation {
        let bound = cell.bound();
        if !bound.intersects(&self.rect) {
            return CellRelation::Disjoint;
        }
        let polygon = match cell.polygon(CELL_EDGE_SEGMENTS) {
            Some(polygon) => polygon,
            None => return CellRelation::Partial,
        };
        let envelope = AABB::from_corners(
            [bound.lng_lo, bound.lat_lo],
            [bound.lng_hi, bound.lat_hi],
        );
        let boundary_inside = self
            .edges
            .locate_in_envelope_intersecting(&envelope)
            .any(|edge| polygon.intersects(&edge.line));
        if boundary_inside {
            return CellRelation::Partial;
        }

        // no region edge reaches the cell, so it lies wholly inside or
        // wholly outside the region
        let vertex = polygon.exterior().0[0];
        match Location::new(vertex.x, vertex.y) {
            Ok(loc) if self.covers(&loc) => CellRelation::Covered,
            Ok(_) => CellRelation::Disjoint,
            Err(_) => CellRelation::Partial,
        }
    }
}

/// Whether `line` crosses the horizontal ray running east from `coord`.
/// Each edge owns its lower endpoint only, so a ray through a vertex is
/// counted once.
fn crosses_east(line: &Line<f64>, coord: Coord<f64>) -> bool {
    let (a, b) = (line.start, line.end);
    if (a.y > coord.y) == (b.y > coord.y) {
        return false;
    }
    let x = a.x + (coord.y - a.y) * (b.x - a.x) / (b.y - a.y);
    x > coord.x
}
