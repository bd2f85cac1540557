//! S2 cell identifiers and cell geometry.
//!
//! Cell ids are 64-bit: 3 face bits, then two bits per level along the
//! Hilbert curve, then a single marker bit whose position encodes the level.
//! Tokens are the hex form of the id with trailing zeros removed, which is how
//! the shard files of the building dataset are named.

use crate::location::Location;
use geo_types::{Coord, LineString, Polygon};
use lazy_static::lazy_static;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_LEVEL: u8 = 30;

const POS_BITS: u32 = 2 * MAX_LEVEL as u32 + 1;
const MAX_SIZE: u32 = 1 << MAX_LEVEL;
const LOOKUP_BITS: u32 = 4;
const SWAP_MASK: usize = 0x01;
const INVERT_MASK: usize = 0x02;
const POS_TO_IJ: [[usize; 4]; 4] = [[0, 1, 3, 2], [0, 2, 3, 1], [3, 2, 0, 1], [3, 1, 0, 2]];
const POS_TO_ORIENTATION: [usize; 4] = [SWAP_MASK, 0, 0, INVERT_MASK | SWAP_MASK];

/// Slack added around vertex extremes when bounding a cell, in degrees.
const BOUND_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum CellError {
    #[error("invalid cell token {0:?}")]
    Token(String),
}

struct Lookup {
    pos: Vec<usize>,
    ij: Vec<usize>,
}

impl Lookup {
    fn build() -> Self {
        let size = 1 << (2 * LOOKUP_BITS + 2);
        let mut lookup = Lookup {
            pos: vec![0; size],
            ij: vec![0; size],
        };
        for orientation in [0, SWAP_MASK, INVERT_MASK, SWAP_MASK | INVERT_MASK] {
            lookup.fill(0, 0, 0, orientation, 0, orientation);
        }
        lookup
    }

    fn fill(&mut self, level: u32, i: usize, j: usize, origin: usize, pos: usize, orientation: usize) {
        if level == LOOKUP_BITS {
            let ij = (i << LOOKUP_BITS) + j;
            self.pos[(ij << 2) + origin] = (pos << 2) + orientation;
            self.ij[(pos << 2) + origin] = (ij << 2) + orientation;
            return;
        }
        let quadrants = POS_TO_IJ[orientation];
        for (k, quadrant) in quadrants.iter().enumerate() {
            self.fill(
                level + 1,
                (i << 1) + (quadrant >> 1),
                (j << 1) + (quadrant & 1),
                origin,
                (pos << 2) + k,
                orientation ^ POS_TO_ORIENTATION[k],
            );
        }
    }
}

lazy_static! {
    static ref LOOKUP: Lookup = Lookup::build();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub u64);

fn lsb_for_level(level: u8) -> u64 {
    1u64 << (2 * (MAX_LEVEL - level) as u32)
}

impl CellId {
    pub fn from_face(face: u8) -> Self {
        CellId(((face as u64) << POS_BITS) + lsb_for_level(0))
    }

    /// The leaf cell containing `loc`.
    pub fn from_location(loc: &Location) -> Self {
        let (face, u, v) = xyz_to_face_uv(location_to_xyz(loc));
        Self::from_face_ij(face, st_to_ij(uv_to_st(u)), st_to_ij(uv_to_st(v)))
    }

    fn from_face_ij(face: u8, i: u32, j: u32) -> Self {
        let lookup = &*LOOKUP;
        let mask = (1u32 << LOOKUP_BITS) - 1;
        let mut n = (face as u64) << (POS_BITS - 1);
        let mut bits = face as usize & SWAP_MASK;
        for k in (0..8u32).rev() {
            bits += (((i >> (k * LOOKUP_BITS)) & mask) as usize) << (LOOKUP_BITS + 2);
            bits += (((j >> (k * LOOKUP_BITS)) & mask) as usize) << 2;
            bits = lookup.pos[bits];
            n |= ((bits >> 2) as u64) << (k * 2 * LOOKUP_BITS);
            bits &= SWAP_MASK | INVERT_MASK;
        }
        CellId(n * 2 + 1)
    }

    /// Face and (i, j) leaf coordinates of a position inside the cell.
    fn face_ij(&self) -> (u8, u32, u32) {
        let lookup = &*LOOKUP;
        let face = self.face();
        let mut bits = face as usize & SWAP_MASK;
        let (mut i, mut j) = (0u32, 0u32);
        let mut nbits = MAX_LEVEL as u32 - 7 * LOOKUP_BITS;
        for k in (0..8u32).rev() {
            let chunk = (self.0 >> (k * 2 * LOOKUP_BITS + 1)) & ((1u64 << (2 * nbits)) - 1);
            bits += (chunk as usize) << 2;
            bits = lookup.ij[bits];
            i += ((bits >> (LOOKUP_BITS + 2)) as u32) << (k * LOOKUP_BITS);
            j += (((bits >> 2) & ((1 << LOOKUP_BITS) - 1)) as u32) << (k * LOOKUP_BITS);
            bits &= SWAP_MASK | INVERT_MASK;
            nbits = LOOKUP_BITS;
        }
        (face, i, j)
    }

    pub fn face(&self) -> u8 {
        (self.0 >> POS_BITS) as u8
    }

    fn lsb(&self) -> u64 {
        self.0 & self.0.wrapping_neg()
    }

    pub fn level(&self) -> u8 {
        MAX_LEVEL.saturating_sub((self.0.trailing_zeros() / 2) as u8)
    }

    pub fn is_valid(&self) -> bool {
        self.face() < 6 && (self.lsb() & 0x1555_5555_5555_5555) != 0
    }

    pub fn parent(&self, level: u8) -> Self {
        let lsb = lsb_for_level(level);
        CellId((self.0 & lsb.wrapping_neg()) | lsb)
    }

    /// The four children in Hilbert curve order.
    pub fn children(&self) -> [CellId; 4] {
        let lsb = self.lsb();
        let step = lsb >> 1;
        let first = self.0 - lsb + (lsb >> 2);
        [
            CellId(first),
            CellId(first + step),
            CellId(first + 2 * step),
            CellId(first + 3 * step),
        ]
    }

    pub fn contains(&self, other: &CellId) -> bool {
        let reach = self.lsb() - 1;
        other.0 >= self.0 - reach && other.0 <= self.0 + reach
    }

    pub fn to_token(&self) -> String {
        if self.0 == 0 {
            return "X".to_string();
        }
        let hex = format!("{:016x}", self.0);
        hex.trim_end_matches('0').to_string()
    }

    pub fn from_token(token: &str) -> Result<Self, CellError> {
        let invalid = || CellError::Token(token.to_string());
        if token.is_empty() || token.len() > 16 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let padded = format!("{:0<16}", token);
        let id = u64::from_str_radix(&padded, 16).map_err(|_| invalid())?;
        let cell = CellId(id);
        if !cell.is_valid() {
            return Err(invalid());
        }
        Ok(cell)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

impl FromStr for CellId {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellId::from_token(s)
    }
}

/// A latitude/longitude rectangle in degrees. The longitude interval wraps
/// across the antimeridian when `lng_lo > lng_hi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLngRect {
    pub lat_lo: f64,
    pub lat_hi: f64,
    pub lng_lo: f64,
    pub lng_hi: f64,
}

impl LatLngRect {
    pub fn new(lat_lo: f64, lat_hi: f64, lng_lo: f64, lng_hi: f64) -> Self {
        Self {
            lat_lo,
            lat_hi,
            lng_lo,
            lng_hi,
        }
    }

    pub fn is_full_lng(&self) -> bool {
        self.lng_lo <= -180.0 && self.lng_hi >= 180.0
    }

    pub fn wraps(&self) -> bool {
        self.lng_lo > self.lng_hi
    }

    pub fn contains(&self, loc: &Location) -> bool {
        if loc.lat < self.lat_lo || loc.lat > self.lat_hi {
            return false;
        }
        if self.wraps() {
            loc.lng >= self.lng_lo || loc.lng <= self.lng_hi
        } else {
            loc.lng >= self.lng_lo && loc.lng <= self.lng_hi
        }
    }

    pub fn intersects(&self, other: &LatLngRect) -> bool {
        if self.lat_lo > other.lat_hi || other.lat_lo > self.lat_hi {
            return false;
        }
        match (self.wraps(), other.wraps()) {
            (false, false) => self.lng_lo <= other.lng_hi && other.lng_lo <= self.lng_hi,
            (true, true) => true,
            (false, true) => self.lng_hi >= other.lng_lo || self.lng_lo <= other.lng_hi,
            (true, false) => other.lng_hi >= self.lng_lo || other.lng_lo <= self.lng_hi,
        }
    }
}

/// Geometry of one cell: its face and the (u, v) square it spans.
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    face: u8,
    level: u8,
    u: [f64; 2],
    v: [f64; 2],
}

impl From<CellId> for Cell {
    fn from(id: CellId) -> Self {
        let (face, i, j) = id.face_ij();
        let level = id.level();
        let size = 1u32 << (MAX_LEVEL - level);
        let i0 = i & !(size - 1);
        let j0 = j & !(size - 1);
        Cell {
            face,
            level,
            u: [st_to_uv(ij_to_st(i0)), st_to_uv(ij_to_st(i0 + size))],
            v: [st_to_uv(ij_to_st(j0)), st_to_uv(ij_to_st(j0 + size))],
        }
    }
}

impl Cell {
    fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.u[0], self.v[0]),
            (self.u[1], self.v[0]),
            (self.u[1], self.v[1]),
            (self.u[0], self.v[1]),
        ]
    }

    /// Corner positions in counter-clockwise order, `x` = lng and `y` = lat.
    pub fn vertices(&self) -> [Coord<f64>; 4] {
        self.corners()
            .map(|(u, v)| xyz_to_coord(face_uv_to_xyz(self.face, u, v)))
    }

    /// Conservative lat/lng bound. Below level 0 the extremes of a cell are
    /// attained at its vertices.
    pub fn bound(&self) -> LatLngRect {
        if self.level == 0 {
            return LatLngRect::new(-90.0, 90.0, -180.0, 180.0);
        }
        let vertices = self.vertices();
        let lat_lo = vertices.iter().map(|c| c.y).fold(f64::INFINITY, f64::min);
        let lat_hi = vertices.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max);
        let lat_lo = (lat_lo - BOUND_EPSILON).max(-90.0);
        let lat_hi = (lat_hi + BOUND_EPSILON).min(90.0);

        // a pole is always a vertex, never interior, so touching it means
        // every longitude is inside the bound
        if lat_hi >= 90.0 - 1e-7 || lat_lo <= -90.0 + 1e-7 {
            return LatLngRect::new(lat_lo, lat_hi, -180.0, 180.0);
        }

        let lng_lo = vertices.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
        let lng_hi = vertices.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
        if lng_hi - lng_lo <= 180.0 {
            return LatLngRect::new(lat_lo, lat_hi, lng_lo - BOUND_EPSILON, lng_hi + BOUND_EPSILON);
        }

        // crosses the antimeridian
        let east = vertices
            .iter()
            .map(|c| c.x)
            .filter(|x| *x >= 0.0)
            .fold(f64::INFINITY, f64::min);
        let west = vertices
            .iter()
            .map(|c| c.x)
            .filter(|x| *x < 0.0)
            .fold(f64::NEG_INFINITY, f64::max);
        LatLngRect::new(lat_lo, lat_hi, east - BOUND_EPSILON, west + BOUND_EPSILON)
    }

    /// Lon/lat polygon of the cell with every edge split into `segments`
    /// pieces along the geodesic. `None` when the cell touches a pole or
    /// crosses the antimeridian.
    pub fn polygon(&self, segments: usize) -> Option<Polygon<f64>> {
        let bound = self.bound();
        if bound.is_full_lng() || bound.wraps() {
            return None;
        }
        let segments = segments.max(1);
        let corners = self.corners();
        let mut coords = Vec::with_capacity(4 * segments + 1);
        for k in 0..4 {
            let (u0, v0) = corners[k];
            let (u1, v1) = corners[(k + 1) % 4];
            for s in 0..segments {
                let t = s as f64 / segments as f64;
                let xyz = face_uv_to_xyz(self.face, u0 + (u1 - u0) * t, v0 + (v1 - v0) * t);
                coords.push(xyz_to_coord(xyz));
            }
        }
        coords.push(coords[0]);
        Some(Polygon::new(LineString::from(coords), vec![]))
    }
}

fn ij_to_st(i: u32) -> f64 {
    i as f64 / MAX_SIZE as f64
}

fn st_to_ij(s: f64) -> u32 {
    let i = (MAX_SIZE as f64 * s).floor();
    i.max(0.0).min((MAX_SIZE - 1) as f64) as u32
}

fn st_to_uv(s: f64) -> f64 {
    if s >= 0.5 {
        (1.0 / 3.0) * (4.0 * s * s - 1.0)
    } else {
        (1.0 / 3.0) * (1.0 - 4.0 * (1.0 - s) * (1.0 - s))
    }
}

fn uv_to_st(u: f64) -> f64 {
    if u >= 0.0 {
        0.5 * (1.0 + 3.0 * u).sqrt()
    } else {
        1.0 - 0.5 * (1.0 - 3.0 * u).sqrt()
    }
}

fn location_to_xyz(loc: &Location) -> [f64; 3] {
    let (lat, lng) = (loc.lat.to_radians(), loc.lng.to_radians());
    [lat.cos() * lng.cos(), lat.cos() * lng.sin(), lat.sin()]
}

fn xyz_to_coord([x, y, z]: [f64; 3]) -> Coord<f64> {
    let lat = z.atan2((x * x + y * y).sqrt());
    let lng = y.atan2(x);
    Coord {
        x: lng.to_degrees(),
        y: lat.to_degrees(),
    }
}

fn xyz_to_face_uv(p: [f64; 3]) -> (u8, f64, f64) {
    let [x, y, z] = p;
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
    let axis = if ax > ay {
        if ax > az {
            0
        } else {
            2
        }
    } else if ay > az {
        1
    } else {
        2
    };
    let face = if p[axis] < 0.0 { axis + 3 } else { axis };
    let (u, v) = match face {
        0 => (y / x, z / x),
        1 => (-x / y, z / y),
        2 => (-x / z, -y / z),
        3 => (z / x, y / x),
        4 => (z / y, -x / y),
        _ => (-y / z, -x / z),
    };
    (face as u8, u, v)
}

fn face_uv_to_xyz(face: u8, u: f64, v: f64) -> [f64; 3] {
    match face {
        0 => [1.0, u, v],
        1 => [-u, 1.0, v],
        2 => [-u, -v, 1.0],
        3 => [-1.0, -v, -u],
        4 => [v, -1.0, -u],
        _ => [v, u, -1.0],
    }
}
