//! Fixed-level cell coverings of a region's bounding rectangle.

use crate::cell::{Cell, CellId, LatLngRect, MAX_LEVEL};
use crate::region::Region;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Level of the shard partitioning used by the building dataset.
pub const DATASET_LEVEL: u8 = 6;
pub const DEFAULT_MAX_CELLS: usize = 1_000_000;

#[derive(Debug, Error, PartialEq)]
pub enum CoverError {
    #[error("bounding rectangle of the region has zero area")]
    Degenerate,
    #[error("covering needs more than {0} cells")]
    TooManyCells(usize),
    #[error("cell level {0} is not in 0..=30")]
    InvalidLevel(u8),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoveringConfig {
    pub level: u8,
    pub max_cells: usize,
}

impl Default for CoveringConfig {
    fn default() -> Self {
        CoveringConfig {
            level: DATASET_LEVEL,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

/// Every cell at `config.level` whose bound meets `rect`, in cell id order.
pub fn cover_rect(rect: &LatLngRect, config: &CoveringConfig) -> Result<Vec<CellId>, CoverError> {
    if config.level > MAX_LEVEL {
        return Err(CoverError::InvalidLevel(config.level));
    }
    if rect.lat_hi <= rect.lat_lo || rect.lng_hi == rect.lng_lo {
        return Err(CoverError::Degenerate);
    }

    let mut cells = Vec::new();
    let mut stack: Vec<CellId> = (0..6).rev().map(CellId::from_face).collect();
    while let Some(id) = stack.pop() {
        if !Cell::from(id).bound().intersects(rect) {
            continue;
        }
        if id.level() == config.level {
            if cells.len() == config.max_cells {
                return Err(CoverError::TooManyCells(config.max_cells));
            }
            cells.push(id);
            continue;
        }
        // reversed so children come off the stack in curve order
        stack.extend(id.children().iter().rev());
    }
    cells.sort_unstable();
    debug!(cells = cells.len(), level = config.level, "covered rectangle");
    Ok(cells)
}

pub fn cover_region(region: &Region, config: &CoveringConfig) -> Result<Vec<CellId>, CoverError> {
    cover_rect(&region.lat_lng_rect(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    fn square(lng_lo: f64, lat_lo: f64, lng_hi: f64, lat_hi: f64) -> Region {
        Region::from_wkt(&format!(
            "POLYGON(({a} {b},{c} {b},{c} {d},{a} {d},{a} {b}))",
            a = lng_lo,
            b = lat_lo,
            c = lng_hi,
            d = lat_hi
        ))
        .unwrap()
    }

    fn assert_covers_samples(region: &Region, cells: &[CellId]) {
        let bounds = region.bounds();
        let steps = 25;
        for x in 0..=steps {
            for y in 0..=steps {
                let lng = bounds.min().x + bounds.width() * x as f64 / steps as f64;
                let lat = bounds.min().y + bounds.height() * y as f64 / steps as f64;
                let leaf = CellId::from_location(&Location::new(lng, lat).unwrap());
                let cell = leaf.parent(DATASET_LEVEL);
                assert!(cells.binary_search(&cell).is_ok(), "({}, {}) not covered", lng, lat);
            }
        }
    }

    #[test]
    fn unit_square_covering() {
        let region = square(0.0, 0.0, 1.0, 1.0);
        let cells = cover_region(&region, &CoveringConfig::default()).unwrap();
        assert!(!cells.is_empty());
        assert!(cells.iter().all(|c| c.level() == DATASET_LEVEL));
        assert_covers_samples(&region, &cells);
        let inside = CellId::from_location(&Location::new(0.5, 0.5).unwrap()).parent(DATASET_LEVEL);
        assert!(cells.contains(&inside));
        let tokens: Vec<String> = cells.iter().map(CellId::to_token).collect();
        assert_eq!(tokens, ["0555", "0fff", "1001", "1aab"]);
    }

    #[test]
    fn coverings_contain_bounding_rectangles() {
        let regions = [
            square(-10.0, -5.0, 12.0, 7.5),
            square(30.0, -2.0, 42.0, 5.0),
            square(-75.0, 40.0, -73.0, 41.5),
            square(100.0, 60.0, 140.0, 80.0),
            square(170.0, -20.0, 180.0, -10.0),
        ];
        for region in regions.iter() {
            let cells = cover_region(region, &CoveringConfig::default()).unwrap();
            assert_covers_samples(region, &cells);
        }
    }

    #[test]
    fn covering_is_sorted_and_unique() {
        let cells = cover_region(&square(-3.0, -3.0, 3.0, 3.0), &CoveringConfig::default()).unwrap();
        let mut sorted = cells.clone();
        sorted.dedup();
        assert_eq!(sorted, cells);
        assert!(cells.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn caps_cell_count() {
        let config = CoveringConfig {
            max_cells: 3,
            ..CoveringConfig::default()
        };
        assert_eq!(
            cover_region(&square(-20.0, -20.0, 20.0, 20.0), &config),
            Err(CoverError::TooManyCells(3))
        );
    }

    #[test]
    fn rejects_degenerate_rectangles() {
        let config = CoveringConfig::default();
        assert_eq!(
            cover_rect(&LatLngRect::new(1.0, 1.0, 0.0, 2.0), &config),
            Err(CoverError::Degenerate)
        );
        let bad_level = CoveringConfig {
            level: 31,
            ..config
        };
        assert_eq!(
            cover_rect(&LatLngRect::new(0.0, 1.0, 0.0, 1.0), &bad_level),
            Err(CoverError::InvalidLevel(31))
        );
    }
}
