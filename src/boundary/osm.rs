use super::{Boundary, BoundaryError};
use osm_boundaries_utils::build_boundary;
use osmpbfreader::{OsmObj, OsmPbfReader, Relation};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Admin level of an administrative boundary relation, when it is one of
/// `admin_levels`.
fn admin_level(obj: &OsmObj, admin_levels: &[u8]) -> Option<u8> {
    obj.relation()?;
    let tags = obj.tags();
    if !tags.contains("boundary", "administrative") {
        return None;
    }
    let level = tags.get("admin_level")?.parse().ok()?;
    admin_levels.contains(&level).then(|| level)
}

fn iso_code(rel: &Relation) -> Option<&str> {
    rel.tags.get("ISO3166-1:alpha3").map(|code| code.as_str())
}

/// Administrative boundaries of the given levels in an OSM protobuf extract.
/// Country relations carry their ISO 3166-1 code.
pub fn get_osm_boundaries(path: &Path, admin_levels: &[u8]) -> Result<Vec<Boundary>, BoundaryError> {
    let mut pbf = OsmPbfReader::new(File::open(path)?);
    // the matching relations plus the ways and nodes their rings are made of
    let objects = pbf
        .get_objs_and_deps(|obj| admin_level(obj, admin_levels).is_some())
        .map_err(|e| BoundaryError::Format(e.to_string()))?;
    debug!(objects = objects.len(), "read osm extract");

    let boundaries: Vec<Boundary> = objects
        .values()
        .filter_map(|obj| Some((obj.relation()?, admin_level(obj, admin_levels)?)))
        .filter_map(|(rel, level)| {
            let name = rel.tags.get("name")?;
            let multi_polygon = build_boundary(rel, &objects)?;
            Boundary::new(multi_polygon, iso_code(rel), name, level)
        })
        .collect();
    info!(path = %path.display(), boundaries = boundaries.len(), "built osm boundaries");
    Ok(boundaries)
}
