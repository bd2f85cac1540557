use super::{Boundary, BoundaryError};
use geo_types::{Geometry, MultiPolygon};
use geojson::{Feature, GeoJson, JsonObject};
use tracing::{debug, warn};

const CODE_KEYS: [&str; 3] = ["ISO_A3", "ADM0_A3", "iso_a3"];
const NAME_KEYS: [&str; 4] = ["NAME", "ADMIN", "name", "NAME_EN"];
/// Natural Earth marks countries without an official code with -99.
const NO_CODE: &str = "-99";

fn property<'a>(properties: &'a JsonObject, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| properties.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|value| !value.is_empty() && *value != NO_CODE)
}

fn to_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon(vec![polygon])),
        Geometry::MultiPolygon(mp) => Some(mp),
        _ => None,
    }
}

fn to_boundary(feature: &Feature) -> Option<Boundary> {
    let properties = feature.properties.as_ref()?;
    let name = property(properties, &NAME_KEYS)?;
    let code = property(properties, &CODE_KEYS);
    let geometry = feature.geometry.as_ref()?;
    let geometry = Geometry::<f64>::try_from(geometry.value.clone()).ok()?;
    Boundary::new(to_multipolygon(geometry)?, code, name, 2)
}

/// Country boundaries of a GeoJSON feature collection with `ISO_A3` and
/// `NAME` properties. Features without a name or a polygonal geometry are
/// skipped.
pub fn read_countries(text: &str) -> Result<Vec<Boundary>, BoundaryError> {
    let collection = match text
        .parse::<GeoJson>()
        .map_err(|e| BoundaryError::Format(e.to_string()))?
    {
        GeoJson::FeatureCollection(collection) => collection,
        _ => return Err(BoundaryError::Format("expected a feature collection".into())),
    };
    let boundaries: Vec<Boundary> = collection.features.iter().filter_map(to_boundary).collect();
    let skipped = collection.features.len() - boundaries.len();
    if skipped > 0 {
        warn!(skipped, "skipped country features");
    }
    debug!(countries = boundaries.len(), "read countries");
    Ok(boundaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{BoundaryProvider, BoundarySet};

    const COUNTRIES: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {"ISO_A3": "AAA", "NAME": "Squareland"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type": "Feature", "properties": {"ISO_A3": "-99", "ADM0_A3": "BBB", "NAME": "Islands"},
         "geometry": {"type": "MultiPolygon", "coordinates": [
           [[[5,5],[6,5],[6,6],[5,5]]],
           [[[7,7],[8,7],[8,8],[7,7]]]
         ]}},
        {"type": "Feature", "properties": {"ISO_A3": "CCC"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
        {"type": "Feature", "properties": {"ISO_A3": "DDD", "NAME": "Line"},
         "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}}
      ]
    }"#;

    #[test]
    fn reads_country_features() {
        let boundaries = read_countries(COUNTRIES).unwrap();
        assert_eq!(boundaries.len(), 2);
        let set = BoundarySet::new("countries", boundaries);
        assert_eq!(set.labels(), ["AAA (Squareland)", "BBB (Islands)"]);
        let islands = set.lookup("BBB (Islands)").unwrap();
        assert_eq!(islands.region.geometry().0.len(), 2);
    }

    #[test]
    fn rejects_other_documents() {
        assert!(matches!(
            read_countries(r#"{"type":"Point","coordinates":[1,2]}"#),
            Err(BoundaryError::Format(_))
        ));
    }
}
