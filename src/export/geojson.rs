use super::ExportError;
use crate::record::{BuildingRecord, DataType};
use ::geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use geo_types::{Geometry as GeoGeometry, Point};
use serde_json::{to_value, Value as JsonValue};
use tracing::debug;
use wkt::ToWkt;

impl BuildingRecord {
    /// Footprint geometry for polygon data, otherwise the building's point.
    /// A polygon record with a missing or unreadable footprint falls back to
    /// its point.
    pub fn to_feature(&self, data_type: DataType) -> Feature {
        let footprint = match data_type {
            DataType::Polygons => self.footprint(),
            DataType::Points => None,
        };
        let value = match footprint {
            Some(polygon) => Value::from(&polygon),
            None => Value::from(&Point::from(self.location())),
        };

        let mut properties = JsonObject::new();
        properties.insert("latitude".to_string(), JsonValue::from(self.latitude));
        properties.insert("longitude".to_string(), JsonValue::from(self.longitude));
        if let Ok(value) = to_value(self.area_in_meters) {
            properties.insert("area_in_meters".to_string(), value);
        }
        properties.insert("confidence".to_string(), JsonValue::from(self.confidence));
        if let Ok(value) = to_value(&self.full_plus_code) {
            properties.insert("full_plus_code".to_string(), value);
        }

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(value)),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

pub fn to_feature_collection(records: &[BuildingRecord], data_type: DataType) -> FeatureCollection {
    let features = records
        .iter()
        .map(|record| record.to_feature(data_type))
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_geojson(records: &[BuildingRecord], data_type: DataType) -> String {
    to_feature_collection(records, data_type).to_string()
}

fn number(properties: &JsonObject, key: &str) -> Option<f64> {
    properties.get(key).and_then(JsonValue::as_f64)
}

fn feature_to_record(feature: &Feature, index: usize) -> Result<BuildingRecord, ExportError> {
    let missing = |what: &str| ExportError::Feature {
        index,
        message: format!("missing {}", what),
    };
    let properties = feature.properties.as_ref().ok_or_else(|| missing("properties"))?;
    let geometry = feature.geometry.as_ref().ok_or_else(|| missing("geometry"))?;
    let geometry = GeoGeometry::<f64>::try_from(geometry.value.clone())?;

    let (longitude, latitude, footprint) = match geometry {
        GeoGeometry::Point(point) => (point.x(), point.y(), None),
        GeoGeometry::Polygon(polygon) => {
            let longitude = number(properties, "longitude").ok_or_else(|| missing("longitude"))?;
            let latitude = number(properties, "latitude").ok_or_else(|| missing("latitude"))?;
            (longitude, latitude, Some(polygon.wkt_string()))
        }
        _ => {
            return Err(ExportError::Feature {
                index,
                message: "geometry is neither a point nor a polygon".into(),
            })
        }
    };

    Ok(BuildingRecord {
        latitude,
        longitude,
        area_in_meters: number(properties, "area_in_meters"),
        confidence: number(properties, "confidence").ok_or_else(|| missing("confidence"))?,
        geometry: footprint,
        full_plus_code: properties
            .get("full_plus_code")
            .and_then(JsonValue::as_str)
            .map(String::from),
    })
}

/// Parses a feature collection written by [`write_geojson`] back into
/// records.
pub fn read_geojson(text: &str) -> Result<Vec<BuildingRecord>, ExportError> {
    let collection = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection,
        _ => {
            return Err(ExportError::Feature {
                index: 0,
                message: "expected a feature collection".into(),
            })
        }
    };
    let records = collection
        .features
        .iter()
        .enumerate()
        .map(|(index, feature)| feature_to_record(feature, index))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(records = records.len(), "read feature collection");
    Ok(records)
}
