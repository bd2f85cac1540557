use super::ExportError;
use crate::record::{BuildingRecord, DataType};
use ::shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use ::shapefile::{Point, Polygon, PolygonRing, Writer};
use geo::Winding;
use geo_types::LineString;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Extensions of the files packed into a shapefile archive.
pub const SHAPEFILE_PARTS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

fn field(name: &str) -> Result<FieldName, ExportError> {
    FieldName::try_from(name).map_err(|e| ExportError::Shapefile(format!("{:?}", e)))
}

fn table_builder() -> Result<TableWriterBuilder, ExportError> {
    Ok(TableWriterBuilder::new()
        .add_numeric_field(field("latitude")?, 24, 15)
        .add_numeric_field(field("longitude")?, 24, 15)
        .add_numeric_field(field("area_in_me")?, 24, 4)
        .add_numeric_field(field("confidence")?, 8, 4)
        .add_character_field(field("plus_code")?, 32))
}

fn attributes(record: &BuildingRecord) -> Record {
    let mut attributes = Record::default();
    attributes.insert("latitude".into(), FieldValue::Numeric(Some(record.latitude)));
    attributes.insert("longitude".into(), FieldValue::Numeric(Some(record.longitude)));
    attributes.insert("area_in_me".into(), FieldValue::Numeric(record.area_in_meters));
    attributes.insert("confidence".into(), FieldValue::Numeric(Some(record.confidence)));
    attributes.insert(
        "plus_code".into(),
        FieldValue::Character(record.full_plus_code.clone()),
    );
    attributes
}

fn ring_points(ring: &LineString<f64>) -> Vec<Point> {
    ring.coords().map(|c| Point { x: c.x, y: c.y }).collect()
}

/// Shapefile rings are clockwise for exteriors and counter-clockwise for
/// holes.
fn to_shape(polygon: &geo_types::Polygon<f64>) -> Polygon {
    let mut exterior = polygon.exterior().clone();
    if exterior.is_ccw() {
        exterior.0.reverse();
    }
    let mut rings = vec![PolygonRing::Outer(ring_points(&exterior))];
    for hole in polygon.interiors() {
        let mut hole = hole.clone();
        if hole.is_cw() {
            hole.0.reverse();
        }
        rings.push(PolygonRing::Inner(ring_points(&hole)));
    }
    Polygon::with_rings(rings)
}

fn shapefile_error(e: ::shapefile::Error) -> ExportError {
    ExportError::Shapefile(e.to_string())
}

fn write_layer(path: &Path, records: &[BuildingRecord], data_type: DataType) -> Result<(), ExportError> {
    let mut writer = Writer::from_path(path, table_builder()?).map_err(shapefile_error)?;
    match data_type {
        DataType::Points => {
            for record in records {
                let point = Point {
                    x: record.longitude,
                    y: record.latitude,
                };
                writer
                    .write_shape_and_record(&point, &attributes(record))
                    .map_err(shapefile_error)?;
            }
        }
        DataType::Polygons => {
            let mut skipped = 0usize;
            for record in records {
                let footprint = match record.footprint() {
                    Some(footprint) => footprint,
                    None => {
                        skipped += 1;
                        continue;
                    }
                };
                writer
                    .write_shape_and_record(&to_shape(&footprint), &attributes(record))
                    .map_err(shapefile_error)?;
            }
            if skipped > 0 {
                warn!(skipped, "records without a readable footprint left out of the shapefile");
            }
        }
    }
    Ok(())
}

/// Writes the layer into a temporary directory and packs its parts into one
/// zip archive named after `stem`.
pub fn write_shapefile_zip(
    records: &[BuildingRecord],
    data_type: DataType,
    stem: &str,
) -> Result<Vec<u8>, ExportError> {
    let dir = tempfile::tempdir()?;
    let shp_path = dir.path().join(format!("{}.shp", stem));
    write_layer(&shp_path, records, data_type)?;
    fs::write(shp_path.with_extension("prj"), WGS84_PRJ)?;
    fs::write(shp_path.with_extension("cpg"), "UTF-8")?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for extension in SHAPEFILE_PARTS.iter() {
        let part = shp_path.with_extension(extension);
        zip.start_file(format!("{}.{}", stem, extension), options)?;
        zip.write_all(&fs::read(&part)?)?;
    }
    let bytes = zip.finish()?.into_inner();
    debug!(records = records.len(), bytes = bytes.len(), "packed shapefile");
    Ok(bytes)
}
