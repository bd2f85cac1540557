//! Row-level filtering of one shard.
//!
//! Shards are decoded as a stream and handled in batches of at most
//! `batch_size` rows, so peak memory depends on the batch size and the
//! number of kept rows rather than on the size of the shard.

use crate::record::{BuildingRecord, DataType, RowError};
use crate::region::{CellRelation, PreparedRegion};
use csv::{ReaderBuilder, StringRecord};
use flate2::read::MultiGzDecoder;
use rayon::prelude::*;
use std::io::Read;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BATCH_SIZE: usize = 200_000;

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub batch_size: usize,
    /// Test the rows of a batch on the rayon pool.
    pub parallel: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("could not decode shard: {0}")]
    Decode(#[from] csv::Error),
    #[error("row {row}: {source}")]
    Row { row: u64, source: RowError },
    #[error("cancelled after {0} rows")]
    Cancelled(u64),
}

#[derive(Debug, Default)]
pub struct CellRows {
    pub records: Vec<BuildingRecord>,
    pub rows_read: u64,
}

/// Decodes a gzip compressed, header-less shard and keeps the rows that lie
/// in `region`. A `Covered` cell keeps every row without testing it.
///
/// `cancel` is checked before every batch, so a cancelled run stops after at
/// most one more batch of work.
pub fn filter_shard<R: Read>(
    compressed: R,
    relation: CellRelation,
    region: &PreparedRegion,
    data_type: DataType,
    config: &FilterConfig,
    cancel: &CancellationToken,
) -> Result<CellRows, FilterError> {
    let mut rows = CellRows::default();
    if relation == CellRelation::Disjoint {
        return Ok(rows);
    }
    if cancel.is_cancelled() {
        return Err(FilterError::Cancelled(0));
    }
    let batch_size = config.batch_size.max(1);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(MultiGzDecoder::new(compressed));

    let mut batch: Vec<StringRecord> = Vec::with_capacity(batch_size.min(DEFAULT_BATCH_SIZE));
    let mut record = StringRecord::new();
    loop {
        let more = reader.read_record(&mut record)?;
        if more {
            batch.push(record.clone());
            rows.rows_read += 1;
        }
        if batch.len() >= batch_size || (!more && !batch.is_empty()) {
            if cancel.is_cancelled() {
                return Err(FilterError::Cancelled(rows.rows_read));
            }
            let first_row = rows.rows_read - batch.len() as u64;
            let kept = filter_batch(&batch, first_row, relation, region, data_type, config.parallel)?;
            debug!(rows = batch.len(), kept = kept.len(), "filtered batch");
            rows.records.extend(kept);
            batch.clear();
        }
        if !more {
            break;
        }
    }
    Ok(rows)
}

fn filter_batch(
    batch: &[StringRecord],
    first_row: u64,
    relation: CellRelation,
    region: &PreparedRegion,
    data_type: DataType,
    parallel: bool,
) -> Result<Vec<BuildingRecord>, FilterError> {
    let keep = |(offset, row): (usize, &StringRecord)| -> Result<Option<BuildingRecord>, FilterError> {
        let record = BuildingRecord::from_row(row, data_type).map_err(|source| FilterError::Row {
            row: first_row + offset as u64 + 1,
            source,
        })?;
        if relation == CellRelation::Covered || region.covers(&record.location()) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    };
    let kept: Vec<Option<BuildingRecord>> = if parallel {
        batch.par_iter().enumerate().map(&keep).collect::<Result<_, _>>()?
    } else {
        batch.iter().enumerate().map(&keep).collect::<Result<_, _>>()?
    };
    Ok(kept.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(rows: &[&str]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        for row in rows {
            writeln!(encoder, "{}", row).unwrap();
        }
        encoder.finish().unwrap()
    }

    fn unit_square() -> PreparedRegion {
        PreparedRegion::new(Region::from_wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))").unwrap())
    }

    const ROWS: [&str; 4] = [
        "0.5,0.5,10.0,0.9,,A",
        "2.0,2.0,11.0,0.8,,B",
        "0.5,1.0,12.0,0.7,,C",
        "0.25,0.75,13.0,0.6,,D",
    ];

    fn run(relation: CellRelation, config: &FilterConfig) -> CellRows {
        filter_shard(
            &gzip(&ROWS)[..],
            relation,
            &unit_square(),
            DataType::Polygons,
            config,
            &CancellationToken::new(),
        )
        .unwrap()
    }

    /// Cancels its token once the first bytes have been read.
    struct CancelOnRead<R> {
        inner: R,
        cancel: CancellationToken,
    }

    impl<R: Read> Read for CancelOnRead<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.cancel.cancel();
            self.inner.read(buf)
        }
    }

    fn codes(rows: &CellRows) -> Vec<&str> {
        rows.records
            .iter()
            .map(|r| r.full_plus_code.as_deref().unwrap())
            .collect()
    }

    #[test]
    fn covered_cells_keep_every_row() {
        let rows = run(CellRelation::Covered, &FilterConfig::default());
        assert_eq!(rows.rows_read, 4);
        assert_eq!(codes(&rows), ["A", "B", "C", "D"]);
    }

    #[test]
    fn partial_cells_keep_rows_inside() {
        let rows = run(CellRelation::Partial, &FilterConfig::default());
        assert_eq!(rows.rows_read, 4);
        // C sits on the eastern edge of the square and is kept
        assert_eq!(codes(&rows), ["A", "C", "D"]);
    }

    #[test]
    fn batching_does_not_change_the_result() {
        let sequential = FilterConfig {
            batch_size: 1,
            parallel: false,
        };
        let parallel = FilterConfig {
            batch_size: 3,
            parallel: true,
        };
        let a = run(CellRelation::Partial, &sequential);
        let b = run(CellRelation::Partial, &parallel);
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn disjoint_cells_read_nothing() {
        let rows = run(CellRelation::Disjoint, &FilterConfig::default());
        assert_eq!(rows.rows_read, 0);
        assert!(rows.records.is_empty());
    }

    #[test]
    fn corrupt_shards_fail() {
        let result = filter_shard(
            &b"definitely not gzip"[..],
            CellRelation::Partial,
            &unit_square(),
            DataType::Polygons,
            &FilterConfig::default(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(FilterError::Decode(_))));

        let bad_row = gzip(&["0.5,0.5,1.0,0.9,,A", "oops,0.5,1.0,0.9,,B"]);
        let result = filter_shard(
            &bad_row[..],
            CellRelation::Covered,
            &unit_square(),
            DataType::Polygons,
            &FilterConfig::default(),
            &CancellationToken::new(),
        );
        match result {
            Err(FilterError::Row { row, .. }) => assert_eq!(row, 2),
            other => panic!("expected a row error, got {:?}", other),
        }
    }

    #[test]
    fn cancelled_filtering_stops_between_batches() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = filter_shard(
            &gzip(&ROWS)[..],
            CellRelation::Partial,
            &unit_square(),
            DataType::Polygons,
            &FilterConfig::default(),
            &cancel,
        );
        assert!(matches!(result, Err(FilterError::Cancelled(0))));

        let cancel = CancellationToken::new();
        let reader = CancelOnRead {
            inner: &gzip(&ROWS)[..],
            cancel: cancel.clone(),
        };
        let config = FilterConfig {
            batch_size: 1,
            parallel: false,
        };
        let result = filter_shard(
            reader,
            CellRelation::Covered,
            &unit_square(),
            DataType::Polygons,
            &config,
            &cancel,
        );
        assert!(matches!(result, Err(FilterError::Cancelled(1))));
    }
}
