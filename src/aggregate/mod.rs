//! Ordered merge of per-cell results.

use crate::cell::CellId;
use crate::record::BuildingRecord;
use crate::region::CellRelation;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Fetching failed for good, retries included.
    Fetch,
    /// The shard was present but could not be decoded.
    Corrupt,
    /// The filtering task died.
    Internal,
    /// The run was cancelled while the shard was being filtered.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Corrupt => "corrupt",
            FailureKind::Internal => "internal",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellFailure {
    pub token: String,
    pub kind: FailureKind,
    pub message: String,
}

impl CellFailure {
    pub fn new(cell: CellId, kind: FailureKind, message: impl Into<String>) -> Self {
        CellFailure {
            token: cell.to_token(),
            kind,
            message: message.into(),
        }
    }
}

/// What one covering cell contributed.
#[derive(Debug)]
pub enum CellOutcome {
    /// Skipped before any fetch.
    Disjoint,
    /// No shard exists for the cell.
    Absent,
    Filtered {
        relation: CellRelation,
        records: Vec<BuildingRecord>,
        rows_read: u64,
    },
    Failed(CellFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub cells: usize,
    pub disjoint: usize,
    pub absent: usize,
    pub covered: usize,
    pub partial: usize,
    pub rows_read: u64,
    pub records: usize,
    pub duplicates_dropped: usize,
    pub failures: Vec<CellFailure>,
}

impl Summary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn failed_tokens(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.token.as_str()).collect()
    }
}

#[derive(Debug)]
pub enum Collection {
    Records {
        records: Vec<BuildingRecord>,
        summary: Summary,
    },
    /// Every cell was processed and none contributed a record.
    NoData(Summary),
    /// No record was collected and at least one cell failed, so the region
    /// may well hold buildings.
    Failed(Summary),
    Cancelled(Summary),
}

impl Collection {
    pub fn summary(&self) -> &Summary {
        match self {
            Collection::Records { summary, .. } => summary,
            Collection::NoData(summary) => summary,
            Collection::Failed(summary) => summary,
            Collection::Cancelled(summary) => summary,
        }
    }
}

/// Collects cell outcomes in covering order.
///
/// With `dedup` set, a record whose exact position was already emitted by an
/// earlier cell is dropped, so the first cell in covering order wins.
#[derive(Debug)]
pub struct Aggregator {
    dedup: bool,
    seen: HashSet<(u64, u64)>,
    records: Vec<BuildingRecord>,
    summary: Summary,
}

fn position_key(record: &BuildingRecord) -> (u64, u64) {
    // adding zero folds -0.0 into 0.0
    (
        (record.latitude + 0.0).to_bits(),
        (record.longitude + 0.0).to_bits(),
    )
}

impl Aggregator {
    pub fn new(dedup: bool) -> Self {
        Aggregator {
            dedup,
            seen: HashSet::new(),
            records: Vec::new(),
            summary: Summary::default(),
        }
    }

    pub fn push(&mut self, outcome: CellOutcome) {
        self.summary.cells += 1;
        match outcome {
            CellOutcome::Disjoint => self.summary.disjoint += 1,
            CellOutcome::Absent => self.summary.absent += 1,
            CellOutcome::Filtered {
                relation,
                records,
                rows_read,
            } => {
                match relation {
                    CellRelation::Covered => self.summary.covered += 1,
                    CellRelation::Partial => self.summary.partial += 1,
                    CellRelation::Disjoint => self.summary.disjoint += 1,
                }
                self.summary.rows_read += rows_read;
                self.extend(records);
            }
            CellOutcome::Failed(failure) => {
                warn!(
                    cell = %failure.token,
                    kind = %failure.kind,
                    message = %failure.message,
                    "cell failed"
                );
                self.summary.failures.push(failure);
            }
        }
    }

    fn extend(&mut self, records: Vec<BuildingRecord>) {
        if !self.dedup {
            self.records.extend(records);
            return;
        }
        for record in records {
            if self.seen.insert(position_key(&record)) {
                self.records.push(record);
            } else {
                self.summary.duplicates_dropped += 1;
            }
        }
    }

    pub fn finish(self) -> Collection {
        let Aggregator {
            records,
            mut summary,
            ..
        } = self;
        summary.records = records.len();
        match (records.is_empty(), summary.failures.is_empty()) {
            (false, _) => Collection::Records { records, summary },
            (true, true) => Collection::NoData(summary),
            (true, false) => Collection::Failed(summary),
        }
    }

    /// Ends collection early. Records gathered so far are dropped.
    pub fn cancel(self) -> Collection {
        Collection::Cancelled(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lng: f64, lat: f64, code: &str) -> BuildingRecord {
        BuildingRecord {
            latitude: lat,
            longitude: lng,
            area_in_meters: Some(10.0),
            confidence: 0.8,
            geometry: None,
            full_plus_code: Some(code.into()),
        }
    }

    fn filtered(relation: CellRelation, records: Vec<BuildingRecord>) -> CellOutcome {
        let rows_read = records.len() as u64;
        CellOutcome::Filtered {
            relation,
            records,
            rows_read,
        }
    }

    fn codes(collection: &Collection) -> Vec<String> {
        match collection {
            Collection::Records { records, .. } => records
                .iter()
                .filter_map(|r| r.full_plus_code.clone())
                .collect(),
            _ => vec![],
        }
    }

    #[test]
    fn keeps_cell_order() {
        let mut aggregator = Aggregator::new(true);
        aggregator.push(filtered(CellRelation::Partial, vec![record(1.0, 1.0, "a"), record(2.0, 2.0, "b")]));
        aggregator.push(CellOutcome::Absent);
        aggregator.push(filtered(CellRelation::Covered, vec![record(3.0, 3.0, "c")]));
        let collection = aggregator.finish();
        assert_eq!(codes(&collection), ["a", "b", "c"]);
        let summary = collection.summary();
        assert_eq!(
            (summary.cells, summary.absent, summary.partial, summary.covered),
            (3, 1, 1, 1)
        );
        assert_eq!(summary.records, 3);
        assert_eq!(summary.rows_read, 3);
    }

    #[test]
    fn first_cell_wins_duplicates() {
        let mut aggregator = Aggregator::new(true);
        aggregator.push(filtered(CellRelation::Partial, vec![record(1.0, 1.0, "first")]));
        aggregator.push(filtered(CellRelation::Partial, vec![record(1.0, 1.0, "second"), record(0.0, -0.0, "zero")]));
        aggregator.push(filtered(CellRelation::Partial, vec![record(-0.0, 0.0, "negative zero")]));
        let collection = aggregator.finish();
        assert_eq!(codes(&collection), ["first", "zero"]);
        assert_eq!(collection.summary().duplicates_dropped, 2);
    }

    #[test]
    fn dedup_can_be_disabled() {
        let mut aggregator = Aggregator::new(false);
        aggregator.push(filtered(CellRelation::Partial, vec![record(1.0, 1.0, "first")]));
        aggregator.push(filtered(CellRelation::Partial, vec![record(1.0, 1.0, "second")]));
        assert_eq!(codes(&aggregator.finish()), ["first", "second"]);
    }

    #[test]
    fn empty_results_are_no_data() {
        let mut aggregator = Aggregator::new(true);
        aggregator.push(CellOutcome::Absent);
        aggregator.push(CellOutcome::Disjoint);
        aggregator.push(filtered(CellRelation::Partial, vec![]));
        match aggregator.finish() {
            Collection::NoData(summary) => {
                assert_eq!(summary.cells, 3);
                assert_eq!(summary.disjoint, 1);
            }
            other => panic!("expected no data, got {:?}", other),
        }
    }

    #[test]
    fn failures_are_summarized() {
        let cell = CellId::from_token("0ec1").unwrap();
        let mut aggregator = Aggregator::new(true);
        aggregator.push(CellOutcome::Failed(CellFailure::new(cell, FailureKind::Fetch, "503")));
        aggregator.push(filtered(CellRelation::Covered, vec![record(1.0, 1.0, "a")]));
        let collection = aggregator.finish();
        assert_eq!(codes(&collection), ["a"]);
        assert_eq!(collection.summary().failed(), 1);
        assert_eq!(collection.summary().failed_tokens(), ["0ec1"]);
    }

    #[test]
    fn failures_without_records_are_not_empty_regions() {
        let cell = CellId::from_token("0ec1").unwrap();
        let mut aggregator = Aggregator::new(true);
        aggregator.push(CellOutcome::Absent);
        aggregator.push(CellOutcome::Failed(CellFailure::new(cell, FailureKind::Fetch, "timed out")));
        match aggregator.finish() {
            Collection::Failed(summary) => {
                assert_eq!(summary.absent, 1);
                assert_eq!(summary.failed_tokens(), ["0ec1"]);
            }
            other => panic!("expected a failed collection, got {:?}", other),
        }
    }

    #[test]
    fn cancelling_drops_records() {
        let mut aggregator = Aggregator::new(true);
        aggregator.push(filtered(CellRelation::Covered, vec![record(1.0, 1.0, "a")]));
        match aggregator.cancel() {
            Collection::Cancelled(summary) => assert_eq!(summary.cells, 1),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }
}
