//! Region in, exported buildings out.
//!
//! Cells of the covering are processed by at most `concurrency` tasks at a
//! time. Results are handed to the aggregator in covering order whatever the
//! completion order, so two runs over the same store give the same output.

use crate::aggregate::{Aggregator, CellFailure, CellOutcome, Collection, FailureKind, Summary};
use crate::cell::{Cell, CellId};
use crate::covering::{cover_region, CoveringConfig};
use crate::error::Error;
use crate::export::{export, Artifact, OutputFormat};
use crate::filter::{filter_shard, FilterConfig, FilterError};
use crate::record::DataType;
use crate::region::{CellRelation, PreparedRegion, Region};
use crate::shard::{fetch_with_retry, RetryPolicy, ShardFetch, ShardKey, ShardStore};
use futures_util::{pin_mut, stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub covering: CoveringConfig,
    pub retry: RetryPolicy,
    pub filter: FilterConfig,
    pub concurrency: usize,
    pub dedup: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            covering: CoveringConfig::default(),
            retry: RetryPolicy::default(),
            filter: FilterConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            dedup: true,
        }
    }
}

#[derive(Debug)]
pub struct RetrieveRequest {
    pub region: Region,
    pub data_type: DataType,
    pub format: OutputFormat,
    /// File stem of the artifact.
    pub name: String,
}

#[derive(Debug)]
pub enum Retrieval {
    Exported { artifact: Artifact, summary: Summary },
    NoData(Summary),
    Failed(Summary),
    Cancelled(Summary),
}

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn ShardStore>,
    config: PipelineConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn ShardStore>, config: PipelineConfig) -> Self {
        Retriever { store, config }
    }

    /// Collects the buildings of `region`. Invalid regions fail before any
    /// fetch, failing cells are recorded in the summary.
    #[instrument(skip(self, region, cancel))]
    pub async fn collect(
        &self,
        region: Region,
        data_type: DataType,
        cancel: &CancellationToken,
    ) -> Result<Collection, Error> {
        let cells = cover_region(&region, &self.config.covering)?;
        info!(cells = cells.len(), "resolved covering");
        let region = Arc::new(PreparedRegion::new(region));

        let outcomes = stream::iter(cells)
            .map(|cell| {
                process_cell(
                    self.store.clone(),
                    region.clone(),
                    cell,
                    data_type,
                    self.config.retry.clone(),
                    self.config.filter.clone(),
                    cancel.clone(),
                )
            })
            .buffered(self.config.concurrency.max(1));
        pin_mut!(outcomes);

        let mut aggregator = Aggregator::new(self.config.dedup);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("retrieval cancelled");
                    return Ok(aggregator.cancel());
                }
                outcome = outcomes.next() => match outcome {
                    Some(outcome) => aggregator.push(outcome),
                    None => break,
                },
            }
        }
        let collection = aggregator.finish();
        let summary = collection.summary();
        info!(
            records = summary.records,
            failed = summary.failed(),
            duplicates = summary.duplicates_dropped,
            "collected region"
        );
        Ok(collection)
    }

    pub async fn retrieve(
        &self,
        request: RetrieveRequest,
        cancel: &CancellationToken,
    ) -> Result<Retrieval, Error> {
        let RetrieveRequest {
            region,
            data_type,
            format,
            name,
        } = request;
        match self.collect(region, data_type, cancel).await? {
            Collection::Records { records, summary } => {
                let artifact =
                    tokio::task::spawn_blocking(move || export(&records, data_type, format, &name))
                        .await??;
                Ok(Retrieval::Exported { artifact, summary })
            }
            Collection::NoData(summary) => Ok(Retrieval::NoData(summary)),
            Collection::Failed(summary) => Ok(Retrieval::Failed(summary)),
            Collection::Cancelled(summary) => Ok(Retrieval::Cancelled(summary)),
        }
    }
}

#[instrument(skip(store, region, retry, filter, cancel), fields(cell = %cell))]
async fn process_cell(
    store: Arc<dyn ShardStore>,
    region: Arc<PreparedRegion>,
    cell: CellId,
    data_type: DataType,
    retry: RetryPolicy,
    filter: FilterConfig,
    cancel: CancellationToken,
) -> CellOutcome {
    let relation = region.relate_cell(&Cell::from(cell));
    if relation == CellRelation::Disjoint {
        return CellOutcome::Disjoint;
    }

    let key = ShardKey::new(data_type, cell);
    let bytes = match fetch_with_retry(store.as_ref(), &key, &retry).await {
        Ok(ShardFetch::Found(bytes)) => bytes,
        Ok(ShardFetch::Absent) => return CellOutcome::Absent,
        Err(e) => return CellOutcome::Failed(CellFailure::new(cell, FailureKind::Fetch, e.to_string())),
    };

    let filtered = tokio::task::spawn_blocking(move || {
        filter_shard(&bytes[..], relation, &region, data_type, &filter, &cancel)
    })
    .await;
    match filtered {
        Ok(Ok(rows)) => {
            debug!(?relation, rows = rows.rows_read, kept = rows.records.len(), "filtered cell");
            CellOutcome::Filtered {
                relation,
                records: rows.records,
                rows_read: rows.rows_read,
            }
        }
        Ok(Err(e @ FilterError::Cancelled(_))) => {
            CellOutcome::Failed(CellFailure::new(cell, FailureKind::Cancelled, e.to_string()))
        }
        Ok(Err(e)) => CellOutcome::Failed(CellFailure::new(cell, FailureKind::Corrupt, e.to_string())),
        Err(e) => CellOutcome::Failed(CellFailure::new(cell, FailureKind::Internal, e.to_string())),
    }
}
