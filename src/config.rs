//! Command line and environment options shared by the binaries.

use crate::boundary::{read_border_archive, read_countries, BorderSource, BoundaryError, BoundarySet};
use crate::covering::CoveringConfig;
use crate::filter::FilterConfig;
use crate::pipeline::PipelineConfig;
use crate::shard::{DirShardStore, FetchError, HttpShardStore, RetryPolicy, ShardStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tracing::info;

#[derive(Debug, StructOpt)]
pub struct PipelineOpts {
    /// dataset base url
    #[structopt(
        long = "shard-base-url",
        env = "SHARD_BASE_URL",
        default_value = "https://storage.googleapis.com/open-buildings-data/v3"
    )]
    pub shard_base_url: String,
    /// read shards from a local mirror instead
    #[structopt(long = "shard-dir", env = "SHARD_DIR")]
    pub shard_dir: Option<PathBuf>,
    /// parallel shard downloads
    #[structopt(short, long, env = "CONCURRENCY", default_value = "8")]
    pub concurrency: usize,
    /// attempts per shard
    #[structopt(long, env = "RETRIES", default_value = "3")]
    pub retries: u32,
    /// per attempt timeout in seconds
    #[structopt(long = "shard-timeout", env = "SHARD_TIMEOUT_SECS", default_value = "60")]
    pub shard_timeout_secs: u64,
    /// rows per filter batch
    #[structopt(long = "batch-size", env = "BATCH_SIZE", default_value = "200000")]
    pub batch_size: usize,
    /// keep buildings reported by more than one cell
    #[structopt(long = "keep-duplicates")]
    pub keep_duplicates: bool,
}

impl PipelineOpts {
    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            covering: CoveringConfig::default(),
            retry: RetryPolicy {
                max_attempts: self.retries.max(1),
                timeout: Duration::from_secs(self.shard_timeout_secs.max(1)),
                ..defaults.retry
            },
            filter: FilterConfig {
                batch_size: self.batch_size.max(1),
                ..defaults.filter
            },
            concurrency: self.concurrency.max(1),
            dedup: !self.keep_duplicates,
        }
    }

    pub fn shard_store(&self) -> Result<Arc<dyn ShardStore>, FetchError> {
        match &self.shard_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "reading shards from directory");
                Ok(Arc::new(DirShardStore::new(dir)))
            }
            None => {
                info!(url = %self.shard_base_url, "reading shards over http");
                Ok(Arc::new(HttpShardStore::new(&self.shard_base_url)?))
            }
        }
    }
}

#[derive(Debug, StructOpt)]
pub struct BoundaryOpts {
    /// countries GeoJSON with ISO_A3 and NAME properties
    #[structopt(long, env = "COUNTRIES")]
    pub countries: Option<PathBuf>,
    /// zipped admin-0 shapefile
    #[structopt(long = "border-archive", env = "BORDER_ARCHIVE")]
    pub border_archive: Option<PathBuf>,
    /// boundary index written by build-boundaries
    #[structopt(long = "boundary-index", env = "BOUNDARY_INDEX")]
    pub boundary_index: Option<PathBuf>,
    /// name of the border source, used in output file names
    #[structopt(long = "border-source", env = "BORDER_SOURCE", default_value = "ne_110m")]
    pub border_source: BorderSource,
}

impl BoundaryOpts {
    /// Loads the first configured boundary source. `None` if there is none,
    /// leaving custom polygons as the only way to pick a region.
    pub fn load(&self) -> Result<Option<BoundarySet>, BoundaryError> {
        if let Some(path) = &self.boundary_index {
            return BoundarySet::load(path).map(Some);
        }
        if let Some(path) = &self.border_archive {
            let boundaries = read_border_archive(path)?;
            return Ok(Some(BoundarySet::new(self.border_source.source_name(), boundaries)));
        }
        if let Some(path) = &self.countries {
            let boundaries = read_countries(&std::fs::read_to_string(path)?)?;
            return Ok(Some(BoundarySet::new(self.border_source.source_name(), boundaries)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_defaults() {
        let opts = PipelineOpts::from_iter(&["extract"]);
        let config = opts.pipeline_config();
        let defaults = PipelineConfig::default();
        assert_eq!(config.concurrency, defaults.concurrency);
        assert_eq!(config.retry.max_attempts, defaults.retry.max_attempts);
        assert_eq!(config.retry.timeout, defaults.retry.timeout);
        assert_eq!(config.filter.batch_size, defaults.filter.batch_size);
        assert_eq!(config.covering.level, 6);
        assert!(config.dedup);
    }

    #[test]
    fn options_override_defaults() {
        let opts = PipelineOpts::from_iter(&[
            "extract",
            "--concurrency",
            "2",
            "--retries",
            "5",
            "--shard-timeout",
            "10",
            "--keep-duplicates",
        ]);
        let config = opts.pipeline_config();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.timeout, Duration::from_secs(10));
        assert!(!config.dedup);
    }

    #[test]
    fn no_boundary_source_is_fine() {
        let opts = BoundaryOpts::from_iter(&["extract"]);
        assert!(opts.load().unwrap().is_none());
    }
}
