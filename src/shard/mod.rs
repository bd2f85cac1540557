//! Shard lookup and download.
//!
//! A shard is the gzip compressed, header-less CSV holding the buildings of
//! one level-6 cell. Most cells of the globe have no shard, so absence is an
//! ordinary answer and not an error.

use crate::cell::CellId;
use crate::record::DataType;
use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec, Opts};
use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com/open-buildings-data/v3";

lazy_static! {
    static ref SHARD_FETCH_COLLECTOR: IntCounterVec = register_int_counter_vec!(
        Opts::new("shard_fetches_total", "Shard fetch attempts by outcome"),
        &["outcome"],
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardKey {
    pub data_type: DataType,
    pub cell: CellId,
}

impl ShardKey {
    pub fn new(data_type: DataType, cell: CellId) -> Self {
        ShardKey { data_type, cell }
    }

    /// Object path relative to the dataset root.
    pub fn path(&self) -> String {
        format!(
            "{}_s2_level_{}_gzip_no_header/{}_buildings.csv.gz",
            self.data_type,
            self.cell.level(),
            self.cell.to_token()
        )
    }
}

#[derive(Debug)]
pub enum ShardFetch {
    Absent,
    Found(Bytes),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Worth another attempt: connection problems, timeouts, throttling.
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

#[async_trait]
pub trait ShardStore: Send + Sync {
    async fn fetch(&self, key: &ShardKey) -> Result<ShardFetch, FetchError>;
}

/// Shards served over HTTP, by default from the public dataset bucket.
pub struct HttpShardStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpShardStore {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Fatal(e.to_string()))?;
        Ok(HttpShardStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, key: &ShardKey) -> String {
        format!("{}/{}", self.base_url, key.path())
    }
}

fn classify_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        FetchError::Transient(e.to_string())
    } else {
        FetchError::Fatal(e.to_string())
    }
}

fn classify_status(status: StatusCode, url: &str) -> FetchError {
    let message = format!("GET {} returned {}", url, status);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        FetchError::Transient(message)
    } else {
        FetchError::Fatal(message)
    }
}

#[async_trait]
impl ShardStore for HttpShardStore {
    async fn fetch(&self, key: &ShardKey) -> Result<ShardFetch, FetchError> {
        let url = self.url(key);
        let response = self.client.get(&url).send().await.map_err(classify_reqwest)?;
        let status = response.status();
        // anonymous readers of a bucket without list access get 403 for
        // objects that do not exist
        if status == StatusCode::NOT_FOUND
            || status == StatusCode::GONE
            || status == StatusCode::FORBIDDEN
        {
            debug!(%url, %status, "shard absent");
            return Ok(ShardFetch::Absent);
        }
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }
        let body = response.bytes().await.map_err(classify_reqwest)?;
        Ok(ShardFetch::Found(body))
    }
}

/// Shards laid out under a local directory with the same relative paths as
/// the remote dataset.
pub struct DirShardStore {
    root: PathBuf,
}

impl DirShardStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirShardStore { root: root.into() }
    }

    pub fn shard_path(&self, key: &ShardKey) -> PathBuf {
        self.root.join(key.path())
    }
}

#[async_trait]
impl ShardStore for DirShardStore {
    async fn fetch(&self, key: &ShardKey) -> Result<ShardFetch, FetchError> {
        let path = self.shard_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(ShardFetch::Found(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ShardFetch::Absent),
            Err(e) => Err(FetchError::Transient(format!("{}: {}", path.display(), e))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for one attempt, body download included.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn track_fetch(outcome: &str) {
    SHARD_FETCH_COLLECTOR.with_label_values(&[outcome]).inc();
}

#[instrument(skip(store, policy), fields(cell = %key.cell))]
pub async fn fetch_with_retry(
    store: &dyn ShardStore,
    key: &ShardKey,
    policy: &RetryPolicy,
) -> Result<ShardFetch, FetchError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout, store.fetch(key)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "timed out after {:?}",
                policy.timeout
            ))),
        };
        match result {
            Ok(fetch) => {
                track_fetch(match &fetch {
                    ShardFetch::Absent => "absent",
                    ShardFetch::Found(_) => "found",
                });
                return Ok(fetch);
            }
            Err(FetchError::Transient(message)) if attempt < attempts => {
                track_fetch("retry");
                let delay = policy.backoff(attempt - 1);
                warn!(attempt, ?delay, %message, "retrying shard fetch");
                tokio::time::sleep(delay).await;
            }
            Err(FetchError::Transient(message)) => {
                track_fetch("failed");
                return Err(FetchError::Transient(format!(
                    "{} (gave up after {} attempts)",
                    message, attempt
                )));
            }
            Err(fatal) => {
                track_fetch("failed");
                return Err(fatal);
            }
        }
    }
}
