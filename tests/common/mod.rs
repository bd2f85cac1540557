#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use open_buildings_extract::cell::CellId;
use open_buildings_extract::covering::DATASET_LEVEL;
use open_buildings_extract::location::Location;
use open_buildings_extract::shard::{
    DirShardStore, FetchError, RetryPolicy, ShardFetch, ShardKey, ShardStore,
};
use open_buildings_extract::{DataType, PipelineConfig, Region};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

pub fn gzip_rows(rows: &[String]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    for row in rows {
        writeln!(encoder, "{}", row).unwrap();
    }
    encoder.finish().unwrap()
}

/// A polygons row for a building at (lng, lat).
pub fn row(lng: f64, lat: f64, code: &str) -> String {
    format!(
        "{lat},{lng},25.5,0.85,\"POLYGON(({a} {b},{c} {b},{c} {d},{a} {d},{a} {b}))\",{code}",
        lat = lat,
        lng = lng,
        a = lng - 0.0001,
        b = lat - 0.0001,
        c = lng + 0.0001,
        d = lat + 0.0001,
        code = code
    )
}

pub fn cell_of(lng: f64, lat: f64) -> CellId {
    CellId::from_location(&Location::new(lng, lat).unwrap()).parent(DATASET_LEVEL)
}

pub fn region(wkt: &str) -> Region {
    Region::from_wkt(wkt).unwrap()
}

pub const UNIT_SQUARE: &str = "POLYGON((0 0,1 0,1 1,0 1,0 0))";

pub fn quick_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(10),
        },
        concurrency: 4,
        ..PipelineConfig::default()
    }
}

/// Shards kept in memory, with failure injection and a log of fetched cells.
#[derive(Default)]
pub struct MemoryStore {
    shards: HashMap<ShardKey, Bytes>,
    failing: HashSet<CellId>,
    delay: Option<Duration>,
    fetched: Mutex<Vec<CellId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_shard(mut self, cell: CellId, rows: &[String]) -> Self {
        let key = ShardKey::new(DataType::Polygons, cell);
        self.shards.insert(key, Bytes::from(gzip_rows(rows)));
        self
    }

    pub fn with_raw_shard(mut self, cell: CellId, bytes: &'static [u8]) -> Self {
        let key = ShardKey::new(DataType::Polygons, cell);
        self.shards.insert(key, Bytes::from_static(bytes));
        self
    }

    pub fn failing(mut self, cell: CellId) -> Self {
        self.failing.insert(cell);
        self
    }

    pub fn stalled(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetched(&self) -> Vec<CellId> {
        let mut fetched = self.fetched.lock().unwrap().clone();
        fetched.sort();
        fetched.dedup();
        fetched
    }
}

#[async_trait]
impl ShardStore for MemoryStore {
    async fn fetch(&self, key: &ShardKey) -> Result<ShardFetch, FetchError> {
        self.fetched.lock().unwrap().push(key.cell);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&key.cell) {
            return Err(FetchError::Transient("503 Service Unavailable".into()));
        }
        match self.shards.get(key) {
            Some(bytes) => Ok(ShardFetch::Found(bytes.clone())),
            None => Ok(ShardFetch::Absent),
        }
    }
}

/// A local shard mirror in a temporary directory.
pub struct ShardDir {
    pub dir: TempDir,
}

impl ShardDir {
    pub fn new() -> Self {
        ShardDir {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn put(&self, cell: CellId, rows: &[String]) {
        let store = DirShardStore::new(self.dir.path());
        let path = store.shard_path(&ShardKey::new(DataType::Polygons, cell));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, gzip_rows(rows)).unwrap();
    }

    pub fn store(&self) -> DirShardStore {
        DirShardStore::new(self.dir.path())
    }
}
