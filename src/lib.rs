//! Building footprints of a region from the Open Buildings dataset.
//!
//! A region is covered by the dataset's S2 level-6 cells, the shard of each
//! cell is fetched and filtered to the region, and the merged result is
//! exported as GeoJSON or a zipped shapefile.

use tracing::{subscriber::set_global_default, Subscriber};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

pub mod aggregate;
pub mod boundary;
pub mod cell;
pub mod config;
pub mod covering;
pub mod error;
pub mod export;
pub mod filter;
pub mod location;
pub mod pipeline;
pub mod record;
pub mod region;
pub mod service;
pub mod shard;

pub use error::Error;
pub use export::{Artifact, OutputFormat};
pub use pipeline::{PipelineConfig, RetrieveRequest, Retrieval, Retriever};
pub use record::{BuildingRecord, DataType};
pub use region::Region;

/// Bunyan formatted JSON logs to `sink`, filtered by `RUST_LOG` or else by
/// `env_filter`.
pub fn get_subscriber<Sink>(env_filter: &str, sink: Sink) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    const PKG_NAME: &str = env!("CARGO_PKG_NAME");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = BunyanFormattingLayer::new(PKG_NAME.into(), sink);
    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

pub fn init_subscriber(
    subscriber: impl Subscriber + Send + Sync,
) -> Result<(), Box<dyn std::error::Error>> {
    LogTracer::init()?;
    set_global_default(subscriber)?;
    Ok(())
}
