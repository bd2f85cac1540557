use open_buildings_extract::config::{BoundaryOpts, PipelineOpts};
use open_buildings_extract::service::{run_service, ServiceConfig};
use open_buildings_extract::{get_subscriber, init_subscriber, Retriever};
use std::net::TcpListener;
use structopt::StructOpt;
use tracing::info;

#[derive(Debug, StructOpt)]
#[structopt(name = "buildings-service", about = "serve building extracts over http")]
pub struct Opt {
    /// http port
    #[structopt(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,
    /// listen address
    #[structopt(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[structopt(flatten)]
    pub pipeline: PipelineOpts,
    #[structopt(flatten)]
    pub boundaries: BoundaryOpts,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();
    init_subscriber(get_subscriber("info,actix_web=error", std::io::stdout))?;

    let boundaries = opt.boundaries.load()?;
    if let Some(boundaries) = &boundaries {
        info!(boundaries = boundaries.len(), "boundaries loaded");
    }
    let retriever = Retriever::new(opt.pipeline.shard_store()?, opt.pipeline.pipeline_config());
    let listener = TcpListener::bind((opt.host.as_str(), opt.port))?;
    let config = ServiceConfig {
        retriever,
        boundaries,
        listener,
    };
    run_service(config)?.await?;
    Ok(())
}
