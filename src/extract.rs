use open_buildings_extract::boundary::{
    download_border_source, read_border_archive, BoundaryProvider, BoundarySet,
};
use open_buildings_extract::config::{BoundaryOpts, PipelineOpts};
use open_buildings_extract::export::{region_file_stem, wkt_file_stem};
use open_buildings_extract::location::Location;
use open_buildings_extract::{
    get_subscriber, init_subscriber, DataType, OutputFormat, Region, RetrieveRequest, Retrieval,
    Retriever,
};
use std::error::Error;
use std::path::PathBuf;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, StructOpt)]
#[structopt(name = "extract", about = "extract the buildings of one region")]
struct Opt {
    /// boundary code or name, e.g. KEN or "KEN (Kenya)"
    #[structopt(short, long)]
    region: Option<String>,
    /// the boundary containing this lng,lat location
    #[structopt(long)]
    at: Option<Location>,
    /// POLYGON or MULTIPOLYGON wkt, wins over --region
    #[structopt(long)]
    wkt: Option<String>,
    /// file holding the wkt polygon
    #[structopt(long = "wkt-file")]
    wkt_file: Option<PathBuf>,
    /// polygons or points
    #[structopt(short = "t", long = "data-type", default_value = "polygons")]
    data_type: DataType,
    /// geojson or shapefile
    #[structopt(short, long, default_value = "geojson")]
    format: OutputFormat,
    /// output directory
    #[structopt(short, long, default_value = ".")]
    output: PathBuf,
    /// download the border archive into this directory when none is given
    #[structopt(long = "download-borders")]
    download_borders: Option<PathBuf>,
    #[structopt(flatten)]
    pipeline: PipelineOpts,
    #[structopt(flatten)]
    boundaries: BoundaryOpts,
}

async fn load_boundaries(opt: &Opt) -> Result<Option<BoundarySet>, Box<dyn Error>> {
    if let Some(set) = opt.boundaries.load()? {
        return Ok(Some(set));
    }
    match &opt.download_borders {
        Some(dir) => {
            let source = opt.boundaries.border_source;
            let archive = download_border_source(source, dir).await?;
            let boundaries = read_border_archive(&archive)?;
            Ok(Some(BoundarySet::new(source.source_name(), boundaries)))
        }
        None => Ok(None),
    }
}

async fn resolve_region(opt: &Opt) -> Result<(Region, String), Box<dyn Error>> {
    let wkt = match (&opt.wkt, &opt.wkt_file) {
        (Some(wkt), _) => Some(wkt.clone()),
        (None, Some(path)) => Some(std::fs::read_to_string(path)?),
        (None, None) => None,
    };
    if let Some(wkt) = wkt {
        return Ok((Region::from_wkt(&wkt)?, wkt_file_stem(opt.data_type)));
    }

    let boundaries = load_boundaries(opt)
        .await?
        .ok_or("a boundary source is needed to look up regions")?;
    let query = match (&opt.region, &opt.at) {
        (Some(region), _) => region.clone(),
        (None, Some(location)) => {
            let found = boundaries.locate(location);
            let boundary = found
                .iter()
                .min_by_key(|b| b.admin_level)
                .ok_or("no boundary contains the location")?;
            boundary.label()
        }
        (None, None) => return Err("pass --region, --at, --wkt or --wkt-file".into()),
    };
    let named = boundaries.lookup(&query)?;
    info!(code = %named.code, name = %named.name, "selected region");
    let stem = region_file_stem(opt.data_type, boundaries.source_name(), &named.code);
    Ok((named.region, stem))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();
    init_subscriber(get_subscriber("info", std::io::stderr))?;

    let (region, name) = resolve_region(&opt).await?;
    let retriever = Retriever::new(opt.pipeline.shard_store()?, opt.pipeline.pipeline_config());
    let request = RetrieveRequest {
        region,
        data_type: opt.data_type,
        format: opt.format,
        name,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match retriever.retrieve(request, &cancel).await? {
        Retrieval::Exported { artifact, summary } => {
            std::fs::create_dir_all(&opt.output)?;
            let path = opt.output.join(&artifact.filename);
            std::fs::write(&path, &artifact.bytes)?;
            println!("{}", path.display());
            println!("{}", serde_json::to_string(&summary)?);
            Ok(())
        }
        Retrieval::NoData(summary) => {
            println!("no buildings in region");
            println!("{}", serde_json::to_string(&summary)?);
            Ok(())
        }
        Retrieval::Failed(summary) => {
            println!("{}", serde_json::to_string(&summary)?);
            Err(format!("no buildings retrieved, {} cells failed", summary.failed()).into())
        }
        Retrieval::Cancelled(_) => Err("cancelled".into()),
    }
}
