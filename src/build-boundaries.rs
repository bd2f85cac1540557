use open_buildings_extract::boundary::{
    get_osm_boundaries, read_border_archive, read_countries, BoundarySet,
};
use open_buildings_extract::{get_subscriber, init_subscriber};
use std::error::Error;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::info;

#[derive(Debug, StructOpt)]
#[structopt(name = "build-boundaries", about = "build a boundary index")]
struct Opt {
    /// OSM protobuf input file
    #[structopt(short, long)]
    pbf: Option<PathBuf>,
    /// countries GeoJSON input file
    #[structopt(long)]
    countries: Option<PathBuf>,
    /// zipped admin-0 shapefile input file
    #[structopt(long = "border-archive")]
    border_archive: Option<PathBuf>,
    /// admin levels taken from the OSM file
    #[structopt(short, long = "admin-level", default_value = "2")]
    admin_levels: Vec<u8>,
    /// source name stored in the index
    #[structopt(short, long, default_value = "osm")]
    source: String,
    /// index output file
    #[structopt(short, long)]
    bin: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();
    init_subscriber(get_subscriber("info", std::io::stderr))?;

    let boundaries = match (&opt.pbf, &opt.countries, &opt.border_archive) {
        (Some(pbf), _, _) => get_osm_boundaries(pbf, &opt.admin_levels)?,
        (None, Some(countries), _) => read_countries(&std::fs::read_to_string(countries)?)?,
        (None, None, Some(archive)) => read_border_archive(archive)?,
        (None, None, None) => return Err("pass --pbf, --countries or --border-archive".into()),
    };
    let set = BoundarySet::new(opt.source.as_str(), boundaries);
    set.save(&opt.bin)?;
    info!(boundaries = set.len(), path = %opt.bin.display(), "wrote boundary index");
    Ok(())
}
