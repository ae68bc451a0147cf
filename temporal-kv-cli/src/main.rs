//! Inspects a temporal key-value map's storage root from the command
//! line.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use temporal_kv::map::{Map, MapConfig};
use temporal_kv::store::fs::FsStore;
#[cfg(feature = "s3")]
use temporal_kv::store::s3::S3Store;
use temporal_kv::store::BlobStore;

#[derive(Clone, Debug, ValueEnum)]
enum Source {
    Disk,
    S3,
}

#[derive(Parser, Debug)]
#[command(about = "Inspect a temporal key-value map's storage root", long_about = None)]
struct Args {
    /// Which blob store backend to open.
    #[arg(long, value_enum, default_value_t = Source::Disk)]
    source: Source,

    /// Filesystem path (for --source disk) or bucket name (for --source s3).
    #[arg(long)]
    uri: String,

    /// AWS region, only used with --source s3.
    #[arg(long, default_value = "us-east-1")]
    region: String,
}

fn main() -> ExitCode {
    tracing_subscriber_init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn BlobStore> = match args.source {
        Source::Disk => Arc::new(FsStore::open(&args.uri)?),
        Source::S3 => open_s3(&args.uri, &args.region)?,
    };

    let map = Map::open(store, MapConfig::default())?;
    let (min, max) = map.get_min_max_time();
    println!("min: {min}");
    println!("max: {max}");
    Ok(())
}

#[cfg(feature = "s3")]
fn open_s3(bucket: &str, region: &str) -> Result<Arc<dyn BlobStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(S3Store::open(bucket, region)?))
}

#[cfg(not(feature = "s3"))]
fn open_s3(_bucket: &str, _region: &str) -> Result<Arc<dyn BlobStore>, Box<dyn std::error::Error>> {
    Err("this build was compiled without the 's3' feature".into())
}

fn tracing_subscriber_init() {
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish(),
    );
}
