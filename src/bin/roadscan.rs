use anyhow::{Context, Result};
use clap::Parser;
use roadscan::{Config, GeoPoint, RunRequest};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pothole detection and tracking for dashcam video", long_about = None)]
struct Args {
    /// Input video
    source: PathBuf,

    /// Annotated output video
    output: PathBuf,

    #[arg(long, requires_all = ["start_lon", "end_lat", "end_lon"], allow_negative_numbers = true)]
    start_lat: Option<f64>,

    #[arg(long, requires = "start_lat", allow_negative_numbers = true)]
    start_lon: Option<f64>,

    #[arg(long, requires = "start_lat", allow_negative_numbers = true)]
    end_lat: Option<f64>,

    #[arg(long, requires = "start_lat", allow_negative_numbers = true)]
    end_lon: Option<f64>,

    /// Detection confidence threshold
    #[arg(long, default_value_t = 0.25)]
    conf: f32,

    /// Stay on the CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,

    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roadscan=info,ort=warn")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    let mut request = RunRequest::new(&args.source, &args.output);
    request.confidence_threshold = args.conf;
    request.prefer_accelerated = !args.cpu;

    if let (Some(start_lat), Some(start_lon), Some(end_lat), Some(end_lon)) =
        (args.start_lat, args.start_lon, args.end_lat, args.end_lon)
    {
        request = request.with_route(
            GeoPoint::new(start_lat, start_lon),
            GeoPoint::new(end_lat, end_lon),
        );
    }

    let stats = roadscan::run(&request, &config)
        .with_context(|| format!("processing {}", args.source.display()))?;
    info!("Output written to {}", stats.output_path.display());

    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
