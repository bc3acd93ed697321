use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ndvi_series::app::App;
use ndvi_series::config::{ConfigLoader, ResolvedConfig};
use ndvi_series::domain::{DateRange, IsoDate, Satellite, SeriesRequest};
use ndvi_series::earth_engine::EarthEngineHttpClient;
use ndvi_series::error::NdviError;
use ndvi_series::output::{JsonOutput, LogSink};
use ndvi_series::ranges::{date_ranges, truncate_ranges};
use ndvi_series::server::{ServerState, serve};

#[derive(Parser)]
#[command(name = "ndvi-series")]
#[command(about = "NDVI image-series service backed by Google Earth Engine")]
#[command(version, author)]
struct Cli {
    /// Path to the JSON config (default: ./ndvi-series.json if present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP server")]
    Serve(ServeArgs),
    #[command(about = "Render one image series and print the response JSON")]
    Fetch(FetchArgs),
    #[command(about = "Print the revisit windows of a date range")]
    Ranges(RangesArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[derive(Args)]
struct FetchArgs {
    start: IsoDate,
    end: IsoDate,

    #[arg(long, value_enum, default_value_t = Satellite::Landsat8)]
    satellite: Satellite,

    #[arg(long, default_value = "256x256")]
    dimensions: String,

    #[arg(long)]
    province: Option<String>,
}

#[derive(Args)]
struct RangesArgs {
    start: IsoDate,
    end: IsoDate,

    #[arg(long, value_enum, default_value_t = Satellite::Landsat8)]
    satellite: Satellite,
}

#[derive(Serialize)]
struct RangesOutput {
    satellite: Satellite,
    interval_days: u32,
    truncated: bool,
    date_ranges: Vec<DateRange>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<NdviError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &NdviError) -> u8 {
    match error {
        NdviError::InvalidSatellite { .. }
        | NdviError::InvalidDate(_)
        | NdviError::InvalidDimensions(_)
        | NdviError::InvalidInterval
        | NdviError::ConfigRead(_)
        | NdviError::ConfigParse(_)
        | NdviError::MissingConfigValue(_) => 2,
        NdviError::EarthEngineHttp(_)
        | NdviError::EarthEngineStatus { .. }
        | NdviError::EarthEngineResponse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => run_serve(args, config),
        Commands::Fetch(args) => run_fetch(args, config),
        Commands::Ranges(args) => run_ranges(args, &config),
    }
}

fn run_serve(args: ServeArgs, config: ResolvedConfig) -> miette::Result<()> {
    // The blocking HTTP client owns its own runtime, so it is built and
    // dropped outside of the server runtime.
    let client = EarthEngineHttpClient::new(&config.earth_engine)?;
    let state = Arc::new(ServerState::new(&config, client));
    let bind = args.bind.unwrap_or(config.bind);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    runtime.block_on(serve(Arc::clone(&state), bind))?;
    drop(runtime);
    drop(state);
    Ok(())
}

fn run_fetch(args: FetchArgs, config: ResolvedConfig) -> miette::Result<()> {
    let client = EarthEngineHttpClient::new(&config.earth_engine)?;
    let app = App::from_config(&config, client);
    let request = SeriesRequest::new(args.start, args.end)
        .with_satellite(args.satellite)
        .with_province(args.province)
        .with_dimensions_text(&args.dimensions)?;

    let sink = LogSink {
        request: ndvi_series::cache_key::cache_key(&request),
    };
    let result = app.download_image_series(&request, &sink)?;
    JsonOutput::print(&result).into_diagnostic()?;
    Ok(())
}

fn run_ranges(args: RangesArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let interval_days = args.satellite.interval_days();
    let ranges = date_ranges(args.start, args.end, interval_days)?;
    let (date_ranges, truncated) = truncate_ranges(ranges, config.max_images);
    JsonOutput::print(&RangesOutput {
        satellite: args.satellite,
        interval_days,
        truncated,
        date_ranges,
    })
    .into_diagnostic()?;
    Ok(())
}
