use anyhow::anyhow;
use clap::Parser;
use coastlines::{CoastlinePipeline, RunSummary, StatsConfig};
use std::path::PathBuf;

/// Annual shoreline contours and coastal change statistics for one study area
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Study area id in the study area grid
    study_area: u32,

    /// Name of the raster generation run
    run_name: String,

    /// JSON configuration; missing keys take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    match run(&args) {
        Ok(summary) => {
            log::info!(
                "Wrote {} contour features and {} statistics points for study area {}",
                summary.contour_features,
                summary.stats_points.unwrap_or(0),
                summary.study_area
            );
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => log::warn!("Could not serialise run summary: {}", e),
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> anyhow::Result<RunSummary> {
    let config = match &args.config {
        Some(path) => StatsConfig::from_json_file(path).map_err(|e| {
            anyhow!(
                "study area {}: configuration {} rejected: {}",
                args.study_area,
                path.display(),
                e
            )
        })?,
        None => StatsConfig::default(),
    };
    log::debug!("Configuration: {:?}", config);

    let pipeline = CoastlinePipeline::new(config);
    let summary = pipeline.run(&args.study_area.to_string(), &args.run_name)?;
    Ok(summary)
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        _ => builder.filter_level(log::LevelFilter::Trace),
    };
    builder.init();
}
