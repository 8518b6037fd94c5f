use categorical_mosaic::cli::Args;
use categorical_mosaic::error::Result;
use categorical_mosaic::pipeline::{self, BoundaryClip};
use categorical_mosaic::{
    GdalBackend, GdalWarpClipper, LogObserver, MergeController, MergeWarning, SystemMemory,
};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::fs;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Categorical Mosaic Builder ===");

    let config = args.to_config()?;
    info!(
        "Chunk limits {}..={} px, watermarks {:.0}%/{:.0}%, up to {} read workers",
        config.limits.min,
        config.limits.max,
        config.watermarks.low,
        config.watermarks.high,
        config.max_workers
    );

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            info!("Created output directory {}", parent.display());
        }
    }

    let backend = GdalBackend;
    let memory = SystemMemory;
    let observer = LogObserver;
    let controller = MergeController::new(&backend, &memory, &observer, config)?;

    let clipper = GdalWarpClipper {
        compression: args.compression.to_uppercase(),
        ..GdalWarpClipper::default()
    };
    let clip = args.boundary.as_deref().map(|boundary| BoundaryClip {
        boundary,
        clipper: &clipper,
    });

    let outcome = pipeline::merge(&controller, &args.input, &args.output, clip)?;

    for warning in &outcome.warnings {
        match warning {
            MergeWarning::DegenerateOutput { nodata } => {
                warn!("Mosaic contains only nodata ({})", nodata)
            }
            MergeWarning::TilesSkipped(paths) => {
                warn!("{} tiles could not be opened and were skipped", paths.len())
            }
            MergeWarning::TileReadFailures(n) => warn!("{} tile reads failed", n),
            MergeWarning::ValidationFailed(reason) => warn!("Validation failed: {}", reason),
            MergeWarning::ClipFailed(reason) => warn!("Clipping failed: {}", reason),
        }
    }

    if let Some(report) = &outcome.report {
        info!("Output classes: {:?}", report.distinct_values);
    }
    info!(
        "Wrote {} windows, final chunk size {}",
        outcome.windows, outcome.final_chunk_size
    );
    info!("Output: {}", outcome.output.display());
    for clipped in &outcome.clipped {
        info!("Clipped output: {}", clipped.display());
    }

    if outcome.is_degenerate() {
        warn!("Check the tile suffix and nodata value; the mosaic holds no categories");
    }

    info!("=== Done! ===");
    Ok(())
}
