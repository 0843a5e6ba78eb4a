//! nd2-export - Export subsets of ND2 acquisitions to OME-TIFF.
//!
//! This binary parses the command line, installs logging and drives the
//! export service.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nd2_export::{
    config::{Cli, Command, ExportConfig, InfoConfig},
    AxisMetadata, ChannelReporter, ExportRequest, ExportService, JobOutcome, ProgressEvent,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Info(config) => run_info(config).await,
        Command::Export(config) => run_export(config).await,
    }
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(config: InfoConfig) -> ExitCode {
    init_logging(config.verbose);

    let service = ExportService::new();
    let metadata = match service.load_metadata(&config.path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&metadata) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize metadata: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_metadata(&metadata);
    }

    ExitCode::SUCCESS
}

fn print_metadata(metadata: &AxisMetadata) {
    println!("Source:     {}", metadata.source_name);
    println!(
        "Plane:      {} x {} {}",
        metadata.width,
        metadata.height,
        metadata.pixel_type.ome_name()
    );
    println!("Planes:     {}", metadata.plane_count());

    println!("Axes:");
    for axis in metadata.axes() {
        println!("  {:<9} {}", axis.kind.name(), axis.extent);
    }

    let calibration = &metadata.calibration;
    let fmt = |v: Option<f64>, unit: &str| {
        v.map(|v| format!("{} {}", v, unit))
            .unwrap_or_else(|| "unknown".to_string())
    };
    println!("Calibration:");
    println!("  X         {}", fmt(calibration.physical_size_x, "um"));
    println!("  Y         {}", fmt(calibration.physical_size_y, "um"));
    println!("  Z         {}", fmt(calibration.physical_size_z, "um"));
    println!("  Time      {}", fmt(calibration.time_increment, "s"));

    println!("Channels:");
    for (i, channel) in metadata.channels.iter().enumerate() {
        let emission = channel
            .emission_wavelength
            .map(|nm| format!(" ({} nm)", nm))
            .unwrap_or_default();
        println!("  {:<9} {}{}", i, channel.name, emission);
    }
}

// =============================================================================
// Export Command
// =============================================================================

async fn run_export(config: ExportConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let selection = match config.selection() {
        Ok(selection) => selection,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let request =
        ExportRequest::new(&config.input, &config.output).with_selection(selection);
    let (reporter, mut events) = ChannelReporter::new();

    let service = ExportService::new();
    let handle = match service.start_export(request, Arc::new(reporter)).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        job = %handle.id(),
        "Exporting {} -> {}",
        config.input.display(),
        config.output.display()
    );

    let cancel = handle.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling export");
            cancel.cancel();
        }
    });

    while let Some((_, event)) = events.recv().await {
        let terminal = event.is_terminal();
        if let ProgressEvent::Progress { completed, total } = event {
            info!("  {}/{} planes", completed, total);
        }
        if terminal {
            break;
        }
    }

    match handle.wait().await {
        Ok(JobOutcome::Succeeded { destination, units }) => {
            info!("Wrote {} planes to {}", units, destination.display());
            ExitCode::SUCCESS
        }
        Ok(JobOutcome::Failed { error, index }) => {
            match index {
                Some(index) => error!("Export failed at {}: {}", index, error),
                None => error!("Export failed: {}", error),
            }
            ExitCode::FAILURE
        }
        Ok(JobOutcome::Cancelled { completed }) => {
            warn!("Export cancelled after {} planes", completed);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "nd2_export=debug"
    } else {
        "nd2_export=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
