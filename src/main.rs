//! sldc-cytomine - dump and inspect Cytomine whole slide images.
//!
//! This binary wires the CLI to the library: it configures logging, builds
//! the API client and runs the selected command.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sldc_cytomine::{
    config::{Cli, Command, DumpConfig, ProbeConfig},
    dump::dump_region,
    remote::{infer_protocol_for, TileProtocol},
    slide::{ImageInstance, ServerGeneration, SliceInstance, SlideSource},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Dump(config) => run_dump(config).await,
        Command::Probe(config) => run_probe(config).await,
    }
}

// =============================================================================
// Dump Command
// =============================================================================

async fn run_dump(config: DumpConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let request = match config.to_request() {
        Ok(request) => request,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match config.remote.client() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!("  Host: {}", client.host());
    info!("  Zone: {}", request.zone);
    info!("  Zoom level: {}", request.zoom_level);
    match request.protocol {
        Some(protocol) => info!("  Protocol: {}", protocol),
        None => info!("  Protocol: auto"),
    }
    info!(
        "  Cache: {} tiles, {}",
        config.cache_tiles, config.cache_size
    );
    info!("  Jobs: {}", request.jobs);

    match dump_region(&client, &request).await {
        Ok(outcome) => {
            info!(
                "Cache: {} fetched, {} hits, {} coalesced",
                outcome.cache.misses, outcome.cache.hits, outcome.cache.coalesced
            );
            println!("{}", outcome.path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Dump failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Probe Command
// =============================================================================

/// Summary printed by `probe`.
#[derive(Debug, Serialize)]
struct ProbeReport {
    image: ImageInstance,
    slice: Option<SliceInstance>,
    generation: ServerGeneration,
    protocol: TileProtocol,
    max_zoom: u32,
    levels: Vec<LevelReport>,
}

#[derive(Debug, Serialize)]
struct LevelReport {
    zoom: u32,
    api_zoom: u32,
    width: u32,
    height: u32,
}

async fn run_probe(config: ProbeConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match probe(&config).await {
        Ok(report) if config.json => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn probe(config: &ProbeConfig) -> Result<ProbeReport, sldc_cytomine::SlideError> {
    let client = config.remote.client()?;
    let slide = Arc::new(client.fetch_slide(config.image).await?);
    let (generation, protocol) = infer_protocol_for(&client, &slide).await?;
    let max_zoom = slide.max_zoom()?;

    let levels = (0..=max_zoom)
        .map(|zoom| {
            slide.view(zoom).map(|view| LevelReport {
                zoom,
                api_zoom: view.api_zoom_level(),
                width: view.width(),
                height: view.height(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ProbeReport {
        image: slide.instance().clone(),
        slice: slide.slice().cloned(),
        generation,
        protocol,
        max_zoom,
        levels,
    })
}

fn print_report(report: &ProbeReport) {
    let instance = &report.image;

    println!("Image {}", instance.id);
    println!("═════════════════════════════════");
    if let Some(ref name) = instance.original_filename {
        println!("  File: {}", name);
    }
    println!("  Size: {}x{}", instance.width, instance.height);
    println!("  Server: {:?}", report.generation);
    println!("  Protocol: {}", report.protocol);
    println!();
    println!("  Zoom  API zoom  Dimensions");
    println!("  ────  ────────  ──────────");
    for level in &report.levels {
        println!(
            "  {:>4}  {:>8}  {}x{}",
            level.zoom, level.api_zoom, level.width, level.height
        );
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "sldc_cytomine=debug"
    } else {
        "sldc_cytomine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
