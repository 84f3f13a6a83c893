// SPDX-License-Identifier: MIT

use aeroplan_core::geo::BoundingBox;
use aeroplan_core::navdata::Integrity;
use aeroplan_core::{EngineConfig, OfflineEngine};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the offline cache database
    #[arg(long, env = "AEROPLAN_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a map layer for offline use
    Download {
        /// Layer id from the catalog (e.g. "wac")
        layer: String,
        /// Bounding box as minLon,minLat,maxLon,maxLat (defaults to the
        /// configured sync region)
        #[arg(long)]
        bbox: Option<String>,
        /// Zoom levels to cover
        #[arg(long, value_delimiter = ',', default_values_t = vec![5u8, 6, 7])]
        zooms: Vec<u8>,
    },
    /// Sync the aeronautical reference dataset for offline search
    Sync,
    /// Search the offline reference database
    Search { query: String },
    /// Show cache and sync status
    Status,
    /// Delete a layer's cached tiles
    Clear { layer: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )
    .ok();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(OfflineEngine::default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let config = EngineConfig::default();
    let engine = OfflineEngine::open(config, &db_path).await;

    match &cli.command {
        Commands::Download { layer, bbox, zooms } => {
            let bbox = match bbox {
                Some(s) => parse_bbox(s)?,
                None => engine.config().region_bbox,
            };
            println!("Downloading layer '{}' at zooms {:?}...", layer, zooms);
            let meta = engine
                .download_layer(layer, &bbox, zooms, |percent| {
                    print!("\r{:>3}%", percent);
                    std::io::stdout().flush().ok();
                })
                .await?;
            println!(
                "\nDone: {}/{} tiles cached",
                meta.downloaded_tiles, meta.total_tiles
            );
        }
        Commands::Sync => {
            println!("Syncing reference data...");
            let result = engine
                .sync_reference_data(|percent| {
                    print!("\r{:>3}%", percent);
                    std::io::stdout().flush().ok();
                })
                .await?;
            println!("\nCached {} points:", result.total);
            for (category, count) in &result.counts {
                println!("  {:<10} {}", category.as_str(), count);
            }
            match result.integrity {
                Integrity::Verified => println!("Integrity: verified"),
                Integrity::Partial => {
                    println!("Integrity: PARTIAL");
                    for warning in &result.warnings {
                        println!("  warning: {}", warning);
                    }
                }
            }
        }
        Commands::Search { query } => {
            let points = engine.search_offline(query).await;
            if points.is_empty() {
                println!("No matches for '{}'", query);
            }
            for p in points {
                println!(
                    "{:<10} {:<6} {:<32} {:>9.4} {:>9.4}",
                    p.category.as_str(),
                    p.icao_code.as_deref().unwrap_or("-"),
                    p.name,
                    p.lat,
                    p.lng
                );
            }
        }
        Commands::Status => {
            println!("Database: {}", db_path.display());
            println!("Cache size: {} bytes", engine.cache_size_bytes().await);
            let complete = engine.list_complete_layer_ids().await;
            for layer in &engine.config().layers {
                let count = engine.cached_tile_count(&layer.id).await;
                let mark = if complete.contains(&layer.id) { "[x]" } else { "[ ]" };
                println!("{} {:<10} {} tiles", mark, layer.id, count);
            }
            println!(
                "Reference data sync needed: {}",
                engine.is_sync_needed().await
            );
        }
        Commands::Clear { layer } => {
            engine.clear_layer_cache(layer).await?;
            println!("Cleared cached tiles for '{}'", layer);
        }
    }

    Ok(())
}

fn parse_bbox(s: &str) -> Result<BoundingBox> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("Invalid bbox '{}'", s))?;
    anyhow::ensure!(
        parts.len() == 4,
        "bbox must be minLon,minLat,maxLon,maxLat"
    );
    let bbox = BoundingBox::new(parts[1], parts[3], parts[0], parts[2]);
    anyhow::ensure!(bbox.is_valid(), "bbox '{}' is not a valid extent", s);
    Ok(bbox)
}
