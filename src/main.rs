//! Binary entrypoint: rotates a configured image list (or the images of one
//! listing document) and logs every frame change.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use image_rotator::config::Configuration;
use image_rotator::display::{ImageRef, LayerView};
use image_rotator::events::{RotatorEvent, RotatorReason};
use image_rotator::store::{DocumentStore, MemoryStore};
use image_rotator::tasks::loader::FsImageLoader;
use image_rotator::tasks::rotator::RotatorHandle;

#[derive(Debug, Parser)]
#[command(name = "image-rotator", version, about = "Rotating image display with fallback")]
struct Args {
    /// Path to YAML config
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Rotate the images of this listing document instead of `sources`
    #[arg(long, value_name = "ID")]
    listing: Option<String>,

    /// Override the rotation interval (e.g. "3s", "750ms")
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("image_rotator={level}").parse()?);
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        listing,
        interval,
        verbose,
    } = Args::parse();
    init_tracing(verbose)?;

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(interval) = interval {
        cfg.interval = interval;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::debug!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let store = match &cfg.seed_documents {
        Some(path) => MemoryStore::from_yaml_file(path)
            .with_context(|| format!("failed to seed documents from {}", path.display()))?,
        None => MemoryStore::new(),
    };

    let sources = match &listing {
        Some(id) => {
            let doc = store
                .get_document(&cfg.listing_collection, id)
                .await?
                .ok_or_else(|| anyhow!("listing {}/{} not found", cfg.listing_collection, id))?;
            doc.string_list(&cfg.listing_images_field)
        }
        None => cfg.sources.clone(),
    };
    info!(
        sources = sources.len(),
        interval = ?cfg.interval,
        fade = ?cfg.fade,
        "starting rotator"
    );

    let loader = Arc::new(FsImageLoader::new(&cfg.image_root));
    let (events_tx, mut events_rx) = mpsc::channel::<RotatorEvent>(64);
    let rotator = RotatorHandle::spawn(
        sources,
        cfg.timing(),
        loader,
        events_tx,
        cfg.max_concurrent_loads,
    );

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    tracing::warn!("ctrl-c handler failed: {err}");
                }
                info!("ctrl-c received; shutting down");
                break;
            }
            maybe_event = events_rx.recv() => match maybe_event {
                Some(event) => log_event(&event),
                None => break,
            }
        }
    }

    rotator.shutdown().await
}

fn describe(layer: Option<&LayerView>) -> String {
    match layer.map(|l| &l.image.source) {
        Some(ImageRef::Url(url)) => url.clone(),
        Some(ImageRef::Placeholder) => "(placeholder)".to_string(),
        None => "(none)".to_string(),
    }
}

fn log_event(event: &RotatorEvent) {
    let view = &event.view;
    match &event.reason {
        RotatorReason::Rotated(change) => info!(
            current = change.current,
            previous = change.previous,
            showing = %describe(view.current.as_ref()),
            "frame rotated"
        ),
        RotatorReason::LoadFailed(url) => info!(
            url = %url,
            showing = %describe(view.current.as_ref()),
            "image unavailable; placeholder shown"
        ),
        reason => tracing::debug!(
            ?reason,
            current = ?view.current_index(),
            previous = ?view.previous_index(),
            showing = %describe(view.current.as_ref()),
            "display updated"
        ),
    }
}
