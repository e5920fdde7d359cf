use anyhow::{Context, Result};
use clap::Parser;
use photofeed::api::{CachedImageFetcher, EnvToken, HttpImageFetcher, RetryPolicy, UnsplashClient};
use photofeed::config::Config;
use photofeed::fetchers::Fetchers;
use photofeed::model::{OrchestratorState, PresentationItem, SourceId};
use photofeed::orchestrator::{CompletionOutcome, FetchOrchestrator, OrchestratorOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

/// Get the config directory path (~/.config/photofeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("photofeed"))
}

#[derive(Parser, Debug)]
#[command(name = "photofeed", about = "Paginated photo feed and search client")]
struct Args {
    /// Config file (default: ~/.config/photofeed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Search query; omit or leave blank for the default feed
    #[arg(long, short)]
    query: Option<String>,

    /// Show the photos liked by this user instead of the feed
    #[arg(long, value_name = "USERNAME", conflicts_with = "query")]
    likes: Option<String>,

    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: usize,

    /// Also download thumbnails for every loaded item
    #[arg(long)]
    images: bool,

    /// Toggle the like state of the item at this position after loading
    #[arg(long, value_name = "POSITION")]
    like: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Effective configuration");

    let retry = RetryPolicy::from_config(&config);
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let client = UnsplashClient::new(
        http.clone(),
        &config.api_base_url,
        Arc::new(EnvToken::from_config(&config)),
        retry,
    )
    .context("Invalid api_base_url")?;
    let images = CachedImageFetcher::new(
        HttpImageFetcher::new(http, retry),
        config.image_cache_capacity,
    );

    let fetchers = Fetchers::from_client(Arc::new(client), Arc::new(images));
    let mut orchestrator = FetchOrchestrator::new(fetchers, OrchestratorOptions::from(&config));
    let mut states = orchestrator.subscribe_state();

    let source = match args.likes {
        Some(username) => SourceId::UserLikes(username),
        None => SourceId::from_query(args.query.as_deref().unwrap_or("")),
    };
    orchestrator.set_active_source(source);
    println!("Source: {}", orchestrator.active_source());

    for _ in 0..args.pages {
        if orchestrator.fetch_next_page().is_none() {
            break;
        }
        orchestrator.run_until_idle().await;

        loop {
            match states.try_recv() {
                Ok(OrchestratorState::Loading) => {}
                Ok(OrchestratorState::Loaded(items)) => {
                    for item in items {
                        print_item(&item);
                    }
                }
                Ok(OrchestratorState::Failed(e)) => anyhow::bail!("Page fetch failed: {e}"),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "State subscriber lagged");
                }
                Err(_) => break,
            }
        }
    }

    if args.images && !orchestrator.is_empty() {
        let indices: Vec<usize> = (0..orchestrator.len()).collect();
        let started = orchestrator.request_images(&indices);
        let hydrated = orchestrator
            .run_until_idle()
            .await
            .iter()
            .filter(|outcome| matches!(outcome, CompletionOutcome::ImageHydrated { .. }))
            .count();
        let bytes: usize = (0..orchestrator.len())
            .filter_map(|index| orchestrator.image_slot(index).ok())
            .filter_map(|slot| slot.image.as_ref())
            .map(|image| image.len())
            .sum();
        println!("Hydrated {hydrated}/{started} thumbnails ({bytes} bytes)");
    }

    if let Some(position) = args.like {
        let item = orchestrator
            .presentation_item(position)
            .context("No item at that position")?;
        let mut updates = orchestrator.subscribe_item_updates();
        if orchestrator.set_liked(position, !item.liked_by_user) {
            orchestrator.run_until_idle().await;
        }
        match updates.try_recv() {
            Ok(updated) => print_item(&updated),
            Err(_) => anyhow::bail!("Like toggle for {} failed", item.id),
        }
    }

    Ok(())
}

fn print_item(item: &PresentationItem) {
    println!(
        "{:>4}  {:<12} {:>6} likes{}  {}  {}",
        item.position,
        item.id,
        item.likes,
        if item.liked_by_user { " (liked)" } else { "" },
        item.created_at,
        item.description
    );
}
