use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use relayfeed::config::Config;
use relayfeed::coordinator::{AcquisitionOutcome, Coordinator};
use relayfeed::storage::{KvStore, MemoryStore, SqliteStore, StoreError};
use relayfeed::util::validate_feed_url;

#[derive(Parser, Debug)]
#[command(
    name = "relayfeed",
    about = "Fetch a feed's latest posts through public relay services"
)]
struct Args {
    /// Feed URL (RSS, Atom or RDF)
    feed_url: String,

    /// Maximum number of posts to print
    #[arg(long, value_name = "N")]
    max: Option<usize>,

    /// Config file (default: ~/.config/relayfeed/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ignore and do not update the persistent cache
    #[arg(long)]
    no_cache: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let feed_url = validate_feed_url(&args.feed_url)
        .with_context(|| format!("Invalid feed URL '{}'", args.feed_url))?;

    let config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            tracing::debug!("HOME not set, using default configuration");
            Config::default()
        }
    };

    let store = open_store(&config, args.no_cache).await?;
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let coordinator = Coordinator::from_config(&config, client, store);

    tracing::info!(
        feed = %feed_url,
        relays = ?coordinator.relay_names(),
        "Acquiring feed"
    );
    let outcome = coordinator.query(feed_url.as_str(), args.max).await;

    if args.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to encode outcome")?;
        println!("{json}");
    } else {
        print_outcome(&outcome);
    }

    if !outcome.is_success() {
        if !args.json {
            eprintln!("Error: {}", outcome.summary());
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn open_store(config: &Config, no_cache: bool) -> Result<Arc<dyn KvStore>> {
    let path = match (&config.cache_path, no_cache) {
        (Some(path), false) => path,
        _ => return Ok(Arc::new(MemoryStore::new())),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
    }

    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in cache path"))?;
    match SqliteStore::open(path_str).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(StoreError::Locked) => {
            // Still usable, just without persistence for this run
            tracing::warn!(path = %path.display(), "Cache database is locked, using a memory cache");
            Ok(Arc::new(MemoryStore::new()))
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open cache database: {}", e)),
    }
}

fn print_outcome(outcome: &AcquisitionOutcome) {
    let AcquisitionOutcome::Success { posts, source } = outcome else {
        return;
    };
    for post in posts {
        println!("{}  {}  {}", post.date, post.domain, post.title);
        println!("    {}", post.link);
    }
    println!();
    println!("{} posts via {}", posts.len(), source);
}
