use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawler::{HttpFetcher, IndexingService};
use search_core::stats::statistics;
use search_core::{AppConfig, IndexStore, LemmaExtractor, SearchEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl the configured sites into the lemma index")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,
    /// Override the index directory from the configuration
    #[arg(long)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drop and rebuild the index of every configured site
    Crawl,
    /// Re-index a single page without following its links
    Page {
        url: String,
    },
    /// Print per-site statistics as JSON
    Stats,
    /// Run a query against the index
    Search {
        query: String,
        #[arg(long)]
        site: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(db) = args.db {
        config.storage.path = db;
    }
    let store = Arc::new(IndexStore::open(&config.storage.path)?);
    let extractor = LemmaExtractor::default();

    match args.command {
        Commands::Crawl => {
            let fetcher = Arc::new(HttpFetcher::new(&config.crawl)?);
            let service = Arc::new(IndexingService::new(config.clone(), store.clone(), fetcher, extractor));
            let stopper = service.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    if let Err(e) = stopper.stop_indexing() {
                        tracing::warn!(error = %e, "stop request ignored");
                    }
                }
            });
            service.start_indexing().await?;
            eprintln!("{}", serde_json::to_string_pretty(&statistics(&store)?)?);
        }
        Commands::Page { url } => {
            let fetcher = Arc::new(HttpFetcher::new(&config.crawl)?);
            let service = IndexingService::new(config.clone(), store.clone(), fetcher, extractor);
            service.index_page(&url).await?;
            eprintln!("indexed {url}");
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&statistics(&store)?)?);
        }
        Commands::Search { query, site, offset, limit } => {
            let limit = limit.unwrap_or(config.search.default_limit);
            let engine = SearchEngine::new(store.clone(), extractor, config.search.clone());
            let results = engine.search(&query, site.as_deref(), offset, limit)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    store.flush()?;
    Ok(())
}
