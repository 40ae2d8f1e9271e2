//! Crawl/index pipeline: one traversal per configured site on a bounded
//! worker pool, cooperative cancellation, then a single status pass.

use parking_lot::Mutex;
use search_core::html::{extract_links, normalize_url, path_of, strip_to_plain_text};
use search_core::{AppConfig, IndexStore, LemmaExtractor, Site, SiteConfig, SiteId, SiteStatus, StoreError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use url::Url;

use crate::fetch::{FetchError, Fetcher};

pub const STOPPED_BY_USER: &str = "Indexing stopped by user";

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("indexing is already running")]
    AlreadyRunning,
    #[error("no sites are configured")]
    NoSitesConfigured,
    #[error("indexing is not running")]
    NotRunning,
    #[error("{0} is outside the sites listed in the configuration")]
    OutsideConfiguredSites(String),
    #[error("page indexing failed: {0}")]
    Processing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("HTTP status {status} at {url}")]
    Status { url: String, status: u16 },
    #[error("invalid url {0}")]
    Url(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Process-wide cancellation request, polled by every traversal.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// URLs already taken off a site's frontier.
#[derive(Default)]
pub struct VisitedSet(Mutex<HashSet<String>>);

impl VisitedSet {
    /// Inserts and reports whether the URL was new, atomically.
    pub fn insert(&self, url: &str) -> bool {
        self.0.lock().insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.0.lock().contains(url)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub enum PageOutcome {
    /// Stored and indexed; carries in-site links when links were requested.
    Indexed(Vec<String>),
    AlreadyStored,
    Cancelled,
}

#[derive(Debug)]
pub enum CrawlOutcome {
    Completed { pages: usize },
    Cancelled,
    RootFailed(String),
}

/// Everything a site traversal needs, cheap to clone into a task.
#[derive(Clone)]
struct PageProcessor {
    store: Arc<IndexStore>,
    fetcher: Arc<dyn Fetcher>,
    extractor: LemmaExtractor,
    stop: StopFlag,
}

impl PageProcessor {
    async fn crawl_site(&self, site: Site) -> CrawlOutcome {
        let root = normalize_url(&site.url);
        let visited = VisitedSet::default();
        let mut frontier = vec![root.clone()];
        let mut pages = 0usize;
        let mut root_error = None;

        tracing::info!(site = %site.url, "crawl started");
        while let Some(url) = frontier.pop() {
            if self.stop.is_set() {
                tracing::info!(site = %site.url, pages, "crawl cancelled");
                return CrawlOutcome::Cancelled;
            }
            if !visited.insert(&url) {
                continue;
            }
            match self.process_url(&site, &url, true).await {
                Ok(PageOutcome::Indexed(links)) => {
                    pages += 1;
                    if self.stop.is_set() {
                        tracing::info!(site = %site.url, pages, "crawl cancelled");
                        return CrawlOutcome::Cancelled;
                    }
                    frontier.extend(links.into_iter().filter(|l| !visited.contains(l)));
                }
                Ok(PageOutcome::AlreadyStored) => {}
                Ok(PageOutcome::Cancelled) => {
                    tracing::info!(site = %site.url, pages, "crawl cancelled");
                    return CrawlOutcome::Cancelled;
                }
                Err(PageError::Fetch(e @ FetchError::UnsupportedContentType { .. })) => {
                    tracing::warn!(%url, error = %e, "skipping page");
                }
                Err(e) => {
                    tracing::error!(%url, error = %e, "page processing failed");
                    if url == root {
                        root_error = Some(e.to_string());
                    }
                }
            }
        }
        tracing::info!(site = %site.url, pages, visited = visited.len(), "crawl finished");
        match root_error {
            Some(e) if pages == 0 => CrawlOutcome::RootFailed(e),
            _ => CrawlOutcome::Completed { pages },
        }
    }

    /// Fetches, stores and indexes one URL. With `follow` set the outcome
    /// carries the page's links that stay under the site URL, and a stop
    /// request observed after the fetch discards the page.
    async fn process_url(&self, site: &Site, url: &str, follow: bool) -> Result<PageOutcome, PageError> {
        let path = path_of(url).map_err(|_| PageError::Url(url.to_string()))?;
        if self.store.page_exists(site.id, &path)? {
            return Ok(PageOutcome::AlreadyStored);
        }
        tracing::debug!(%url, "fetching");
        let fetched = self.fetcher.fetch(url).await?;
        if follow && self.stop.is_set() {
            return Ok(PageOutcome::Cancelled);
        }
        if fetched.status >= 400 {
            return Err(PageError::Status { url: url.to_string(), status: fetched.status });
        }

        let page = self.store.save_page(site.id, &path, fetched.status, &fetched.html)?;
        let counts = self.extractor.lemma_counts(&strip_to_plain_text(&fetched.html));
        self.store.update_lemma_and_index(site.id, page.id, &counts)?;
        tracing::info!(%url, lemmas = counts.len(), "page indexed");

        if !follow {
            return Ok(PageOutcome::Indexed(Vec::new()));
        }
        let base = Url::parse(&fetched.url)
            .or_else(|_| Url::parse(url))
            .map_err(|_| PageError::Url(url.to_string()))?;
        Ok(PageOutcome::Indexed(links_within(&site.url, extract_links(&fetched.html, &base))))
    }
}

/// Keeps the links that fall under `site_url` by plain string prefix.
pub fn links_within(site_url: &str, links: Vec<String>) -> Vec<String> {
    links.into_iter().filter(|l| l.starts_with(site_url)).collect()
}

pub struct IndexingService {
    config: AppConfig,
    processor: PageProcessor,
    running: Arc<AtomicBool>,
    start_lock: Mutex<()>,
}

impl IndexingService {
    pub fn new(
        config: AppConfig,
        store: Arc<IndexStore>,
        fetcher: Arc<dyn Fetcher>,
        extractor: LemmaExtractor,
    ) -> Self {
        Self {
            config,
            processor: PageProcessor { store, fetcher, extractor, stop: StopFlag::default() },
            running: Arc::new(AtomicBool::new(false)),
            start_lock: Mutex::new(()),
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.processor.stop.clone()
    }

    /// Full reindex of every configured site; returns once all crawls have
    /// finished or been cancelled and site statuses are final.
    pub async fn start_indexing(&self) -> Result<(), IndexingError> {
        self.begin_indexing()?.wait().await
    }

    /// Validates, wipes previous data of the configured sites and launches
    /// the crawls. Must be called within a tokio runtime.
    pub fn begin_indexing(&self) -> Result<IndexingRun, IndexingError> {
        let _guard = self.start_lock.lock();
        let store = &self.processor.store;
        if self.config.sites.is_empty() {
            return Err(IndexingError::NoSitesConfigured);
        }
        if self.running.load(Ordering::SeqCst) || !store.sites_with_status(SiteStatus::Indexing)?.is_empty() {
            return Err(IndexingError::AlreadyRunning);
        }

        // must precede the INDEXING rows that stop_indexing acts on
        self.processor.stop.reset();
        let mut sites = Vec::with_capacity(self.config.sites.len());
        for cfg in &self.config.sites {
            if let Some(old) = store.site_by_url(&cfg.url)? {
                store.delete_site_data(&old)?;
            }
            sites.push(store.create_site(&cfg.url, &cfg.name, SiteStatus::Indexing)?);
        }

        self.running.store(true, Ordering::SeqCst);
        let pool = Arc::new(Semaphore::new(self.config.crawl.workers.max(1)));
        let mut tasks = Vec::with_capacity(sites.len());
        for site in sites {
            let processor = self.processor.clone();
            let pool = pool.clone();
            let site_id = site.id;
            let handle = tokio::spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return CrawlOutcome::Cancelled;
                };
                processor.crawl_site(site).await
            });
            tasks.push((site_id, handle));
        }
        tracing::info!(sites = tasks.len(), workers = self.config.crawl.workers, "indexing started");

        Ok(IndexingRun {
            tasks,
            store: store.clone(),
            stop: self.processor.stop.clone(),
            running: self.running.clone(),
        })
    }

    pub fn stop_indexing(&self) -> Result<(), IndexingError> {
        let _guard = self.start_lock.lock();
        let store = &self.processor.store;
        let active = store.sites_with_status(SiteStatus::Indexing)?;
        if active.is_empty() {
            return Err(IndexingError::NotRunning);
        }
        tracing::info!(sites = active.len(), "stop requested");
        self.processor.stop.request();
        for site in active {
            store.set_site_status(site.id, SiteStatus::Failed, Some(STOPPED_BY_USER.to_string()))?;
        }
        Ok(())
    }

    /// Re-indexes a single URL without following its links. Any page already
    /// stored at the same path is retracted first.
    pub async fn index_page(&self, url: &str) -> Result<(), IndexingError> {
        let cfg = self
            .site_config_for(url)
            .ok_or_else(|| IndexingError::OutsideConfiguredSites(url.to_string()))?;
        let store = &self.processor.store;
        let site = match store.site_by_url(&cfg.url)? {
            Some(site) => site,
            None => store.create_site(&cfg.url, &cfg.name, SiteStatus::Failed)?,
        };

        let path = path_of(url).map_err(|e| IndexingError::Processing(format!("invalid url {url}: {e}")))?;
        if let Some(existing) = store.find_page(site.id, &path)? {
            tracing::info!(%url, page = existing.id, "retracting stored page");
            store.delete_page_data(&existing)?;
        }

        match self.processor.process_url(&site, url, false).await {
            Ok(_) => Ok(()),
            Err(PageError::Store(e)) => Err(e.into()),
            Err(e) => {
                tracing::warn!(%url, error = %e, "single page indexing failed");
                Err(IndexingError::Processing(e.to_string()))
            }
        }
    }

    fn site_config_for(&self, url: &str) -> Option<&SiteConfig> {
        self.config.site_for_url(url)
    }
}

/// A launched full crawl. `wait` joins every site task and then finalizes
/// all statuses in one pass.
pub struct IndexingRun {
    tasks: Vec<(SiteId, JoinHandle<CrawlOutcome>)>,
    store: Arc<IndexStore>,
    stop: StopFlag,
    running: Arc<AtomicBool>,
}

impl IndexingRun {
    pub async fn wait(self) -> Result<(), IndexingError> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (site_id, handle) in self.tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => CrawlOutcome::RootFailed(format!("crawl task failed: {e}")),
            };
            outcomes.push((site_id, outcome));
        }

        let result = finalize(&self.store, self.stop.is_set(), outcomes);
        self.stop.reset();
        self.running.store(false, Ordering::SeqCst);
        result
    }
}

fn finalize(store: &IndexStore, stopped: bool, outcomes: Vec<(SiteId, CrawlOutcome)>) -> Result<(), IndexingError> {
    for (site_id, outcome) in outcomes {
        let Some(site) = store.site(site_id)? else { continue };
        let pages = match &outcome {
            CrawlOutcome::Completed { pages } => *pages,
            _ => 0,
        };
        let (status, error) = if stopped {
            (SiteStatus::Failed, Some(STOPPED_BY_USER.to_string()))
        } else if site.status != SiteStatus::Indexing {
            continue;
        } else if let CrawlOutcome::RootFailed(e) = outcome {
            (SiteStatus::Failed, Some(e))
        } else {
            (SiteStatus::Indexed, None)
        };
        store.set_site_status(site_id, status, error)?;
        tracing::info!(site = %site.url, status = status.as_str(), pages, "site finalized");
    }
    Ok(())
}
