use async_trait::async_trait;
use crawler::{FetchError, FetchedPage, Fetcher, IndexingError, IndexingService, STOPPED_BY_USER};
use parking_lot::Mutex;
use search_core::morphology::DictionaryMorphology;
use search_core::stats::statistics;
use search_core::{AppConfig, CrawlSettings, IndexStore, LemmaExtractor, SiteConfig, SiteStatus};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

enum Reply {
    Page(u16, &'static str),
    Binary,
}

type Hook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct FakeFetcher {
    pages: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
    on_fetch: Mutex<Option<Hook>>,
}

impl FakeFetcher {
    fn with(mut self, url: &str, reply: Reply) -> Self {
        self.pages.insert(url.to_string(), reply);
        self
    }

    fn fetch_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| u.as_str() == url).count()
    }

    fn total_fetches(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let n = {
            let mut calls = self.calls.lock();
            calls.push(url.to_string());
            calls.len()
        };
        if let Some(hook) = self.on_fetch.lock().as_ref() {
            hook(n);
        }
        match self.pages.get(url) {
            Some(Reply::Page(status, html)) => {
                Ok(FetchedPage { url: url.to_string(), status: *status, html: html.to_string() })
            }
            Some(Reply::Binary) => Err(FetchError::UnsupportedContentType {
                url: url.to_string(),
                content_type: "image/png".into(),
            }),
            None => Ok(FetchedPage { url: url.to_string(), status: 404, html: String::new() }),
        }
    }
}

fn config() -> AppConfig {
    AppConfig {
        sites: vec![SiteConfig { url: "http://ex.com".into(), name: "Example".into() }],
        ..AppConfig::default()
    }
}

fn service(store: &Arc<IndexStore>, fetcher: &Arc<FakeFetcher>) -> Arc<IndexingService> {
    service_with(config(), store, fetcher)
}

fn service_with(config: AppConfig, store: &Arc<IndexStore>, fetcher: &Arc<FakeFetcher>) -> Arc<IndexingService> {
    let extractor = LemmaExtractor::new(Arc::new(DictionaryMorphology::new()));
    Arc::new(IndexingService::new(config, store.clone(), fetcher.clone(), extractor))
}

/// Two sites sharing a single worker.
fn two_site_config() -> AppConfig {
    AppConfig {
        crawl: CrawlSettings { workers: 1, ..CrawlSettings::default() },
        sites: vec![
            SiteConfig { url: "http://ex.com".into(), name: "Example".into() },
            SiteConfig { url: "http://ex.org".into(), name: "Other".into() },
        ],
        ..AppConfig::default()
    }
}

fn two_sites() -> FakeFetcher {
    FakeFetcher::default()
        .with("http://ex.com/", Reply::Page(200, r#"<html><body>кот<a href="/1">1</a><a href="/2">2</a></body></html>"#))
        .with("http://ex.com/1", Reply::Page(200, "<html><body>дом</body></html>"))
        .with("http://ex.com/2", Reply::Page(200, "<html><body>сад</body></html>"))
        .with("http://ex.org/", Reply::Page(200, r#"<html><body>лес<a href="/x">x</a></body></html>"#))
        .with("http://ex.org/x", Reply::Page(200, "<html><body>луг</body></html>"))
}

fn small_site() -> FakeFetcher {
    FakeFetcher::default()
        .with(
            "http://ex.com/",
            Reply::Page(
                200,
                r#"<html><body><p>кот дом</p><a href="/a">a</a><a href="/b#top">b</a>
                <a href="http://other.com/x">x</a></body></html>"#,
            ),
        )
        .with("http://ex.com/a", Reply::Page(200, r#"<html><body><p>кот сад</p><a href="/">home</a></body></html>"#))
        .with("http://ex.com/b", Reply::Page(200, r#"<html><body><p>кот</p><a href="/a">a</a></body></html>"#))
}

fn frequency(store: &IndexStore, site_id: u64, lemma: &str) -> Option<u32> {
    store.find_lemma(site_id, lemma).unwrap().map(|l| l.frequency)
}

#[tokio::test]
async fn full_crawl_indexes_every_reachable_page() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(small_site());
    service(&store, &fetcher).start_indexing().await.unwrap();

    let site = store.site_by_url("http://ex.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(site.last_error, None);
    assert_eq!(store.count_pages(site.id).unwrap(), 3);
    assert_eq!(frequency(&store, site.id, "кот"), Some(3));
    assert_eq!(frequency(&store, site.id, "дом"), Some(1));
    assert_eq!(frequency(&store, site.id, "сад"), Some(1));

    let stats = statistics(&store).unwrap();
    assert_eq!(stats.total.pages, 3);
    assert!(!stats.total.indexing);
}

#[tokio::test]
async fn each_url_is_fetched_once_and_foreign_links_never() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(small_site());
    service(&store, &fetcher).start_indexing().await.unwrap();

    assert_eq!(fetcher.fetch_count("http://ex.com/"), 1);
    assert_eq!(fetcher.fetch_count("http://ex.com/a"), 1);
    assert_eq!(fetcher.fetch_count("http://ex.com/b"), 1);
    assert_eq!(fetcher.fetch_count("http://other.com/x"), 0);
    assert_eq!(fetcher.total_fetches(), 3);
}

#[tokio::test]
async fn restart_rebuilds_from_scratch() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(small_site());
    let svc = service(&store, &fetcher);
    svc.start_indexing().await.unwrap();
    svc.start_indexing().await.unwrap();

    let site = store.site_by_url("http://ex.com").unwrap().unwrap();
    assert_eq!(store.sites().unwrap().len(), 1);
    assert_eq!(store.count_pages(site.id).unwrap(), 3);
    assert_eq!(frequency(&store, site.id, "кот"), Some(3));
}

#[tokio::test]
async fn error_statuses_and_binary_content_are_skipped() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(
        FakeFetcher::default()
            .with(
                "http://ex.com/",
                Reply::Page(
                    200,
                    r#"<html><body><p>кот</p><a href="/gone">g</a><a href="/logo.png">l</a><a href="/ok">o</a></body></html>"#,
                ),
            )
            .with("http://ex.com/gone", Reply::Page(404, "<html><body>нет</body></html>"))
            .with("http://ex.com/logo.png", Reply::Binary)
            .with("http://ex.com/ok", Reply::Page(200, "<html><body>дом</body></html>")),
    );
    service(&store, &fetcher).start_indexing().await.unwrap();

    let site = store.site_by_url("http://ex.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(store.count_pages(site.id).unwrap(), 2);
    assert!(!store.page_exists(site.id, "/gone").unwrap());
    assert!(!store.page_exists(site.id, "/logo.png").unwrap());
    assert_eq!(frequency(&store, site.id, "нет"), None);
}

#[tokio::test]
async fn unreachable_root_fails_the_site() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(FakeFetcher::default().with("http://ex.com/", Reply::Page(500, "")));
    service(&store, &fetcher).start_indexing().await.unwrap();

    let site = store.site_by_url("http://ex.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert!(site.last_error.unwrap().contains("500"));
    assert_eq!(store.count_pages(site.id).unwrap(), 0);
}

#[tokio::test]
async fn stop_mid_crawl_fails_site_with_user_message() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(
        FakeFetcher::default()
            .with(
                "http://ex.com/",
                Reply::Page(200, r#"<html><body>кот<a href="/1">1</a><a href="/2">2</a><a href="/3">3</a></body></html>"#),
            )
            .with("http://ex.com/1", Reply::Page(200, r#"<html><body>дом<a href="/4">4</a></body></html>"#))
            .with("http://ex.com/2", Reply::Page(200, "<html><body>сад</body></html>"))
            .with("http://ex.com/3", Reply::Page(200, "<html><body>лес</body></html>"))
            .with("http://ex.com/4", Reply::Page(200, "<html><body>луг</body></html>")),
    );
    let svc = service(&store, &fetcher);
    let handle: Weak<IndexingService> = Arc::downgrade(&svc);
    let hook: Hook = Box::new(move |n| {
        if n == 2 {
            if let Some(svc) = handle.upgrade() {
                svc.stop_indexing().unwrap();
            }
        }
    });
    *fetcher.on_fetch.lock() = Some(hook);

    svc.start_indexing().await.unwrap();

    let site = store.site_by_url("http://ex.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some(STOPPED_BY_USER));
    assert!(store.count_pages(site.id).unwrap() <= 2);
    assert_eq!(fetcher.total_fetches(), 2);
    assert!(!svc.stop_flag().is_set());
}

#[tokio::test]
async fn start_is_rejected_while_a_site_is_indexing() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    store.create_site("http://ex.com", "Example", SiteStatus::Indexing).unwrap();
    let fetcher = Arc::new(small_site());

    let err = service(&store, &fetcher).start_indexing().await.unwrap_err();
    assert!(matches!(err, IndexingError::AlreadyRunning));
    assert_eq!(fetcher.total_fetches(), 0);
}

#[tokio::test]
async fn start_without_sites_is_rejected() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher: Arc<FakeFetcher> = Arc::new(FakeFetcher::default());
    let extractor = LemmaExtractor::new(Arc::new(DictionaryMorphology::new()));
    let svc = IndexingService::new(AppConfig::default(), store, fetcher, extractor);
    assert!(matches!(svc.start_indexing().await, Err(IndexingError::NoSitesConfigured)));
}

#[tokio::test]
async fn stop_when_idle_reports_not_running() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(small_site());
    let svc = service(&store, &fetcher);
    assert!(matches!(svc.stop_indexing(), Err(IndexingError::NotRunning)));

    svc.start_indexing().await.unwrap();
    assert!(matches!(svc.stop_indexing(), Err(IndexingError::NotRunning)));
}

#[tokio::test]
async fn single_page_indexing_is_idempotent() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(small_site());
    let svc = service(&store, &fetcher);

    svc.index_page("http://ex.com/a").await.unwrap();
    svc.index_page("http://ex.com/a").await.unwrap();

    let site = store.site_by_url("http://ex.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(store.count_pages(site.id).unwrap(), 1);
    assert_eq!(frequency(&store, site.id, "кот"), Some(1));
    assert_eq!(frequency(&store, site.id, "сад"), Some(1));
    assert_eq!(fetcher.fetch_count("http://ex.com/"), 0);
}

#[tokio::test]
async fn single_page_outside_configured_sites_is_rejected() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(small_site());
    let err = service(&store, &fetcher).index_page("http://other.com/x").await.unwrap_err();
    assert!(matches!(err, IndexingError::OutsideConfiguredSites(_)));
    assert!(store.sites().unwrap().is_empty());
}

#[tokio::test]
async fn single_page_error_status_is_reported() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(small_site());
    let err = service(&store, &fetcher).index_page("http://ex.com/missing").await.unwrap_err();
    assert!(matches!(err, IndexingError::Processing(_)));
}

#[tokio::test]
async fn sites_beyond_the_worker_pool_are_crawled_in_turn() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(two_sites());
    service_with(two_site_config(), &store, &fetcher).start_indexing().await.unwrap();

    for (url, pages) in [("http://ex.com", 3), ("http://ex.org", 2)] {
        let site = store.site_by_url(url).unwrap().unwrap();
        assert_eq!(site.status, SiteStatus::Indexed, "{url}");
        assert_eq!(store.count_pages(site.id).unwrap(), pages, "{url}");
    }
    assert_eq!(fetcher.total_fetches(), 5);
}

#[tokio::test]
async fn stop_cancels_sites_still_waiting_for_a_worker() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(two_sites());
    let svc = service_with(two_site_config(), &store, &fetcher);
    let handle: Weak<IndexingService> = Arc::downgrade(&svc);
    let hook: Hook = Box::new(move |n| {
        if n == 2 {
            if let Some(svc) = handle.upgrade() {
                svc.stop_indexing().unwrap();
            }
        }
    });
    *fetcher.on_fetch.lock() = Some(hook);

    svc.start_indexing().await.unwrap();

    for url in ["http://ex.com", "http://ex.org"] {
        let site = store.site_by_url(url).unwrap().unwrap();
        assert_eq!(site.status, SiteStatus::Failed, "{url}");
        assert_eq!(site.last_error.as_deref(), Some(STOPPED_BY_USER), "{url}");
    }
    assert_eq!(fetcher.fetch_count("http://ex.org/"), 0);
    assert_eq!(fetcher.total_fetches(), 2);
}

#[tokio::test]
async fn stop_right_after_launch_fails_every_site() {
    let store = Arc::new(IndexStore::temporary().unwrap());
    let fetcher = Arc::new(two_sites());
    let svc = service_with(two_site_config(), &store, &fetcher);

    let run = svc.begin_indexing().unwrap();
    svc.stop_indexing().unwrap();
    run.wait().await.unwrap();

    for url in ["http://ex.com", "http://ex.org"] {
        let site = store.site_by_url(url).unwrap().unwrap();
        assert_eq!(site.status, SiteStatus::Failed, "{url}");
        assert_eq!(site.last_error.as_deref(), Some(STOPPED_BY_USER), "{url}");
    }
    assert_eq!(fetcher.total_fetches(), 0);
    assert!(!svc.stop_flag().is_set());

    svc.start_indexing().await.unwrap();
    let site = store.site_by_url("http://ex.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
}
