use async_trait::async_trait;
use reqwest::{header, Client};
use search_core::CrawlSettings;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects; relative links resolve against it.
    pub url: String,
    pub status: u16,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported content type {content_type} at {url}")]
    UnsupportedContentType { url: String, content_type: String },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &CrawlSettings) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        if let Ok(referrer) = header::HeaderValue::from_str(&settings.referrer) {
            headers.insert(header::REFERER, referrer);
        }
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self { client })
    }
}

fn is_markup(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    mime.starts_with("text/") || mime == "application/xhtml+xml" || mime == "application/xml" || mime.ends_with("+xml")
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let http = |source| FetchError::Http { url: url.to_string(), source };
        let resp = self.client.get(url).send().await.map_err(http)?;
        if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
            let ct = ct.to_str().unwrap_or_default();
            if !is_markup(ct) {
                return Err(FetchError::UnsupportedContentType {
                    url: url.to_string(),
                    content_type: ct.to_string(),
                });
            }
        }
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let bytes = resp.bytes().await.map_err(http)?;
        Ok(FetchedPage { url: final_url, status, html: String::from_utf8_lossy(&bytes).into_owned() })
    }
}
