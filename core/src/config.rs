use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { path: PathBuf::from("./data/index") }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub user_agent: String,
    pub referrer: String,
    pub timeout_ms: u64,
    /// Size of the worker pool shared by all site crawls.
    pub workers: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36".into(),
            referrer: "http://www.google.com".into(),
            timeout_ms: 5_000,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Lemmas found on at least this share of a site's pages are ignored.
    pub exclusion_ratio: f64,
    /// Sites with fewer pages than this never exclude lemmas.
    pub exclusion_min_pages: usize,
    pub snippet_chars: usize,
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { exclusion_ratio: 0.75, exclusion_min_pages: 5, snippet_chars: 200, default_limit: 20 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSettings,
    pub crawl: CrawlSettings,
    pub search: SearchSettings,
    pub sites: Vec<SiteConfig>,
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crawl.workers == 0 {
            return Err(ConfigError::Invalid("crawl.workers must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.search.exclusion_ratio) {
            return Err(ConfigError::Invalid("search.exclusion_ratio must be within [0, 1]".into()));
        }
        for site in &self.sites {
            if !(site.url.starts_with("http://") || site.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("site url {} is not http(s)", site.url)));
            }
        }
        Ok(())
    }

    /// The configured site whose URL is the longest prefix of `url`.
    pub fn site_for_url(&self, url: &str) -> Option<&SiteConfig> {
        self.sites.iter().filter(|s| url.starts_with(&s.url)).max_by_key(|s| s.url.len())
    }
}
