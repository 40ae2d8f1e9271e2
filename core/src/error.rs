use thiserror::Error;

use crate::model::SiteId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("site {0} not found")]
    SiteNotFound(SiteId),
    #[error("page {path} already stored for site {site_id}")]
    DuplicatePage { site_id: SiteId, path: String },
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("site {0} is already registered")]
    DuplicateSite(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search query is empty")]
    InvalidQuery,
    #[error("the requested sites have not been fully indexed")]
    SitesNotIndexed,
    #[error("no indexed site matches {0}")]
    SiteNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
