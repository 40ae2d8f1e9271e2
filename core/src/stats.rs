use serde::Serialize;

use crate::error::StoreError;
use crate::model::SiteStatus;
use crate::store::IndexStore;

#[derive(Debug, Clone, Serialize)]
pub struct TotalStatistics {
    pub sites: usize,
    pub pages: usize,
    pub lemmas: usize,
    pub indexing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatistics {
    pub url: String,
    pub name: String,
    pub status: &'static str,
    /// Epoch milliseconds.
    pub status_time: i64,
    pub error: Option<String>,
    pub pages: usize,
    pub lemmas: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total: TotalStatistics,
    pub detailed: Vec<SiteStatistics>,
}

pub fn statistics(store: &IndexStore) -> Result<Statistics, StoreError> {
    let mut detailed = Vec::new();
    for site in store.sites()? {
        detailed.push(SiteStatistics {
            pages: store.count_pages(site.id)?,
            lemmas: store.count_lemmas(site.id)?,
            status: site.status.as_str(),
            status_time: (site.status_time.unix_timestamp_nanos() / 1_000_000) as i64,
            url: site.url,
            name: site.name,
            error: site.last_error,
        });
    }
    let total = TotalStatistics {
        sites: detailed.len(),
        pages: detailed.iter().map(|d| d.pages).sum(),
        lemmas: detailed.iter().map(|d| d.lemmas).sum(),
        indexing: detailed.iter().any(|d| d.status == SiteStatus::Indexing.as_str()),
    };
    Ok(Statistics { total, detailed })
}
