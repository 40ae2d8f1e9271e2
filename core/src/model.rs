use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type SiteId = u64;
pub type PageId = u64;
pub type LemmaId = u64;
pub type IndexId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Indexing => "INDEXING",
            SiteStatus::Indexed => "INDEXED",
            SiteStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub status_time: OffsetDateTime,
    pub last_error: Option<String>,
}

impl Site {
    /// Whether `url` falls under this site by plain string prefix.
    pub fn owns(&self, url: &str) -> bool {
        url.starts_with(&self.url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    /// Site-relative URL path, unique per site.
    pub path: String,
    pub code: u16,
    /// Raw HTML as fetched.
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lemma {
    pub id: LemmaId,
    pub site_id: SiteId,
    pub text: String,
    /// Number of distinct pages of the site containing the lemma.
    pub frequency: u32,
}

/// Inverted-index edge: occurrence count of one lemma on one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: IndexId,
    pub page_id: PageId,
    pub lemma_id: LemmaId,
    pub rank: f32,
}
