pub mod config;
pub mod error;
pub mod html;
pub mod lemma;
pub mod model;
pub mod morphology;
pub mod search;
pub mod snippet;
pub mod stats;
pub mod store;

pub use config::{AppConfig, CrawlSettings, SearchSettings, SiteConfig};
pub use error::{ConfigError, SearchError, StoreError};
pub use lemma::{LemmaEntry, LemmaExtractor};
pub use model::{IndexEntry, Lemma, LemmaId, Page, PageId, Site, SiteId, SiteStatus};
pub use morphology::{Analysis, DictionaryMorphology, Morphology, PartOfSpeech, SnowballMorphology};
pub use search::{SearchEngine, SearchHit, SearchResults};
pub use store::IndexStore;
