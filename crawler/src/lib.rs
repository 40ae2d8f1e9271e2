pub mod fetch;
pub mod pipeline;

pub use fetch::{FetchError, FetchedPage, Fetcher, HttpFetcher};
pub use pipeline::{IndexingError, IndexingRun, IndexingService, StopFlag, STOPPED_BY_USER};
