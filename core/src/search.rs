use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::ops::Range;
use std::sync::Arc;

use crate::config::SearchSettings;
use crate::error::{SearchError, StoreError};
use crate::html::{extract_title, strip_to_plain_text};
use crate::lemma::LemmaExtractor;
use crate::model::{Lemma, PageId, Site, SiteStatus};
use crate::snippet::SnippetBuilder;
use crate::store::IndexStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site: String,
    pub site_name: String,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    /// Total number of matching pages before pagination.
    pub count: usize,
    pub data: Vec<SearchHit>,
}

pub struct SearchEngine {
    store: Arc<IndexStore>,
    extractor: LemmaExtractor,
    snippets: SnippetBuilder,
    settings: SearchSettings,
}

struct Scored {
    site: usize,
    page: PageId,
    relevance: f64,
}

impl SearchEngine {
    pub fn new(store: Arc<IndexStore>, extractor: LemmaExtractor, settings: SearchSettings) -> Self {
        let snippets = SnippetBuilder::new(extractor.clone(), settings.snippet_chars);
        Self { store, extractor, snippets, settings }
    }

    pub fn search(
        &self,
        query: &str,
        site: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<SearchResults, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery);
        }
        let sites = self.target_sites(site)?;
        let urls: Vec<&str> = sites.iter().map(|s| s.url.as_str()).collect();
        tracing::info!(query, sites = ?urls, offset, limit, "search started");
        if sites.iter().any(|s| s.status != SiteStatus::Indexed) {
            return Err(SearchError::SitesNotIndexed);
        }

        let mut lemmas: Vec<String> = self.extractor.lemma_counts(query).into_keys().collect();
        lemmas.sort();

        let mut scored: Vec<Scored> = Vec::new();
        for (idx, s) in sites.iter().enumerate() {
            for (page, relevance) in self.rank_site(s, &lemmas)? {
                scored.push(Scored { site: idx, page, relevance });
            }
        }
        let max = scored.iter().map(|s| s.relevance).fold(0.0_f64, f64::max);
        if scored.is_empty() || max <= 0.0 {
            return Ok(SearchResults { count: 0, data: Vec::new() });
        }
        for s in scored.iter_mut() {
            s.relevance /= max;
        }
        scored.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
        tracing::info!(pages = scored.len(), "pages ranked");

        let window = paginate(scored.len(), offset, limit);
        let mut data = Vec::with_capacity(window.len());
        for s in &scored[window] {
            let Some(page) = self.store.page(s.page)? else { continue };
            let site = &sites[s.site];
            let text = strip_to_plain_text(&page.content);
            data.push(SearchHit {
                site: site.url.clone(),
                site_name: site.name.clone(),
                uri: page.path.clone(),
                title: extract_title(&page.content),
                snippet: self.snippets.build(query, &text).unwrap_or_default(),
                relevance: s.relevance as f32,
            });
        }
        Ok(SearchResults { count: scored.len(), data })
    }

    fn target_sites(&self, filter: Option<&str>) -> Result<Vec<Site>, SearchError> {
        match filter.map(str::trim).filter(|f| !f.is_empty()) {
            None => Ok(self.store.sites()?),
            Some(url) => match self.store.site_for_url(url)? {
                Some(site) => Ok(vec![site]),
                None => Err(SearchError::SiteNotFound(url.to_string())),
            },
        }
    }

    /// Frequency at or above which a lemma is ignored for a site of
    /// `total_pages` pages; `None` when the site is too small to tell.
    pub fn exclusion_threshold(&self, total_pages: usize) -> Option<u64> {
        if total_pages < self.settings.exclusion_min_pages {
            return None;
        }
        Some((self.settings.exclusion_ratio * total_pages as f64).round() as u64)
    }

    /// Absolute relevance of every page of `site` containing all of the
    /// site's usable query lemmas.
    pub fn rank_site(&self, site: &Site, lemmas: &[String]) -> Result<Vec<(PageId, f64)>, StoreError> {
        let threshold = self.exclusion_threshold(self.store.count_pages(site.id)?);
        let mut kept: Vec<Lemma> = Vec::new();
        for text in lemmas {
            let Some(lemma) = self.store.find_lemma(site.id, text)? else { continue };
            if threshold.map_or(true, |t| u64::from(lemma.frequency) < t) {
                kept.push(lemma);
            }
        }
        kept.sort_by_key(|l| l.frequency);

        let Some((rarest, rest)) = kept.split_first() else {
            return Ok(Vec::new());
        };
        let mut pages: BTreeSet<PageId> = self.store.pages_with_lemma(rarest.id)?.into_iter().collect();
        for lemma in rest {
            let with: HashSet<PageId> = self.store.pages_with_lemma(lemma.id)?.into_iter().collect();
            pages.retain(|p| with.contains(p));
            if pages.is_empty() {
                return Ok(Vec::new());
            }
        }

        let mut out = Vec::with_capacity(pages.len());
        for page in pages {
            let mut relevance = 0.0;
            for lemma in &kept {
                if let Some(entry) = self.store.index_entry(page, lemma.id)? {
                    relevance += f64::from(entry.rank);
                }
            }
            out.push((page, relevance));
        }
        Ok(out)
    }
}

/// Clamped `[offset, offset + limit)` window over `len` results.
pub fn paginate(len: usize, offset: usize, limit: usize) -> Range<usize> {
    let from = offset.min(len);
    let to = from.saturating_add(limit).min(len);
    from..to
}
