//! Highlighted excerpts: the page's best contiguous alignment with the query,
//! padded with surrounding words up to a character budget.

use std::ops::Range;

use crate::lemma::{equivalent, split_words, LemmaEntry, LemmaExtractor};

#[derive(Clone)]
pub struct SnippetBuilder {
    extractor: LemmaExtractor,
    budget: usize,
}

impl SnippetBuilder {
    pub fn new(extractor: LemmaExtractor, budget: usize) -> Self {
        Self { extractor, budget }
    }

    /// `None` when no page word is equivalent to any query word.
    pub fn build(&self, query: &str, text: &str) -> Option<String> {
        let query_entries = self.extractor.lemma_entries(query);
        let page_entries = self.extractor.lemma_entries(text);
        let run = longest_common_run(&query_entries, &page_entries)?;
        let start = page_entries[run.start].position;
        let end = page_entries[run.end - 1].position + 1;
        let words: Vec<&str> = split_words(text).collect();
        Some(highlight(&words, start..end, self.budget))
    }
}

/// Longest run of consecutive query entries matching consecutive page
/// entries under lemma equivalence, as a range into `page`. Among runs of
/// equal length the last one found wins.
pub fn longest_common_run(query: &[LemmaEntry], page: &[LemmaEntry]) -> Option<Range<usize>> {
    let mut current = vec![0usize; page.len()];
    let mut best_len = 0;
    let mut best_end = 0;
    for q in query {
        let mut diagonal = 0;
        for (j, p) in page.iter().enumerate() {
            let above = current[j];
            if equivalent(q, p) {
                current[j] = diagonal + 1;
                if current[j] >= best_len {
                    best_len = current[j];
                    best_end = j;
                }
            } else {
                current[j] = 0;
            }
            diagonal = above;
        }
    }
    (best_len > 0).then(|| best_end + 1 - best_len..best_end + 1)
}

/// Grows a window around `matched` one word left, then one word right, until
/// the context reaches `budget` characters or covers the whole text.
pub fn highlight(words: &[&str], matched: Range<usize>, budget: usize) -> String {
    let (mut left, mut right) = (matched.start, matched.end);
    let mut length = 0;
    while length < budget && !(left == 0 && right >= words.len()) {
        if left > 0 {
            left -= 1;
            length += words[left].chars().count() + 1;
        }
        if right < words.len() {
            length += words[right].chars().count() + 1;
            right += 1;
        }
    }

    let mut parts: Vec<String> = Vec::with_capacity(right - left + 2);
    parts.extend(words[left..matched.start].iter().map(|w| w.to_string()));
    parts.push(format!("<b>{}</b>", words[matched.clone()].join(" ")));
    parts.extend(words[matched.end..right].iter().map(|w| w.to_string()));
    parts.join(" ")
}
