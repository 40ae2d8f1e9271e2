use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

use crate::morphology::{Analysis, Morphology, SnowballMorphology};

lazy_static! {
    static ref OUTSIDE_ALPHABET: Regex = Regex::new(r"[^а-яё]").expect("valid regex");
}

/// NFKC, lowercase, then drop every character outside the Cyrillic alphabet.
/// An empty result means the token is not a word.
pub fn normalize(word: &str) -> String {
    let lowered = word.nfkc().collect::<String>().to_lowercase();
    OUTSIDE_ALPHABET.replace_all(&lowered, "").into_owned()
}

/// Whitespace tokenization shared by indexing, matching and snippet layout, so
/// that entry positions index directly into the page's word list.
pub fn split_words(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

/// A word of a text kept for matching, with every candidate normal form.
#[derive(Debug, Clone)]
pub struct LemmaEntry {
    pub word: String,
    pub normalized: String,
    pub forms: Vec<String>,
    pub position: usize,
}

/// Tolerant equality used for alignment: same normalized surface word, or at
/// least one shared candidate normal form. Not transitive, so never use it as
/// a container key.
pub fn equivalent(a: &LemmaEntry, b: &LemmaEntry) -> bool {
    a.normalized == b.normalized || a.forms.iter().any(|f| b.forms.contains(f))
}

#[derive(Clone)]
pub struct LemmaExtractor {
    morphology: Arc<dyn Morphology>,
}

impl Default for LemmaExtractor {
    fn default() -> Self {
        Self::new(Arc::new(SnowballMorphology))
    }
}

impl LemmaExtractor {
    pub fn new(morphology: Arc<dyn Morphology>) -> Self {
        Self { morphology }
    }

    /// Lemma -> occurrence count over the whole text, using each word's
    /// preferred normal form.
    pub fn lemma_counts(&self, text: &str) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        for raw in split_words(text) {
            let Some((_, analyses)) = self.analyze_token(raw) else { continue };
            let Some(first) = analyses.first() else { continue };
            if first.normal_form.is_empty() {
                continue;
            }
            *counts.entry(first.normal_form.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Ordered matching entries; `position` is the index of the word in
    /// `split_words(text)`.
    pub fn lemma_entries(&self, text: &str) -> Vec<LemmaEntry> {
        let mut entries = Vec::new();
        for (position, raw) in split_words(text).enumerate() {
            let Some((normalized, analyses)) = self.analyze_token(raw) else { continue };
            let mut forms: Vec<String> = Vec::with_capacity(analyses.len());
            for a in analyses {
                if !a.normal_form.is_empty() && !forms.contains(&a.normal_form) {
                    forms.push(a.normal_form);
                }
            }
            entries.push(LemmaEntry { word: raw.to_string(), normalized, forms, position });
        }
        entries
    }

    fn analyze_token(&self, raw: &str) -> Option<(String, Vec<Analysis>)> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        let analyses = self.morphology.analyze(&normalized);
        if !analyses.is_empty() && analyses.iter().all(|a| a.pos.is_function_word()) {
            return None;
        }
        Some((normalized, analyses))
    }
}
