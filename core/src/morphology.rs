//! Morphological analysis behind a fixed interface: a word goes in, its
//! candidate normal forms and coarse part-of-speech tags come out.

use lazy_static::lazy_static;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartOfSpeech {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Pronoun,
    Numeral,
    Particle,
    Interjection,
    Conjunction,
    Preposition,
    Unknown,
}

impl PartOfSpeech {
    /// Function words carry no meaning of their own and are never indexed.
    pub fn is_function_word(self) -> bool {
        matches!(
            self,
            PartOfSpeech::Particle
                | PartOfSpeech::Interjection
                | PartOfSpeech::Conjunction
                | PartOfSpeech::Preposition
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub normal_form: String,
    pub pos: PartOfSpeech,
}

impl Analysis {
    pub fn new(normal_form: impl Into<String>, pos: PartOfSpeech) -> Self {
        Self { normal_form: normal_form.into(), pos }
    }
}

pub trait Morphology: Send + Sync {
    /// All readings of an already normalized word. The first entry is the
    /// preferred dictionary form.
    fn analyze(&self, word: &str) -> Vec<Analysis>;
}

lazy_static! {
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::Russian);
    static ref FUNCTION_WORDS: HashMap<&'static str, PartOfSpeech> = {
        let table: &[(PartOfSpeech, &[&str])] = &[
            (PartOfSpeech::Preposition, &[
                "в","во","на","с","со","к","ко","по","о","об","обо","от","ото","до","из","изо","у",
                "за","над","надо","под","подо","про","для","без","безо","при","через","между","перед",
                "передо","около","вокруг","после","среди","вместо","кроме","ради","сквозь","возле",
                "против","мимо","вдоль","изза","изпод",
            ]),
            (PartOfSpeech::Conjunction, &[
                "и","а","но","или","либо","чтобы","если","хотя","зато","однако","тоже","также",
                "будто","словно","ибо","причем","притом","итак","иль","дабы","едва",
            ]),
            (PartOfSpeech::Particle, &[
                "не","ни","же","ли","бы","б","вот","вон","даже","лишь","ведь","разве","неужели",
                "пусть","пускай","ка","то","де","мол","дескать","именно","якобы","нибудь",
            ]),
            (PartOfSpeech::Interjection, &[
                "ах","ох","эх","ой","ай","увы","ура","ого","эй","ух","фу","ну","ага","угу","тьфу",
                "браво","ахти","алло","ишь",
            ]),
        ];
        let mut map = HashMap::new();
        for (pos, words) in table {
            for w in words.iter() {
                map.entry(*w).or_insert(*pos);
            }
        }
        map
    };
}

/// Russian snowball stemmer with a built-in function-word table. Produces a
/// single normal form per word.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnowballMorphology;

impl Morphology for SnowballMorphology {
    fn analyze(&self, word: &str) -> Vec<Analysis> {
        if word.is_empty() {
            return Vec::new();
        }
        if let Some(pos) = FUNCTION_WORDS.get(word) {
            return vec![Analysis::new(word, *pos)];
        }
        vec![Analysis::new(STEMMER.stem(word).into_owned(), PartOfSpeech::Unknown)]
    }
}

/// Explicit analyses for known words, falling back to another analyzer (or
/// to the word itself) for everything else.
#[derive(Clone, Default)]
pub struct DictionaryMorphology {
    entries: HashMap<String, Vec<Analysis>>,
    fallback: Option<Arc<dyn Morphology>>,
}

impl DictionaryMorphology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Morphology>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_word(mut self, word: &str, analyses: &[(&str, PartOfSpeech)]) -> Self {
        let list = analyses.iter().map(|(form, pos)| Analysis::new(*form, *pos)).collect();
        self.entries.insert(word.to_string(), list);
        self
    }
}

impl Morphology for DictionaryMorphology {
    fn analyze(&self, word: &str) -> Vec<Analysis> {
        if let Some(list) = self.entries.get(word) {
            return list.clone();
        }
        match &self.fallback {
            Some(inner) => inner.analyze(word),
            None if word.is_empty() => Vec::new(),
            None => vec![Analysis::new(word, PartOfSpeech::Unknown)],
        }
    }
}
