use anyhow::{Context, Result};
use jieba_rs::Jieba;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

use crate::config::EngineConfig;

lazy_static! {
    // A Han run, handed on to the word segmenter, or a letter/digit word.
    static ref RE: Regex = Regex::new(
        r"(?u)\p{Han}+|[\p{L}\p{N}&&\P{Han}][\p{L}\p{N}_'&&\P{Han}]*"
    ).expect("valid regex");

    // Dictionary load is the expensive part; shared by every tokenizer.
    static ref JIEBA: Jieba = Jieba::new();
    static ref HAN: Regex = Regex::new(r"^\p{Han}$").expect("valid regex");
}

const DEFAULT_STOPWORDS: &[&str] = &[
    "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
    "be","because","been","before","being","below","between","both","but","by",
    "can","can't","cannot","could","couldn't",
    "did","didn't","do","does","doesn't","doing","don't","down","during",
    "each","few","for","from","further",
    "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
    "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
    "let's","me","more","most","mustn't","my","myself",
    "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
    "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
    "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
    "under","until","up","very",
    "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
    "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves",
    "的","了","和","是","在","也","就","都","而","及","与","或","一个","没有","我们","你们","他们",
];

/// Text → ordered `(term, position)` tokens. Position is the token's ordinal
/// in the stream before stopword removal.
pub trait Tokenize: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<(String, usize)>;
}

/// Regex tokenizer with NFKC normalization, lowercasing, stopword removal
/// and optional English stemming. Immutable once built.
pub struct Tokenizer {
    stopwords: HashSet<String>,
    stemmer: Option<Stemmer>,
}

impl Default for Tokenizer {
    fn default() -> Self { Self::new() }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            stopwords: DEFAULT_STOPWORDS.iter().map(|w| w.to_string()).collect(),
            stemmer: None,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let mut tok = Self::new().with_stemming(cfg.stemming);
        for file in &cfg.stopword_files {
            tok = tok.with_stopword_file(file)?;
        }
        Ok(tok)
    }

    pub fn with_stemming(mut self, on: bool) -> Self {
        self.stemmer = on.then(|| Stemmer::create(Algorithm::English));
        self
    }

    pub fn with_stopwords<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for w in words {
            let w = normalize(w.as_ref());
            if !w.is_empty() {
                self.stopwords.insert(w);
            }
        }
        self
    }

    pub fn with_stopword_file(self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading stopwords {}", path.display()))?;
        let before = self.stopwords.len();
        let tok = self.with_stopwords(raw.lines().map(str::trim));
        tracing::debug!(file = %path.display(), added = tok.stopwords.len() - before, "loaded stopwords");
        Ok(tok)
    }

    pub fn is_stopword(&self, token: &str) -> bool { self.stopwords.contains(token) }

    /// Trimmed and stemmed form of one already-segmented word, or `None`
    /// for stopwords and punctuation.
    fn term(&self, word: &str) -> Option<String> {
        let token = word.trim_matches('\'');
        if token.is_empty() || self.is_stopword(token) {
            return None;
        }
        Some(match &self.stemmer {
            Some(s) => s.stem(token).to_string(),
            None => token.to_string(),
        })
    }

    /// Index terms a user-typed query word stands for. Wildcard words keep
    /// their `*`/`?` and skip segmentation and stemming; surrounding
    /// punctuation is dropped either way.
    pub fn query_terms(&self, raw: &str) -> Vec<String> {
        let normalized = normalize(raw.trim());
        if normalized.contains(['*', '?']) {
            let trimmed = normalized
                .trim_matches(|c: char| !(c.is_alphanumeric() || c == '*' || c == '?'))
                .to_string();
            return if trimmed.is_empty() { Vec::new() } else { vec![trimmed] };
        }
        self.tokenize(&normalized).into_iter().map(|(t, _)| t).collect()
    }
}

impl Tokenize for Tokenizer {
    fn tokenize(&self, text: &str) -> Vec<(String, usize)> {
        let normalized = normalize(text);
        let mut tokens = Vec::new();
        let mut pos = 0usize;
        for mat in RE.find_iter(&normalized) {
            let run = mat.as_str();
            // Han runs are segmented into dictionary words.
            let words = if run.chars().next().is_some_and(is_han) { JIEBA.cut(run, true) } else { vec![run] };
            for word in words {
                if let Some(term) = self.term(word) {
                    tokens.push((term, pos));
                }
                pos += 1;
            }
        }
        tokens
    }
}

fn is_han(c: char) -> bool {
    HAN.is_match(c.encode_utf8(&mut [0u8; 4]))
}

/// NFKC + lowercase. Applied to documents and to query terms alike, so
/// wildcard characters survive untouched.
pub fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}
