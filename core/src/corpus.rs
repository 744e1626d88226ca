use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::index::DocId;

/// Extensions whose body column points at an extracted-text artifact.
pub const FILE_LINK_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".xls", ".xlsx"];

/// Extensions previewed through the text extractor instead of the stored body.
pub const PREVIEW_FILE_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".xls", ".xlsx", ".txt"];

/// One crawled resource. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_id: DocId,
    pub title: String,
    pub url: String,
    pub anchor_texts: String,
    /// Inline page text, or a path to extracted text for file links.
    pub body: String,
    pub links: Vec<String>,
}

impl Document {
    pub fn is_file_link(&self) -> bool { is_file_link(&self.url) }
}

/// What the index stores per document for result rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMeta {
    pub title: String,
    pub url: String,
    /// Relative path to the stored body text, e.g. texts/{doc_id}.txt
    pub text_path: Option<String>,
    /// Extracted-text artifact for file links.
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CorpusRow {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    anchor_texts: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    links: LinkField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinkField {
    Joined(String),
    List(Vec<String>),
}

impl Default for LinkField {
    fn default() -> Self { LinkField::List(Vec::new()) }
}

impl LinkField {
    fn into_vec(self) -> Vec<String> {
        match self {
            LinkField::Joined(s) => split_links(&s),
            LinkField::List(v) => v.into_iter().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect(),
        }
    }
}

/// Outbound links are stored `;`-separated in the crawl output.
pub fn split_links(joined: &str) -> Vec<String> {
    joined.split(';').map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

pub fn is_file_link(url: &str) -> bool {
    let lower = url.to_lowercase();
    FILE_LINK_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_preview_file(url: &str) -> bool {
    let lower = url.to_lowercase();
    PREVIEW_FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Read JSONL corpus files in the given order. Doc ids are 1-based line
/// positions across all files, so a malformed row is skipped without
/// shifting the ids of the rows after it.
pub fn load_corpus(files: &[PathBuf]) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    let mut line_no: DocId = 0;
    for file in files {
        let f = File::open(file).with_context(|| format!("opening corpus {}", file.display()))?;
        for line in BufReader::new(f).lines() {
            let line = line.with_context(|| format!("reading corpus {}", file.display()))?;
            if line.trim().is_empty() { continue; }
            line_no += 1;
            match serde_json::from_str::<CorpusRow>(&line) {
                Ok(row) => docs.push(Document {
                    doc_id: line_no,
                    title: row.title,
                    url: row.url.trim().to_string(),
                    anchor_texts: row.anchor_texts,
                    body: row.body,
                    links: row.links.into_vec(),
                }),
                Err(e) => tracing::warn!(file = %file.display(), line = line_no, error = %e, "skipping malformed corpus row"),
            }
        }
    }
    if docs.is_empty() && line_no > 0 {
        bail!("no readable rows in corpus ({line_no} lines)");
    }
    Ok(docs)
}

/// Which parts of a document feed the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentScope {
    /// Title, URL, anchors and body (or extracted file text).
    #[default]
    Full,
    /// Title and URL only.
    Title,
    /// File resources only: URL and extracted text.
    Files,
}

impl ContentScope {
    pub const ALL: [ContentScope; 3] = [ContentScope::Full, ContentScope::Title, ContentScope::Files];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentScope::Full => "full",
            ContentScope::Title => "title",
            ContentScope::Files => "files",
        }
    }

    /// The token stream source for `doc`, or `None` when the scope ignores it.
    pub fn compose(&self, doc: &Document, extractor: &dyn TextExtractor) -> Result<Option<String>> {
        match self {
            ContentScope::Full if doc.is_file_link() => {
                let text = extractor.extract(Path::new(&doc.body))?;
                Ok(Some(format!("{} {}", doc.url, text)))
            }
            ContentScope::Full => Ok(Some(format!("{} {} {} {}", doc.title, doc.url, doc.anchor_texts, doc.body))),
            ContentScope::Title => Ok(Some(format!("{} {}", doc.title, doc.url))),
            ContentScope::Files if doc.is_file_link() => {
                let text = extractor.extract(Path::new(&doc.body))?;
                Ok(Some(format!("{} {}", doc.url, text)))
            }
            ContentScope::Files => Ok(None),
        }
    }
}

impl fmt::Display for ContentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ContentScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" | "general" => Ok(ContentScope::Full),
            "title" => Ok(ContentScope::Title),
            "files" | "file" => Ok(ContentScope::Files),
            other => bail!("unknown scope '{other}' (expected full, title or files)"),
        }
    }
}

/// Plain-text extraction for non-HTML resources. Binary formats are handled
/// upstream; the index only ever sees the produced text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Reads the artifact as UTF-8 text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("extracting text from {}", path.display()))
    }
}
