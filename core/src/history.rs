use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Append-only log of served results, one `[term1 term2]: url` line each.
#[derive(Debug, Clone)]
pub struct QueryLog {
    path: PathBuf,
}

impl QueryLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn append(&self, terms: &[String], urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let joined = terms.join(" ");
        let mut buf = String::new();
        for url in urls {
            buf.push_str(&format!("[{joined}]: {url}\n"));
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening query log {}", self.path.display()))?;
        f.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// The `n` most recent distinct term-sets, oldest first. A missing log
    /// is an empty history.
    pub fn recent(&self, n: usize) -> Result<Vec<Vec<String>>> {
        let f = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("opening query log {}", self.path.display())),
        };
        let mut term_sets: Vec<String> = Vec::new();
        for line in BufReader::new(f).lines() {
            let line = line?;
            if let Some((terms, _url)) = parse_line(&line) {
                term_sets.push(terms.to_string());
            }
        }

        let mut recent: Vec<String> = Vec::new();
        for terms in term_sets.into_iter().rev() {
            if recent.len() == n {
                break;
            }
            if !recent.contains(&terms) {
                recent.push(terms);
            }
        }
        recent.reverse();
        Ok(recent.into_iter().map(|t| t.split_whitespace().map(str::to_string).collect()).collect())
    }
}

/// Split `[terms]: url`. Lines in any other shape are ignored.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    line.strip_prefix('[')?.split_once("]: ")
}
