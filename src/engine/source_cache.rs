//! Source file cache
//!
//! Lazily materialized line arrays, keyed by filesystem path or by DAP
//! source reference. Line 1 lives at index 0. Entries survive until
//! `flush`, which the engine calls on session close.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::common::Result;

#[derive(Default)]
pub struct SourceFileCache {
    by_path: HashMap<PathBuf, Vec<String>>,
    by_reference: HashMap<i64, Vec<String>>,
}

impl SourceFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines of the file at `path`, read from disk on first use
    ///
    /// A read failure yields a single opaque error line; display logic
    /// treats it as content.
    pub fn get_by_path(&mut self, path: &Path) -> &[String] {
        if !self.by_path.contains_key(path) {
            let lines = match std::fs::read_to_string(path) {
                Ok(text) => split_lines(&text),
                Err(e) => vec![format!("<unable to read {}: {}>", path.display(), e)],
            };
            self.by_path.insert(path.to_path_buf(), lines);
        }
        self.by_path
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Lines of the source behind a DAP source reference
    ///
    /// On first use the caller-supplied `fetch` retrieves the full text;
    /// a fetch failure yields a single opaque error line.
    pub async fn get_by_reference<F, Fut>(&mut self, reference: i64, fetch: F) -> &[String]
    where
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if !self.by_reference.contains_key(&reference) {
            let lines = match fetch(reference).await {
                Ok(text) => split_lines(&text),
                Err(e) => vec![format!(
                    "<unable to load source reference {}: {}>",
                    reference, e
                )],
            };
            self.by_reference.insert(reference, lines);
        }
        self.by_reference
            .get(&reference)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Drop every cached entry
    pub fn flush(&mut self) {
        self.by_path.clear();
        self.by_reference.clear();
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Look up a 1-based line in a cached line array
pub fn line_at(lines: &[String], line: u32) -> Option<&str> {
    if line == 0 {
        return None;
    }
    lines.get(line as usize - 1).map(String::as_str)
}
