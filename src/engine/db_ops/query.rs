//! Text search over processed records. Read-only; safe to run while an ingest is writing.

use anyhow::{Context, Result};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use rayon::prelude::*;
use rusqlite::Connection;
use std::cmp::Ordering;
use std::path::PathBuf;

use crate::types::{SearchHit, SearchMode, SearchOpts};
use crate::utils::config::SNIPPET_CONTEXT_CHARS;

/// Search processed records. Empty query or no match gives an empty vec, never an error.
pub fn search(conn: &Connection, query: &str, opts: &SearchOpts) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let mut hits = match opts.mode {
        SearchMode::Exact => search_exact(conn, query)?,
        SearchMode::Fuzzy { threshold } => search_fuzzy(conn, query, threshold)?,
    };
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    if let Some(limit) = opts.limit {
        hits.truncate(limit);
    }
    Ok(hits)
}

/// Load (path, text) of every processed row.
fn processed_texts(conn: &Connection) -> Result<Vec<(PathBuf, String)>> {
    let mut stmt =
        conn.prepare("SELECT path, extracted_text FROM images WHERE status = 'processed'")?;
    let rows = stmt.query_map([], |row| {
        let path: String = row.get(0)?;
        let text: String = row.get(1)?;
        Ok((PathBuf::from(path), text))
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read processed records")
}

/// Case-insensitive substring (full Unicode lowercasing); score = number of occurrences.
///
/// Matching runs here rather than in SQL: SQLite's `LIKE` only folds ASCII case.
fn search_exact(conn: &Connection, query: &str) -> Result<Vec<SearchHit>> {
    let needle = query.to_lowercase();
    let hits = processed_texts(conn)?
        .into_par_iter()
        .filter_map(|(path, text)| {
            let haystack = text.to_lowercase();
            let count = haystack.matches(&needle).count();
            if count == 0 {
                return None;
            }
            // Lowercasing can change byte lengths; fall back to the start of the text then.
            let at = haystack
                .find(&needle)
                .filter(|&i| {
                    haystack.len() == text.len()
                        && text.is_char_boundary(i)
                        && text.is_char_boundary(i + needle.len())
                })
                .unwrap_or(0);
            let len = if at == 0 && !haystack.starts_with(&needle) {
                0
            } else {
                needle.len()
            };
            Some(SearchHit {
                path,
                snippet: make_snippet(&text, at, len),
                score: count as f64,
            })
        })
        .collect();
    Ok(hits)
}

/// Best per-line skim score, normalized by the query's self-match score.
fn search_fuzzy(conn: &Connection, query: &str, threshold: f64) -> Result<Vec<SearchHit>> {
    let records = processed_texts(conn)?;
    let hits = records
        .into_par_iter()
        .map_init(
            || SkimMatcherV2::default().ignore_case(),
            |matcher, (path, text)| {
                let perfect = matcher.fuzzy_match(query, query).unwrap_or(1).max(1) as f64;
                let best = text
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .filter_map(|line| matcher.fuzzy_match(line, query).map(|s| (s, line)))
                    .max_by_key(|(s, _)| *s)?;
                let score = (best.0 as f64 / perfect).clamp(0.0, 1.0);
                (score >= threshold).then(|| SearchHit {
                    path,
                    snippet: make_snippet(best.1, 0, best.1.len()),
                    score,
                })
            },
        )
        .flatten()
        .collect();
    Ok(hits)
}

/// Snippet around `text[at..at + len]` with [`SNIPPET_CONTEXT_CHARS`] of context on each side,
/// whitespace collapsed and `…` marking cut ends.
pub fn make_snippet(text: &str, at: usize, len: usize) -> String {
    let at = at.min(text.len());
    let end = (at + len).min(text.len());
    let before: Vec<char> = text[..at].chars().collect();
    let start_char = before.len().saturating_sub(SNIPPET_CONTEXT_CHARS);
    let head: String = before[start_char..].iter().collect();
    let tail: String = text[end..].chars().take(SNIPPET_CONTEXT_CHARS).collect();
    let cut_tail = text[end..].chars().count() > SNIPPET_CONTEXT_CHARS;

    let raw = format!("{head}{}{tail}", &text[at..end]);
    let mut snippet = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if start_char > 0 {
        snippet.insert(0, '…');
    }
    if cut_tail {
        snippet.push('…');
    }
    snippet
}
