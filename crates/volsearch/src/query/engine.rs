//! Candidate scoring and ranking.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::path::Component;
use std::sync::Arc;

use memchr::memmem;
use rayon::prelude::*;

use super::fuzzy::{fold, fuzzy_match, score_positions};
use super::term::{ParsedQuery, QueryTerm, TermKind};
use crate::cancel::CancellationToken;
use crate::types::{IndexEntry, MatchInfo, ScoredResult};

const SECONDS_PER_DAY: u64 = 86_400;
/// Path bytes per point of length penalty.
const PATH_LENGTH_DIVISOR: usize = 8;
const MAX_PATH_LENGTH_PENALTY: i64 = 32;

/// Recency bonus by age relative to the newest entry in the snapshot.
pub fn recency_bonus(modified: Option<u64>, newest: Option<u64>) -> i64 {
    let (Some(modified), Some(newest)) = (modified, newest) else {
        return 0;
    };
    match newest.saturating_sub(modified) {
        age if age <= SECONDS_PER_DAY => 32,
        age if age <= 7 * SECONDS_PER_DAY => 16,
        age if age <= 30 * SECONDS_PER_DAY => 8,
        _ => 0,
    }
}

pub fn path_length_penalty(entry: &IndexEntry) -> i64 {
    ((entry.path.as_os_str().len() / PATH_LENGTH_DIVISOR) as i64).min(MAX_PATH_LENGTH_PENALTY)
}

/// Total order for ranked results: score descending, then name, then path.
pub fn compare_ranked(left: &ScoredResult, right: &ScoredResult) -> Ordering {
    right
        .score
        .cmp(&left.score)
        .then_with(|| left.entry.name.cmp(&right.entry.name))
        .then_with(|| left.entry.path.cmp(&right.entry.path))
}

/// Scores one entry. `None` when any term rejects it.
pub fn score_entry(
    entry: &IndexEntry,
    query: &ParsedQuery,
    newest_modified: Option<u64>,
) -> Option<(i64, MatchInfo)> {
    let key = entry.match_key.as_bytes();
    for term in query.terms.iter().filter(|term| term.negated) {
        if memmem::find(key, term.text.as_bytes()).is_some() {
            return None;
        }
    }

    let mut score = 0;
    let mut info = MatchInfo::default();
    let mut ancestors: Option<Vec<Cow<'_, str>>> = None;

    for term in query.positive_terms() {
        let (term_score, positions) = match_name(entry, term)?;
        score += term_score;
        info.positions.extend(positions);

        if !term.folders.is_empty() {
            let ancestors = ancestors.get_or_insert_with(|| ancestor_names(entry));
            let (folder_score, matched) = match_folders(&term.folders, ancestors)?;
            score += folder_score;
            info.matched_segments += matched;
        }
    }

    info.positions.sort_unstable();
    info.positions.dedup();
    score -= path_length_penalty(entry);
    score += recency_bonus(entry.modified, newest_modified);
    Some((score, info))
}

fn match_name(entry: &IndexEntry, term: &QueryTerm) -> Option<(i64, Vec<usize>)> {
    if term.kind == TermKind::Fuzzy {
        let matched = fuzzy_match(&term.text, &entry.name)?;
        return Some((matched.score, matched.positions));
    }

    let key = entry.match_key.as_str();
    let accepted = match term.kind {
        TermKind::Substring => memmem::find(key.as_bytes(), term.text.as_bytes()).is_some(),
        TermKind::Prefix => key.starts_with(term.text.as_str()),
        TermKind::Suffix => key.ends_with(term.text.as_str()),
        TermKind::Whole => key == term.text,
        TermKind::Fuzzy => false,
    };
    if !accepted {
        return None;
    }

    let original: Vec<char> = entry.name.chars().collect();
    let folded: Vec<char> = original.iter().copied().map(fold).collect();
    let needle: Vec<char> = term.text.chars().collect();
    let start = match term.kind {
        TermKind::Suffix => folded.len().saturating_sub(needle.len()),
        TermKind::Prefix | TermKind::Whole => 0,
        _ => folded
            .windows(needle.len().max(1))
            .position(|window| window == needle.as_slice())
            .unwrap_or(0),
    };
    let end = (start + needle.len()).min(original.len());
    let positions: Vec<usize> = (start..end).collect();
    Some((score_positions(&original, &positions), positions))
}

fn ancestor_names(entry: &IndexEntry) -> Vec<Cow<'_, str>> {
    entry
        .parent
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect()
}

/// Matches each folder segment against a distinct ancestor, in order.
fn match_folders(folders: &[String], ancestors: &[Cow<'_, str>]) -> Option<(i64, usize)> {
    let mut score = 0;
    let mut next = 0;
    for folder in folders {
        let (offset, matched) = ancestors[next..]
            .iter()
            .enumerate()
            .find_map(|(offset, name)| fuzzy_match(folder, name).map(|m| (offset, m)))?;
        score += matched.score / 2;
        next += offset + 1;
    }
    Some((score, folders.len()))
}

/// Scores `candidates` in parallel and returns the best `max_results`,
/// ranked by [`compare_ranked`]. `None` if cancelled.
pub fn search(
    candidates: &[Arc<IndexEntry>],
    query: &ParsedQuery,
    newest_modified: Option<u64>,
    max_results: usize,
    cancel: &CancellationToken,
) -> Option<Vec<ScoredResult>> {
    let scored: Vec<Option<ScoredResult>> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, entry)| {
            cancel.is_cancelled_sparse(index)?;
            Some(
                score_entry(entry, query, newest_modified).map(|(score, matched)| ScoredResult {
                    entry: entry.clone(),
                    score,
                    matched,
                    attributes: None,
                }),
            )
        })
        .collect::<Option<Vec<_>>>()?;
    cancel.is_cancelled()?;

    let mut results: Vec<ScoredResult> = scored.into_iter().flatten().collect();
    results.par_sort_unstable_by(compare_ranked);
    results.truncate(max_results);
    Some(results)
}
