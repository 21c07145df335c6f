//! Pure derivation of the `recents` and `results` views.

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;

use crate::attributes::AttributeCache;
use crate::cancel::CancellationToken;
use crate::filter::FilterChain;
use crate::indexer::IndexSnapshot;
use crate::query::{search, ParsedQuery};
use crate::sort::{sort, SortField, SortState};
use crate::types::{EntryKind, IndexEntry, ScoredResult};

/// The user-controlled inputs of a result computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryState {
    pub query: String,
    pub sort: SortState,
    pub filters: FilterChain,
    pub suspended: bool,
}

impl QueryState {
    pub fn effective_query(&self) -> String {
        self.filters.effective_query(&self.query)
    }

    pub fn parsed_query(&self) -> ParsedQuery {
        ParsedQuery::parse(&self.effective_query())
    }

    /// Nothing to match and nothing narrowing the candidates: results are the
    /// recents.
    pub fn is_recents_mode(&self) -> bool {
        self.parsed_query().is_empty() && !self.filters.restricts_scope()
    }
}

/// Most recently modified first, then most recently inserted, then path.
fn compare_recent(left: &IndexEntry, right: &IndexEntry) -> Ordering {
    right
        .modified
        .cmp(&left.modified)
        .then_with(|| right.seq.cmp(&left.seq))
        .then_with(|| left.path.cmp(&right.path))
}

fn is_openable(entry: &IndexEntry) -> bool {
    matches!(entry.kind, EntryKind::File | EntryKind::Package)
}

fn most_recent<'a, I>(entries: I, limit: usize) -> Vec<ScoredResult>
where
    I: Iterator<Item = &'a Arc<IndexEntry>>,
{
    let mut entries: Vec<&Arc<IndexEntry>> = entries.filter(|entry| is_openable(entry)).collect();
    entries.par_sort_unstable_by(|left, right| compare_recent(left, right));
    entries
        .into_iter()
        .take(limit)
        .map(|entry| ScoredResult::unscored(entry.clone()))
        .collect()
}

/// Files and packages of `snapshot`, most recent first.
pub fn compute_recents(snapshot: &IndexSnapshot, max_recents: usize) -> Vec<ScoredResult> {
    most_recent(snapshot.entries(), max_recents)
}

/// Inputs shared by every result computation.
#[derive(Debug, Clone, Copy)]
pub struct ViewLimits {
    pub max_results: usize,
}

/// Derives the ordered result list. `None` if cancelled.
///
/// Size and date orderings request attributes (starting background fetches
/// for external paths); other orderings only attach what is already cached.
pub fn compute_results(
    snapshot: &IndexSnapshot,
    recents: &[ScoredResult],
    state: &QueryState,
    cache: &AttributeCache,
    limits: ViewLimits,
    cancel: &CancellationToken,
) -> Option<Vec<ScoredResult>> {
    let parsed = state.parsed_query();
    let mut results = if state.is_recents_mode() {
        recents.to_vec()
    } else if parsed.is_empty() {
        let candidates = state.filters.candidates(snapshot);
        cancel.is_cancelled()?;
        most_recent(candidates.iter(), limits.max_results)
    } else {
        let candidates = state.filters.candidates(snapshot);
        cancel.is_cancelled()?;
        search(
            &candidates,
            &parsed,
            snapshot.newest_modified(),
            limits.max_results,
            cancel,
        )?
    };

    let fetch = state.sort.field.needs_attributes();
    for (index, result) in results.iter_mut().enumerate() {
        cancel.is_cancelled_sparse(index)?;
        result.attributes = if fetch {
            Some(cache.request(result.path(), result.entry.kind, false))
        } else {
            cache.peek(result.path())
        };
    }

    // Unscored lists already come in recency order.
    let keep_recency = parsed.is_empty() && state.sort.field == SortField::Score && state.sort.reverse;
    if !keep_recency {
        sort(&mut results, state.sort);
    }
    cancel.is_cancelled()?;
    Some(results)
}
