//! Deterministic result ordering.
//!
//! `reverse = false` is ascending on the primary key for every field, so the
//! descending defaults of score, size and date are expressed as
//! `reverse = true`. Ties always fall back to name then path ascending, which
//! makes every ordering total.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::query::compare_ranked;
use crate::types::ScoredResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Score,
    Kind,
    Name,
    Path,
    Size,
    Date,
}

impl SortField {
    pub fn default_reverse(self) -> bool {
        matches!(self, Self::Score | Self::Size | Self::Date)
    }

    /// Whether ordering by this field needs fetched attributes.
    pub fn needs_attributes(self) -> bool {
        matches!(self, Self::Size | Self::Date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub field: SortField,
    pub reverse: bool,
}

impl Default for SortState {
    fn default() -> Self {
        Self::new(SortField::Score)
    }
}

impl SortState {
    pub fn new(field: SortField) -> Self {
        Self {
            field,
            reverse: field.default_reverse(),
        }
    }

    /// Header click: the active field flips direction, a new field starts at
    /// its default direction.
    pub fn select(&mut self, field: SortField) {
        if self.field == field {
            self.reverse = !self.reverse;
        } else {
            *self = Self::new(field);
        }
    }
}

fn extension_key(path: &Path) -> String {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn primary(field: SortField, left: &ScoredResult, right: &ScoredResult) -> Ordering {
    match field {
        SortField::Score => left.score.cmp(&right.score),
        SortField::Kind => left
            .entry
            .kind
            .cmp(&right.entry.kind)
            .then_with(|| extension_key(left.path()).cmp(&extension_key(right.path()))),
        SortField::Name => left.entry.match_key.cmp(&right.entry.match_key),
        SortField::Path => left.entry.parent.cmp(&right.entry.parent),
        SortField::Size => left.size().cmp(&right.size()),
        SortField::Date => left.modified().cmp(&right.modified()),
    }
}

/// Orders two results under `state`.
pub fn compare(state: SortState, left: &ScoredResult, right: &ScoredResult) -> Ordering {
    if state.field == SortField::Score && state.reverse {
        return compare_ranked(left, right);
    }
    let ordering = primary(state.field, left, right);
    let ordering = if state.reverse {
        ordering.reverse()
    } else {
        ordering
    };
    ordering
        .then_with(|| left.entry.name.cmp(&right.entry.name))
        .then_with(|| left.entry.path.cmp(&right.entry.path))
}

/// Sorts `results` in place. Pure in its inputs: sizes and dates come from the
/// attributes already attached to each result.
pub fn sort(results: &mut [ScoredResult], state: SortState) {
    results.sort_by(|left, right| compare(state, left, right));
}
