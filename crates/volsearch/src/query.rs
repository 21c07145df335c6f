//! Query parsing and fuzzy ranking.
//!
//! - Term syntax and operators (`term`)
//! - Subsequence matching and per-character scoring (`fuzzy`)
//! - Parallel candidate scoring with a total tie-break (`engine`)

mod engine;
mod fuzzy;
mod term;

pub use engine::{
    compare_ranked, path_length_penalty, recency_bonus, score_entry, search,
};
pub use fuzzy::{
    fold, fold_str, fuzzy_match, FuzzyMatch, BONUS_BOUNDARY, BONUS_CONTIGUOUS, BONUS_START, PENALTY_GAP,
    SCORE_MATCH,
};
pub use term::{ParsedQuery, QueryTerm, TermKind};
