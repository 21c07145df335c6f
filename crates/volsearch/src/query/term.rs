//! Query term parsing.
//!
//! Whitespace separates terms and every term must match. Operators:
//!
//! | Syntax   | Meaning                              |
//! |----------|--------------------------------------|
//! | `doc`    | fuzzy subsequence of the name        |
//! | `'doc`   | name contains `doc`                  |
//! | `^doc`   | name starts with `doc`               |
//! | `doc$`   | name ends with `doc`                 |
//! | `^doc$`  | name is exactly `doc`                |
//! | `!doc`   | name does not contain `doc`          |
//! | `a/doc`  | `doc` fuzzy on the name, `a` fuzzy on an ancestor folder |
//!
//! All matching is case-insensitive.

use super::fuzzy::fold_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Fuzzy,
    Substring,
    Prefix,
    Suffix,
    Whole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub kind: TermKind,
    pub negated: bool,
    /// Case-folded text matched against the name.
    pub text: String,
    /// Case-folded ancestor folder segments, outermost first. Fuzzy terms only.
    pub folders: Vec<String>,
}

impl QueryTerm {
    pub fn parse(token: &str) -> Option<Self> {
        let (negated, token) = match token.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, token),
        };

        let (kind, body) = if let Some(rest) = token.strip_prefix('\'') {
            (TermKind::Substring, rest)
        } else {
            let (prefix, rest) = match token.strip_prefix('^') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            let (suffix, rest) = match rest.strip_suffix('$') {
                Some(rest) if !rest.is_empty() || prefix => (true, rest),
                _ => (false, rest),
            };
            let kind = match (prefix, suffix) {
                (true, true) => TermKind::Whole,
                (true, false) => TermKind::Prefix,
                (false, true) => TermKind::Suffix,
                (false, false) => TermKind::Fuzzy,
            };
            (kind, rest)
        };

        let body = fold_str(body);
        // Negation is a plain substring exclusion.
        let kind = if negated { TermKind::Substring } else { kind };

        let (folders, text) = if kind == TermKind::Fuzzy && body.contains('/') {
            let mut segments: Vec<String> = body
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect();
            let text = segments.pop()?;
            (segments, text)
        } else {
            (Vec::new(), body)
        };

        if text.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            negated,
            text,
            folders,
        })
    }
}

/// A parsed query: the conjunction of its terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub terms: Vec<QueryTerm>,
}

impl ParsedQuery {
    pub fn parse(raw: &str) -> Self {
        Self {
            terms: raw.split_whitespace().filter_map(QueryTerm::parse).collect(),
        }
    }

    /// An empty query selects recents instead of matching.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms that contribute to the score.
    pub fn positive_terms(&self) -> impl Iterator<Item = &QueryTerm> {
        self.terms.iter().filter(|term| !term.negated)
    }
}
