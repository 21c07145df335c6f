//! Fuzzy subsequence matching and per-character scoring.
//!
//! Positions are indices into the candidate's `chars()`. Several alignments
//! are considered (every contiguous occurrence, the leftmost greedy alignment
//! and its tightened variant) and the best scoring one wins; ties keep the
//! earlier candidate so results are reproducible.

pub const SCORE_MATCH: i64 = 16;
pub const BONUS_CONTIGUOUS: i64 = 24;
pub const BONUS_START: i64 = 48;
pub const BONUS_BOUNDARY: i64 = 24;
pub const PENALTY_GAP: i64 = 1;
/// Cap on the penalty of a single gap.
const MAX_GAP_PENALTY: i64 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyMatch {
    pub score: i64,
    pub positions: Vec<usize>,
}

/// Case folding used by every matcher.
pub fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// [`fold`] applied to every character, so folded strings keep one char per
/// source char.
pub fn fold_str(text: &str) -> String {
    text.chars().map(fold).collect()
}

fn is_boundary(previous: char, current: char) -> bool {
    !previous.is_alphanumeric()
        || (previous.is_lowercase() && current.is_uppercase())
        || (previous.is_alphabetic() && current.is_numeric())
}

/// Scores an alignment against the original (unfolded) candidate characters.
pub fn score_positions(candidate: &[char], positions: &[usize]) -> i64 {
    let mut score = 0;
    let mut previous: Option<usize> = None;
    for &position in positions {
        score += SCORE_MATCH;
        match previous {
            Some(prev) if position == prev + 1 => score += BONUS_CONTIGUOUS,
            Some(prev) => {
                let gap = (position - prev - 1) as i64;
                score -= gap.min(MAX_GAP_PENALTY) * PENALTY_GAP;
            }
            None => {}
        }
        if position == 0 {
            score += BONUS_START;
        } else if is_boundary(candidate[position - 1], candidate[position]) {
            score += BONUS_BOUNDARY;
        }
        previous = Some(position);
    }
    score
}

/// Matches the lowercased `needle` as a subsequence of `candidate`.
pub fn fuzzy_match(needle: &str, candidate: &str) -> Option<FuzzyMatch> {
    let pattern: Vec<char> = needle.chars().map(fold).collect();
    let original: Vec<char> = candidate.chars().collect();
    let folded: Vec<char> = original.iter().copied().map(fold).collect();

    if pattern.is_empty() {
        return Some(FuzzyMatch {
            score: 0,
            positions: Vec::new(),
        });
    }
    if pattern.len() > folded.len() {
        return None;
    }

    let forward = forward_alignment(&pattern, &folded)?;
    let tightened = tighten(&pattern, &folded, forward[forward.len() - 1]);

    let mut best: Option<FuzzyMatch> = None;
    let alignments = contiguous_alignments(&pattern, &folded)
        .into_iter()
        .chain([forward, tightened]);
    for positions in alignments {
        let score = score_positions(&original, &positions);
        if best.as_ref().map_or(true, |current| score > current.score) {
            best = Some(FuzzyMatch { score, positions });
        }
    }
    best
}

/// Leftmost greedy alignment.
fn forward_alignment(pattern: &[char], folded: &[char]) -> Option<Vec<usize>> {
    let mut positions = Vec::with_capacity(pattern.len());
    let mut next = 0;
    for &wanted in pattern {
        let offset = folded[next..].iter().position(|&c| c == wanted)?;
        positions.push(next + offset);
        next += offset + 1;
    }
    Some(positions)
}

/// Walks back from `end` so the alignment starts as late as possible.
fn tighten(pattern: &[char], folded: &[char], end: usize) -> Vec<usize> {
    let mut positions = vec![0; pattern.len()];
    let mut cursor = end + 1;
    for (slot, &wanted) in pattern.iter().enumerate().rev() {
        while cursor > 0 {
            cursor -= 1;
            if folded[cursor] == wanted {
                positions[slot] = cursor;
                break;
            }
        }
    }
    positions
}

fn contiguous_alignments(pattern: &[char], folded: &[char]) -> Vec<Vec<usize>> {
    folded
        .windows(pattern.len())
        .enumerate()
        .filter(|(_, window)| *window == pattern)
        .map(|(start, _)| (start..start + pattern.len()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsequence_required() {
        assert!(fuzzy_match("doc", "doc.txt").is_some());
        assert!(fuzzy_match("doc", "my_document.pdf").is_some());
        assert!(fuzzy_match("doc", "draft.txt").is_none());
        assert!(fuzzy_match("toolong", "short").is_none());
    }

    #[test]
    fn matching_ignores_case() {
        let matched = fuzzy_match("readme", "ReadMe.md").unwrap();
        assert_eq!(matched.positions, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn contiguous_prefix_outscores_scattered() {
        let prefix = fuzzy_match("doc", "doc.txt").unwrap();
        let scattered = fuzzy_match("doc", "dxoxc.txt").unwrap();
        let inner = fuzzy_match("doc", "xdocx.txt").unwrap();
        assert!(prefix.score > inner.score);
        assert!(inner.score > scattered.score);
    }

    #[test]
    fn prefers_boundary_occurrence() {
        let matched = fuzzy_match("rep", "prep_report.pdf").unwrap();
        assert_eq!(matched.positions, vec![5, 6, 7]);
    }

    #[test]
    fn tightened_alignment_beats_greedy_spread() {
        // Greedy takes a(0) b(2) c(6); the tight alignment is a(4) b(5) c(6).
        let matched = fuzzy_match("abc", "axbxabc").unwrap();
        assert_eq!(matched.positions, vec![4, 5, 6]);
    }

    #[test]
    fn camel_case_counts_as_boundary() {
        let camel = fuzzy_match("b", "fooBar").unwrap();
        let flat = fuzzy_match("b", "foobar").unwrap();
        assert_eq!(camel.score - flat.score, BONUS_BOUNDARY);
    }

    #[test]
    fn gap_penalty_is_capped() {
        let text = format!("a{}b", "x".repeat(18));
        let chars: Vec<char> = text.chars().collect();
        let score = score_positions(&chars, &[0, 19]);
        assert_eq!(
            score,
            2 * SCORE_MATCH + BONUS_START - MAX_GAP_PENALTY * PENALTY_GAP
        );
    }
}
