//! Fuzzy matching over [`SearchRecord`]s.
//!
//! A substring hit always outranks a subsequence hit. Subsequence hits are
//! scored by how contiguous the matched characters are.

use crate::index::SearchRecord;

pub const DEFAULT_LIMIT: usize = 30;

const SUBSTRING_BASE: u32 = 1000;
const STREAK_BONUS: u32 = 5;

/// Scores `needle` against `haystack`. Both are expected lowercase.
pub fn score(haystack: &str, needle: &str) -> Option<u32> {
    if needle.is_empty() {
        return Some(1);
    }
    if haystack.is_empty() {
        return None;
    }

    if let Some(byte_index) = haystack.find(needle) {
        let index = haystack[..byte_index].chars().count() as u32;
        return Some(SUBSTRING_BASE.saturating_sub(index.saturating_mul(2)));
    }

    let hay: Vec<char> = haystack.chars().collect();
    let mut cursor = 0;
    let mut previous: Option<usize> = None;
    let mut streak = 0;
    let mut total = 0;

    for ch in needle.chars() {
        let found = cursor + hay[cursor..].iter().position(|&c| c == ch)?;
        total += 1;
        if previous.is_some_and(|p| found == p + 1) {
            streak += 1;
            total += STREAK_BONUS + streak;
        } else {
            streak = 0;
        }
        previous = Some(found);
        cursor = found + 1;
    }

    Some(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit<'a> {
    /// Position of `record` in the searched slice.
    pub index: usize,
    pub record: &'a SearchRecord,
    pub score: u32,
}

/// Ranks records for `query`. A blank query returns the first `limit`
/// records unscored.
pub fn search<'a>(records: &'a [SearchRecord], query: &str, limit: usize) -> Vec<SearchHit<'a>> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records
            .iter()
            .take(limit)
            .enumerate()
            .map(|(index, record)| SearchHit {
                index,
                record,
                score: 1,
            })
            .collect();
    }

    let mut hits: Vec<SearchHit<'a>> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            score(&record.search_blob, &needle).map(|score| SearchHit {
                index,
                record,
                score,
            })
        })
        .collect();
    // Stable, so ties keep index order
    hits.sort_by(|x, y| y.score.cmp(&x.score));
    hits.truncate(limit);
    hits
}
