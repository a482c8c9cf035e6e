//! # Title Suggestions
//!
//! Suggestion search over the title index. This is the engine behind
//! type-ahead lookups when no external full-text backend is plugged in: it
//! scans content entries in title order and ranks the matches with a
//! deterministic scheme.
//!
//! ## Matching
//!
//! Queries and titles are tokenized on non-alphanumeric boundaries and
//! compared case-insensitively. A title matches when every query term
//! occurs as a whole word, except the final term which may match a word
//! prefix (the query is usually still being typed).
//!
//! ## Ranking
//!
//! 1. an exact title match ranks first;
//! 2. then by the number of occurrences of the full query phrase in the
//!    title, descending;
//! 3. ties keep title order (namespace, title, path).
//!
//! For the query `"berlin"` over titles `["berlin wall", "hotel berlin,
//! berlin", "again berlin", "berlin", "not berlin"]` this yields
//! `berlin`, `hotel berlin, berlin` (two occurrences), then the remaining
//! one-occurrence titles in title order.

use eyre::Result;

use crate::format::NS_CONTENT;
use crate::reader::{Archive, Entry};

pub struct SuggestionSearcher {
    archive: Archive,
}

impl SuggestionSearcher {
    pub fn new(archive: Archive) -> Self {
        Self { archive }
    }

    /// Returns up to `limit` content entries matching `query`, best first.
    pub fn suggest(&self, query: &str, limit: usize) -> Result<Vec<Entry>> {
        let terms = tokenize(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(Score, Entry)> = Vec::new();
        for entry in self.archive.iter_by_title() {
            let entry = entry?;
            if entry.namespace() != NS_CONTENT {
                continue;
            }
            let words = tokenize(entry.title());
            if let Some(score) = score(&terms, &words) {
                scored.push((score, entry));
            }
        }

        // Stable sort: ties keep title order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, entry)| entry).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    exact: bool,
    phrase_count: u32,
}

fn score(terms: &[String], words: &[String]) -> Option<Score> {
    let (prefix_term, whole_terms) = terms.split_last().expect("terms not empty");

    let whole_matches = whole_terms
        .iter()
        .all(|term| words.iter().any(|w| w == term));
    let prefix_matches = words.iter().any(|w| w.starts_with(prefix_term.as_str()));
    if !whole_matches || !prefix_matches {
        return None;
    }

    let phrase_count = words
        .windows(terms.len())
        .filter(|window| {
            let (last, init) = window.split_last().expect("window not empty");
            init == whole_terms && last.starts_with(prefix_term.as_str())
        })
        .count() as u32;

    Some(Score {
        exact: words == terms,
        phrase_count,
    })
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(tokenize("Hotel Berlin, berlin"), s(&["hotel", "berlin", "berlin"]));
        assert_eq!(tokenize("  "), Vec::<String>::new());
    }

    #[test]
    fn exact_match_outranks_frequency() {
        let terms = s(&["berlin"]);
        let exact = score(&terms, &s(&["berlin"])).unwrap();
        let frequent = score(&terms, &s(&["hotel", "berlin", "berlin"])).unwrap();
        assert!(exact > frequent);
    }

    #[test]
    fn phrase_count_breaks_ties() {
        let terms = s(&["berlin"]);
        let twice = score(&terms, &s(&["hotel", "berlin", "berlin"])).unwrap();
        let once = score(&terms, &s(&["berlin", "wall"])).unwrap();
        assert!(twice > once);
        assert_eq!(twice.phrase_count, 2);
        assert_eq!(once.phrase_count, 1);
    }

    #[test]
    fn final_term_matches_by_prefix() {
        let terms = s(&["wo"]);
        assert!(score(&terms, &s(&["wolf"])).is_some());
        assert!(score(&terms, &s(&["the", "wolf", "of", "wall", "street"])).is_some());
        assert!(score(&terms, &s(&["winter"])).is_none());
    }

    #[test]
    fn non_final_terms_need_whole_words() {
        let terms = s(&["summer", "in"]);
        // "summers" does not satisfy the whole-word term "summer".
        assert!(score(&terms, &s(&["summers", "in", "paradise"])).is_none());
        let hit = score(&terms, &s(&["summer", "in", "paradise"])).unwrap();
        assert_eq!(hit.phrase_count, 1);
        // Both terms present but not adjacent: matches with phrase count 0.
        let loose = score(&terms, &s(&["in", "mid", "summer"])).unwrap();
        assert_eq!(loose.phrase_count, 0);
        assert!(hit > loose);
    }
}
