//! Suggestion ranking over archives built from title corpora.

use tempfile::TempDir;
use zimkit::writer::{Creator, StringItem};
use zimkit::{Archive, SuggestionSearcher};

fn archive_from_titles(dir: &TempDir, name: &str, titles: &[&str]) -> Archive {
    let path = dir.path().join(name);
    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    for title in titles {
        let item_path = format!("dummyPath{title}");
        creator
            .add_item(&StringItem::new(item_path, "text/plain", *title, ""))
            .unwrap();
    }
    creator.add_metadata("Title", "This is a title", "text/plain").unwrap();
    creator.finish().unwrap();
    Archive::open(&path).unwrap()
}

fn suggestions(archive: &Archive, query: &str, limit: usize) -> Vec<String> {
    SuggestionSearcher::new(archive.clone())
        .suggest(query, limit)
        .unwrap()
        .into_iter()
        .map(|entry| entry.title().to_owned())
        .collect()
}

#[test]
fn empty_query_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_from_titles(
        &dir,
        "empty-query.zim",
        &[
            "fooland",
            "berlin wall",
            "hotel berlin, berlin",
            "again berlin",
            "berlin",
            "not berlin",
        ],
    );

    let results = suggestions(&archive, "", archive.entry_count() as usize);
    assert!(results.is_empty());
}

#[test]
fn unmatched_query_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_from_titles(
        &dir,
        "no-result.zim",
        &["fooland", "berlin wall", "again berlin"],
    );

    let results = suggestions(&archive, "none", archive.entry_count() as usize);
    assert!(results.is_empty());
}

#[test]
fn single_term_order() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_from_titles(
        &dir,
        "single-term.zim",
        &[
            "fooland",
            "berlin wall",
            "hotel berlin, berlin",
            "again berlin",
            "berlin",
            "not berlin",
        ],
    );

    let results = suggestions(&archive, "berlin", archive.entry_count() as usize);
    assert_eq!(
        results,
        vec![
            "berlin",
            "hotel berlin, berlin",
            "again berlin",
            "berlin wall",
            "not berlin",
        ]
    );
}

#[test]
fn results_capped_at_limit() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_from_titles(
        &dir,
        "limit.zim",
        &["foobar b", "foobar a", "foobar c", "foobar e", "foobar d"],
    );

    let results = suggestions(&archive, "foobar", 2);
    assert_eq!(results, vec!["foobar a", "foobar b"]);
}

#[test]
fn phrase_matches_outrank_scattered_terms() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_from_titles(
        &dir,
        "phrase.zim",
        &[
            "Summer in Berlin",
            "In Summer",
            "Shivers in summer",
            "Summer in Paradise",
            "In mid Summer",
            "In the winter",
        ],
    );

    let results = suggestions(&archive, "summer in", archive.entry_count() as usize);
    assert_eq!(
        results,
        vec![
            "Summer in Berlin",
            "Summer in Paradise",
            "In Summer",
            "In mid Summer",
            "Shivers in summer",
        ]
    );
}

#[test]
fn final_term_matches_word_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_from_titles(
        &dir,
        "prefix.zim",
        &["Wolf", "Hour of the wolf", "The winter", "workshop"],
    );

    let results = suggestions(&archive, "wol", archive.entry_count() as usize);
    assert_eq!(results, vec!["Hour of the wolf", "Wolf"]);
}

#[test]
fn query_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_from_titles(
        &dir,
        "case.zim",
        &["berlin wall", "again berlin", "berlin"],
    );

    assert_eq!(
        suggestions(&archive, "BERLIN", 10),
        suggestions(&archive, "berlin", 10)
    );
}

#[test]
fn redirect_titles_are_suggestible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("redirects.zim");
    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator
        .add_item(&StringItem::new("real", "text/plain", "The Real Page", ""))
        .unwrap();
    creator
        .add_redirection("nickname", "Nickname Page", "real")
        .unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    let results = suggestions(&archive, "nickname", 10);
    assert_eq!(results, vec!["Nickname Page"]);
}
