//! End-to-end creator/reader scenarios over real temp files.

use std::path::PathBuf;

use zimkit::format::{read_u64_le, Fileheader, NS_INTERNAL};
use zimkit::writer::{Creator, ItemHints, StringItem};
use zimkit::{Archive, Compression, Uuid, ZimError};

fn fixed_uuid() -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[15] = 1;
    Uuid::from_bytes(bytes)
}

fn zim_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn text_item(path: &str, title: &str, body: &str) -> StringItem {
    StringItem::new(path, "text/plain", title, body)
}

#[test]
fn empty_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "empty.zim");

    let mut creator = Creator::new();
    creator
        .config_compression(Compression::Zstd)
        .set_uuid(fixed_uuid());
    creator.start(&path).unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.entry_count(), 0);
    assert_eq!(archive.cluster_count(), 0);
    assert_eq!(archive.uuid(), fixed_uuid());
    assert!(!archive.has_main_entry());
    archive.verify_checksum().unwrap();

    let reopened = Archive::open(&path).unwrap();
    assert_eq!(reopened.entry_count(), 0);
}

#[test]
fn single_item() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "single.zim");

    let mut creator = Creator::new();
    creator.set_uuid(fixed_uuid());
    creator.start(&path).unwrap();
    creator
        .add_item(&text_item("A/hello", "Hello", "hi"))
        .unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.entry_count(), 1);
    assert_eq!(archive.cluster_count(), 1);
    assert!(!archive.has_main_entry());

    let entry = archive.entry_by_path(b'C', "A/hello").unwrap().unwrap();
    assert_eq!(entry.title(), "Hello");
    let item = entry.item().unwrap();
    assert_eq!(item.data().unwrap().as_bytes(), b"hi");
    assert_eq!(item.mimetype().unwrap(), "text/plain");
    assert_eq!(item.size().unwrap(), 2);

    let by_title = archive.entry_by_title_index(0).unwrap();
    assert_eq!(by_title.path(), "A/hello");

    assert!(archive.entry_by_path(b'C', "A/other").unwrap().is_none());
    archive.verify_checksum().unwrap();
}

#[test]
fn redirect_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "redirect.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator
        .add_item(&text_item("target", "Target", "target body"))
        .unwrap();
    creator.add_redirection("alias", "Alias", "target").unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.entry_count(), 2);

    let alias = archive.entry_by_path(b'C', "alias").unwrap().unwrap();
    assert!(alias.is_redirect());

    let target = archive.entry_by_path(b'C', "target").unwrap().unwrap();
    assert_eq!(alias.redirect_index(), Some(target.index()));

    let followed = alias.redirect_entry().unwrap();
    assert_eq!(followed.path(), "target");
    assert_eq!(
        followed.item().unwrap().data().unwrap().as_bytes(),
        b"target body"
    );
}

#[test]
fn broken_redirect_is_dropped() {
    let dir = tempfile::tempdir().unwrap();

    let baseline_path = zim_path(&dir, "baseline.zim");
    let mut baseline = Creator::new();
    baseline.start(&baseline_path).unwrap();
    baseline
        .add_item(&text_item("present", "Present", "body"))
        .unwrap();
    baseline.finish().unwrap();
    let baseline_count = Archive::open(&baseline_path).unwrap().entry_count();

    let path = zim_path(&dir, "broken.zim");
    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator
        .add_item(&text_item("present", "Present", "body"))
        .unwrap();
    creator.add_redirection("x", "X", "missing").unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(archive.entry_by_path(b'C', "x").unwrap().is_none());
    assert_eq!(archive.entry_count(), baseline_count);
}

#[test]
fn large_content_splits_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "split.zim");

    let mut creator = Creator::new();
    creator.config_min_cluster_size(1).set_uuid(fixed_uuid());
    creator.start(&path).unwrap();

    let bodies: Vec<String> = (0..10)
        .map(|i| {
            let mut body = String::new();
            while body.len() < 300 {
                body.push_str(&format!("payload {i} "));
            }
            body.truncate(300);
            body
        })
        .collect();

    for (i, body) in bodies.iter().enumerate() {
        creator
            .add_item(&text_item(&format!("item{i:02}"), &format!("Item {i}"), body))
            .unwrap();
    }
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(
        archive.cluster_count() >= 3,
        "expected at least 3 clusters, got {}",
        archive.cluster_count()
    );

    // Cluster pointer table is strictly monotonic.
    let raw = std::fs::read(&path).unwrap();
    let header = Fileheader::from_bytes(&raw).unwrap();
    let mut previous = 0u64;
    for i in 0..header.cluster_count() {
        let offset =
            read_u64_le(&raw, header.cluster_ptr_pos() as usize + 8 * i as usize).unwrap();
        assert!(offset > previous, "cluster {} not monotonic", i);
        previous = offset;
    }

    for (i, body) in bodies.iter().enumerate() {
        let entry = archive
            .entry_by_path(b'C', &format!("item{i:02}"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.item().unwrap().data().unwrap().as_bytes(), body.as_bytes());
    }
}

#[test]
fn parallel_creation_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();

    let build = |name: &str| {
        let path = zim_path(&dir, name);
        let mut creator = Creator::new();
        creator
            .config_compression(Compression::Zstd)
            .config_nb_workers(1)
            .config_min_cluster_size(1)
            .set_uuid(fixed_uuid());
        creator.start(&path).unwrap();
        for i in 0..20 {
            creator
                .add_item(&text_item(
                    &format!("article/{i:03}"),
                    &format!("Article {i}"),
                    &format!("content of article number {i}").repeat(10),
                ))
                .unwrap();
        }
        creator.add_redirection("start", "Start", "article/000").unwrap();
        creator.finish().unwrap();
        std::fs::read(&path).unwrap()
    };

    let first = build("one.zim");
    let second = build("two.zim");
    assert_eq!(first, second, "archives differ between runs");
}

#[test]
fn mixed_compression_classes() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "mixed.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator
        .add_item(&text_item("article", "Article", "wordy text content"))
        .unwrap();
    creator
        .add_item(&StringItem::new(
            "logo",
            "image/png",
            "Logo",
            vec![0x89u8, b'P', b'N', b'G', 1, 2, 3],
        ))
        .unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    // One compressed cluster for the text, one uncompressed for the image.
    assert_eq!(archive.cluster_count(), 2);

    let logo = archive.entry_by_path(b'C', "logo").unwrap().unwrap();
    assert_eq!(
        logo.item().unwrap().data().unwrap().as_bytes(),
        &[0x89u8, b'P', b'N', b'G', 1, 2, 3]
    );
    let article = archive.entry_by_path(b'C', "article").unwrap().unwrap();
    assert_eq!(
        article.item().unwrap().data().unwrap().as_bytes(),
        b"wordy text content"
    );
}

#[test]
fn compress_hint_overrides_mimetype() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "hint.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator
        .add_item(
            &StringItem::new("raw", "text/plain", "Raw", "do not compress me").with_hints(
                ItemHints {
                    compress: Some(false),
                },
            ),
        )
        .unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.cluster_count(), 1);
    let entry = archive.entry_by_path(b'C', "raw").unwrap().unwrap();
    assert_eq!(
        entry.item().unwrap().data().unwrap().as_bytes(),
        b"do not compress me"
    );
}

#[test]
fn lzma_archive_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "lzma.zim");

    let mut creator = Creator::new();
    creator.config_compression(Compression::Lzma);
    creator.start(&path).unwrap();
    creator
        .add_item(&text_item("doc", "Doc", &"lzma compressed body ".repeat(100)))
        .unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    let entry = archive.entry_by_path(b'C', "doc").unwrap().unwrap();
    assert_eq!(
        entry.item().unwrap().data().unwrap().as_bytes(),
        "lzma compressed body ".repeat(100).as_bytes()
    );
}

#[test]
fn metadata_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "meta.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator
        .add_metadata("Title", "My Test Archive", "text/plain")
        .unwrap();
    creator
        .add_metadata("Counter", "text/html:5;image/png:2", "text/plain")
        .unwrap();
    creator
        .add_item(&text_item("content", "Content", "x"))
        .unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(
        archive.get_metadata("Title").unwrap().unwrap(),
        b"My Test Archive"
    );
    assert!(archive.get_metadata("Missing").unwrap().is_none());

    let keys = archive.metadata_keys().unwrap();
    assert_eq!(keys, vec!["Counter".to_owned(), "Title".to_owned()]);

    let counter = archive.metadata_values_map("Counter").unwrap().unwrap();
    assert_eq!(
        counter,
        vec![
            ("text/html".to_owned(), "5".to_owned()),
            ("image/png".to_owned(), "2".to_owned()),
        ]
    );
}

#[test]
fn main_page_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "main.zim");

    let mut creator = Creator::new();
    creator.set_main_path("home");
    creator.start(&path).unwrap();
    creator.add_item(&text_item("home", "Home", "welcome")).unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(archive.has_main_entry());

    let main = archive.main_entry().unwrap().unwrap();
    assert_eq!(main.namespace(), NS_INTERNAL);
    assert_eq!(main.path(), "mainPage");
    assert!(main.is_redirect());

    let home = main.redirect_entry().unwrap();
    assert_eq!(home.path(), "home");
    assert_eq!(home.item().unwrap().data().unwrap().as_bytes(), b"welcome");
}

#[test]
fn broken_main_page_is_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "nomain.zim");

    let mut creator = Creator::new();
    creator.set_main_path("missing");
    creator.start(&path).unwrap();
    creator.add_item(&text_item("page", "Page", "body")).unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(!archive.has_main_entry());
    assert!(archive.main_entry().unwrap().is_none());
    assert!(archive
        .entry_by_path(NS_INTERNAL, "mainPage")
        .unwrap()
        .is_none());
}

#[test]
fn url_and_title_order_invariants() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "order.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    for (path_name, title) in [
        ("zebra", "Aardvark"),
        ("apple", "Zucchini"),
        ("mango", "Mango"),
        ("banana", "Kiwi"),
    ] {
        creator.add_item(&text_item(path_name, title, "")).unwrap();
    }
    creator.add_metadata("Name", "ordering", "text/plain").unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();

    let mut previous: Option<(u8, String)> = None;
    for entry in archive.iter_by_path() {
        let entry = entry.unwrap();
        let key = (entry.namespace(), entry.path().to_owned());
        if let Some(prev) = &previous {
            assert!(*prev < key, "URL order violated: {:?} before {:?}", prev, key);
        }
        previous = Some(key);
    }

    let mut seen = Vec::new();
    let mut previous_title: Option<(u8, String, String)> = None;
    for entry in archive.iter_by_title() {
        let entry = entry.unwrap();
        seen.push(entry.index());
        let key = (
            entry.namespace(),
            entry.title().to_owned(),
            entry.path().to_owned(),
        );
        if let Some(prev) = &previous_title {
            assert!(*prev <= key, "title order violated");
        }
        previous_title = Some(key);
    }

    // The title index is a permutation of all entry indexes.
    seen.sort_unstable();
    assert_eq!(seen, (0..archive.entry_count()).collect::<Vec<_>>());
}

#[test]
fn mimetype_list_is_sorted_and_renumbered() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "mimes.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator
        .add_item(&StringItem::new("a", "text/plain", "A", "one"))
        .unwrap();
    creator
        .add_item(&StringItem::new("b", "application/json", "B", "{}"))
        .unwrap();
    creator
        .add_item(&StringItem::new("c", "image/png", "C", vec![1u8, 2]))
        .unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();

    let mut sorted = archive.mime_types().to_vec();
    sorted.sort();
    assert_eq!(archive.mime_types(), sorted.as_slice());

    for (path_name, mime) in [
        ("a", "text/plain"),
        ("b", "application/json"),
        ("c", "image/png"),
    ] {
        let entry = archive.entry_by_path(b'C', path_name).unwrap().unwrap();
        assert_eq!(entry.item().unwrap().mimetype().unwrap(), mime);
    }
}

#[test]
fn duplicate_item_beats_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "dupes.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator.add_redirection("page", "Old", "other").unwrap();
    creator.add_item(&text_item("page", "New", "real body")).unwrap();
    creator.add_item(&text_item("other", "Other", "x")).unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    let entry = archive.entry_by_path(b'C', "page").unwrap().unwrap();
    assert!(!entry.is_redirect());
    assert_eq!(entry.item().unwrap().data().unwrap().as_bytes(), b"real body");
}

#[test]
fn add_item_after_finish_is_creator_errored() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "done.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator.finish().unwrap();

    let err = creator.add_item(&text_item("late", "Late", "x")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ZimError>(),
        Some(ZimError::CreatorErrored)
    ));
}

#[test]
fn checksum_detects_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "corrupt.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator.add_item(&text_item("page", "Page", "body bytes")).unwrap();
    creator.finish().unwrap();

    Archive::open(&path).unwrap().verify_checksum().unwrap();

    // Flip one byte inside the cluster region.
    let mut raw = std::fs::read(&path).unwrap();
    raw[1028] ^= 0xFF;
    std::fs::write(&path, &raw).unwrap();

    let archive = Archive::open(&path).unwrap();
    let err = archive.verify_checksum().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ZimError>(),
        Some(ZimError::ChecksumMismatch { .. })
    ));
}

#[test]
fn classic_archives_are_not_extended() {
    let dir = tempfile::tempdir().unwrap();
    let path = zim_path(&dir, "classic.zim");

    let mut creator = Creator::new();
    creator.start(&path).unwrap();
    creator.add_item(&text_item("page", "Page", "small")).unwrap();
    creator.finish().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(!archive.is_extended());
}
