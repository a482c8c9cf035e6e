//! # zimkit - ZIM Archive Engine
//!
//! zimkit reads and writes ZIM archives: self-contained binary containers
//! distributing large bodies of web-like content (articles, media,
//! metadata) for offline use. This implementation prioritizes:
//!
//! - **Bounded writer memory**: items stream into size-targeted clusters;
//!   only the clusters currently in flight are held in memory
//! - **Parallel compression, deterministic output**: a worker pool
//!   compresses clusters while a single writer thread preserves close
//!   order, so identical inputs produce byte-identical archives
//! - **Cheap random reads**: a memory-mapped reader with LRU caches over
//!   decoded dirents and decompressed clusters
//!
//! ## Quick Start
//!
//! ```ignore
//! use zimkit::writer::{Creator, StringItem};
//! use zimkit::Archive;
//!
//! let mut creator = Creator::new();
//! creator.start("wiki.zim")?;
//! creator.add_item(&StringItem::new("home", "text/html", "Home", "<html>...</html>"))?;
//! creator.finish()?;
//!
//! let archive = Archive::open("wiki.zim")?;
//! let entry = archive.entry_by_path(b'C', "home")?.unwrap();
//! let body = entry.item()?.data()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   Creator (producer thread)              │
//! │   dirents │ mimetypes │ open clusters    │
//! ├───────────┴───────────┴──────────────────┤
//! │   Worker pool          Writer thread     │
//! │   (compression)        (ordered output)  │
//! ├──────────────────────────────────────────┤
//! │   On-disk format                         │
//! │   header │ dirents │ tables │ clusters   │
//! ├──────────────────────────────────────────┤
//! │   Archive reader (mmap + LRU caches)     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A single archive file:
//!
//! ```text
//! wiki.zim
//! ├── header (80 bytes)        fixed, rewritten on close
//! ├── mimetype list            NUL-terminated strings
//! ├── clusters                 from byte 1024, compressed blob containers
//! ├── dirents                  one per entry, URL-ordered
//! ├── URL / title / cluster pointer tables
//! └── MD5 checksum             last 16 bytes
//! ```
//!
//! ## Module Overview
//!
//! - [`format`]: binary layout — header, dirent codec, framing helpers
//! - [`compression`]: cluster codecs (none, LZMA, Zstandard)
//! - [`writer`]: the creator pipeline, providers, dirent handlers
//! - [`reader`]: random access, entry lookups, caches
//! - [`suggestion`]: title-index suggestion search
//! - [`uuid`] / [`checksum`]: archive identity and integrity
//! - [`config`]: centralized tunables

pub mod checksum;
pub mod compression;
pub mod config;
pub mod error;
pub mod format;
pub mod reader;
pub mod suggestion;
pub mod uuid;
pub mod writer;

pub use compression::Compression;
pub use error::ZimError;
pub use reader::{Archive, Blob, Entry};
pub use suggestion::SuggestionSearcher;
pub use uuid::Uuid;
pub use writer::Creator;
