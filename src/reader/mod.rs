//! # Archive Reader
//!
//! Random access to a finished archive. The file is memory-mapped once and
//! every lookup works over absolute offsets recorded in the header, so
//! opening an archive costs one header parse plus the mimetype list.
//!
//! ## Lookup Paths
//!
//! - **By entry index**: index the URL pointer table, decode the dirent at
//!   the recorded offset (through the dirent cache).
//! - **By path**: binary search over the URL pointer table; every probe is
//!   a cached dirent decode.
//! - **By title index**: the title table maps a title-ordered position to
//!   an entry index.
//! - **Item data**: follow the dirent's cluster pointer, fetch the cluster
//!   through the cluster cache, slice the blob out of the decompressed
//!   body.
//!
//! ## Caches
//!
//! Two independent LRU caches, each behind its own mutex:
//!
//! - dirent cache: entry index → decoded [`Dirent`];
//! - cluster cache: cluster index → [`Cluster`] (decompressed on first blob
//!   access, shared by concurrent readers).
//!
//! ## Thread Safety
//!
//! `Archive` is a cheap `Arc` handle; clones share the mapping and both
//! caches, and every public method takes `&self`. Any number of threads may
//! read concurrently.

mod cache;
mod cluster;

pub use cache::LruCache;
pub use cluster::{Blob, Cluster};

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::checksum::{hex, md5_bytes};
use crate::config::{CLUSTER_CACHE_CAPACITY, DIRENT_CACHE_CAPACITY};
use crate::error::ZimError;
use crate::format::{
    read_cstr, read_u32_le, read_u64_le, Dirent, DirentKind, Fileheader, ENTRY_INDEX_NONE,
    NS_METADATA,
};
use crate::uuid::Uuid;

#[derive(Clone)]
pub struct Archive {
    inner: Arc<ArchiveInner>,
}

pub(crate) struct ArchiveInner {
    mmap: Arc<Mmap>,
    header: Fileheader,
    mime_types: Vec<String>,
    dirent_cache: Mutex<LruCache<u32, Arc<Dirent>>>,
    cluster_cache: Mutex<LruCache<u32, Arc<Cluster>>>,
}

impl Archive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open archive '{}'", path.display()))?;

        // SAFETY: the mapping is read-only and its lifetime is tied to the
        // ArchiveInner that owns it. Archives are not meant to be modified
        // while open; external truncation would fault like any mmap reader.
        let mmap = unsafe {
            Mmap::map(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };
        let mmap = Arc::new(mmap);

        let header = Fileheader::from_bytes(&mmap)
            .wrap_err_with(|| format!("failed to read header of '{}'", path.display()))?;

        let file_len = mmap.len() as u64;
        ensure!(
            header.checksum_pos() + 16 <= file_len,
            ZimError::CorruptArchive(format!(
                "checksum offset {} past end of file ({})",
                header.checksum_pos(),
                file_len
            ))
        );
        ensure!(
            header.url_ptr_pos() + 8 * header.entry_count() as u64 <= file_len,
            ZimError::CorruptArchive("URL pointer table out of range".into())
        );
        ensure!(
            header.title_idx_pos() + 4 * header.entry_count() as u64 <= file_len,
            ZimError::CorruptArchive("title index table out of range".into())
        );
        ensure!(
            header.cluster_ptr_pos() + 8 * header.cluster_count() as u64 <= file_len,
            ZimError::CorruptArchive("cluster pointer table out of range".into())
        );

        let mime_types = parse_mime_list(&mmap, header.mime_list_pos() as usize)?;

        Ok(Self {
            inner: Arc::new(ArchiveInner {
                mmap,
                header,
                mime_types,
                dirent_cache: Mutex::new(LruCache::new(DIRENT_CACHE_CAPACITY)),
                cluster_cache: Mutex::new(LruCache::new(CLUSTER_CACHE_CAPACITY)),
            }),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.header.uuid()
    }

    pub fn entry_count(&self) -> u32 {
        self.inner.header.entry_count()
    }

    pub fn cluster_count(&self) -> u32 {
        self.inner.header.cluster_count()
    }

    pub fn is_extended(&self) -> bool {
        self.inner.header.is_extended()
    }

    pub fn mime_types(&self) -> &[String] {
        &self.inner.mime_types
    }

    pub fn has_main_entry(&self) -> bool {
        self.inner.header.main_page() != ENTRY_INDEX_NONE
    }

    pub fn main_entry(&self) -> Result<Option<Entry>> {
        if !self.has_main_entry() {
            return Ok(None);
        }
        self.entry_by_index(self.inner.header.main_page()).map(Some)
    }

    pub fn entry_by_index(&self, index: u32) -> Result<Entry> {
        ensure!(
            index < self.entry_count(),
            ZimError::CorruptArchive(format!(
                "entry index {} out of range ({})",
                index,
                self.entry_count()
            ))
        );
        let dirent = self.inner.dirent_at(index)?;
        Ok(Entry {
            inner: Arc::clone(&self.inner),
            index,
            dirent,
        })
    }

    /// Looks up an entry by `(namespace, path)` with a binary search over
    /// the URL pointer table.
    pub fn entry_by_path(&self, namespace: u8, path: &str) -> Result<Option<Entry>> {
        let index = self.inner.lower_bound(namespace, path)?;
        if index >= self.entry_count() {
            return Ok(None);
        }
        let dirent = self.inner.dirent_at(index)?;
        if dirent.url_key() != (namespace, path) {
            return Ok(None);
        }
        Ok(Some(Entry {
            inner: Arc::clone(&self.inner),
            index,
            dirent,
        }))
    }

    /// The entry at position `title_index` of the title-ordered table.
    pub fn entry_by_title_index(&self, title_index: u32) -> Result<Entry> {
        ensure!(
            title_index < self.entry_count(),
            ZimError::CorruptArchive(format!(
                "title index {} out of range ({})",
                title_index,
                self.entry_count()
            ))
        );
        let at = self.inner.header.title_idx_pos() as usize + 4 * title_index as usize;
        let entry_index = read_u32_le(&self.inner.mmap, at)?;
        self.entry_by_index(entry_index)
    }

    pub fn get_metadata(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.get_metadata_item(name)? {
            Some(item) => Ok(Some(item.data()?.as_bytes().to_vec())),
            None => Ok(None),
        }
    }

    pub fn get_metadata_item(&self, name: &str) -> Result<Option<Item>> {
        match self.entry_by_path(NS_METADATA, name)? {
            Some(entry) => entry.item().map(Some),
            None => Ok(None),
        }
    }

    /// Paths of every metadata entry, in order.
    pub fn metadata_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut index = self.inner.lower_bound(NS_METADATA, "")?;
        while index < self.entry_count() {
            let dirent = self.inner.dirent_at(index)?;
            if dirent.namespace != NS_METADATA {
                break;
            }
            keys.push(dirent.path.clone());
            index += 1;
        }
        Ok(keys)
    }

    /// Parses a metadata value of the `key:value;key:value` shape (`';'`
    /// separates entries, `':'` separates key from value).
    pub fn metadata_values_map(&self, name: &str) -> Result<Option<Vec<(String, String)>>> {
        let Some(raw) = self.get_metadata(name)? else {
            return Ok(None);
        };
        let text = String::from_utf8(raw)
            .map_err(|e| ZimError::CorruptArchive(format!("metadata '{}' not UTF-8: {}", name, e)))?;

        let mut pairs = Vec::new();
        for part in text.split(';').filter(|p| !p.is_empty()) {
            match part.split_once(':') {
                Some((key, value)) => pairs.push((key.to_owned(), value.to_owned())),
                None => pairs.push((part.to_owned(), String::new())),
            }
        }
        Ok(Some(pairs))
    }

    pub fn iter_by_path(&self) -> EntryRange {
        EntryRange {
            archive: self.clone(),
            by_title: false,
            next: 0,
            end: self.entry_count(),
        }
    }

    pub fn iter_by_title(&self) -> EntryRange {
        EntryRange {
            archive: self.clone(),
            by_title: true,
            next: 0,
            end: self.entry_count(),
        }
    }

    /// Recomputes the MD5 of the checksummed region and compares it with
    /// the trailing digest.
    pub fn verify_checksum(&self) -> Result<()> {
        let pos = self.inner.header.checksum_pos() as usize;
        let computed = md5_bytes(&self.inner.mmap[..pos]);
        let stored: [u8; 16] = self.inner.mmap[pos..pos + 16]
            .try_into()
            .expect("bounds checked at open");
        if computed != stored {
            bail!(ZimError::ChecksumMismatch {
                computed: hex(&computed),
                stored: hex(&stored),
            });
        }
        Ok(())
    }
}

impl ArchiveInner {
    fn dirent_at(&self, index: u32) -> Result<Arc<Dirent>> {
        if let Some(hit) = self.dirent_cache.lock().get(&index) {
            return Ok(hit);
        }

        let at = self.header.url_ptr_pos() as usize + 8 * index as usize;
        let offset = read_u64_le(&self.mmap, at)? as usize;
        ensure!(
            offset < self.mmap.len(),
            ZimError::CorruptArchive(format!(
                "dirent offset {} of entry {} past end of file",
                offset, index
            ))
        );
        let (dirent, _) = Dirent::read_from(&self.mmap[offset..])
            .wrap_err_with(|| format!("failed to decode dirent of entry {}", index))?;

        let dirent = Arc::new(dirent);
        self.dirent_cache.lock().put(index, Arc::clone(&dirent));
        Ok(dirent)
    }

    /// First entry index whose `(namespace, path)` is >= the probe.
    fn lower_bound(&self, namespace: u8, path: &str) -> Result<u32> {
        let mut lo = 0u32;
        let mut hi = self.header.entry_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let dirent = self.dirent_at(mid)?;
            if dirent.url_key() < (namespace, path) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn cluster(&self, index: u32) -> Result<Arc<Cluster>> {
        if let Some(hit) = self.cluster_cache.lock().get(&index) {
            return Ok(hit);
        }

        let count = self.header.cluster_count();
        ensure!(
            index < count,
            ZimError::CorruptArchive(format!("cluster {} out of range ({})", index, count))
        );

        let start = self.cluster_ptr(index)?;
        let end = if index + 1 < count {
            self.cluster_ptr(index + 1)?
        } else {
            self.header.checksum_pos()
        };
        let cluster = Arc::new(Cluster::read(Arc::clone(&self.mmap), start, end)?);

        self.cluster_cache.lock().put(index, Arc::clone(&cluster));
        Ok(cluster)
    }

    fn cluster_ptr(&self, index: u32) -> Result<u64> {
        read_u64_le(
            &self.mmap,
            self.header.cluster_ptr_pos() as usize + 8 * index as usize,
        )
    }
}

fn parse_mime_list(mmap: &Mmap, at: usize) -> Result<Vec<String>> {
    let mut mime_types = Vec::new();
    let mut pos = at;
    loop {
        let (text, consumed) = read_cstr(mmap, pos).wrap_err("failed to parse mimetype list")?;
        pos += consumed;
        if text.is_empty() {
            break;
        }
        mime_types.push(text);
    }
    Ok(mime_types)
}

/// One entry of the archive: identity plus, for items, the location of its
/// data.
#[derive(Clone)]
pub struct Entry {
    inner: Arc<ArchiveInner>,
    index: u32,
    dirent: Arc<Dirent>,
}

impl Entry {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn namespace(&self) -> u8 {
        self.dirent.namespace
    }

    pub fn path(&self) -> &str {
        &self.dirent.path
    }

    pub fn title(&self) -> &str {
        self.dirent.title()
    }

    pub fn is_redirect(&self) -> bool {
        self.dirent.is_redirect()
    }

    /// Target entry index of a redirect.
    pub fn redirect_index(&self) -> Option<u32> {
        match &self.dirent.kind {
            DirentKind::Redirect { target } => Some(*target),
            _ => None,
        }
    }

    /// Resolves a redirect by one hop.
    pub fn redirect_entry(&self) -> Result<Entry> {
        let Some(target) = self.redirect_index() else {
            bail!("entry {}/{} is not a redirect", self.namespace() as char, self.path());
        };
        ensure!(
            target < self.inner.header.entry_count(),
            ZimError::CorruptArchive(format!(
                "redirect target {} out of range ({})",
                target,
                self.inner.header.entry_count()
            ))
        );
        let dirent = self.inner.dirent_at(target)?;
        Ok(Entry {
            inner: Arc::clone(&self.inner),
            index: target,
            dirent,
        })
    }

    /// The item behind this entry. Fails on redirects and other non-item
    /// entries; resolve redirects first with [`Entry::redirect_entry`].
    pub fn item(&self) -> Result<Item> {
        ensure!(
            self.dirent.is_item(),
            "entry {}/{} is not an item",
            self.namespace() as char,
            self.path()
        );
        Ok(Item {
            inner: Arc::clone(&self.inner),
            dirent: Arc::clone(&self.dirent),
        })
    }
}

/// The data side of an item entry.
pub struct Item {
    inner: Arc<ArchiveInner>,
    dirent: Arc<Dirent>,
}

impl Item {
    pub fn mimetype(&self) -> Result<&str> {
        let DirentKind::Item { mime_type, .. } = &self.dirent.kind else {
            unreachable!("Item is only constructed for item dirents");
        };
        let mime_type = *mime_type;
        self.inner
            .mime_types
            .get(usize::from(mime_type))
            .map(String::as_str)
            .ok_or_else(|| {
                ZimError::CorruptArchive(format!("mimetype index {} out of range", mime_type))
                    .into()
            })
    }

    pub fn size(&self) -> Result<u64> {
        let (cluster, blob) = self.location();
        self.inner.cluster(cluster)?.blob_size(blob)
    }

    pub fn data(&self) -> Result<Blob> {
        let (cluster, blob) = self.location();
        self.inner.cluster(cluster)?.blob(blob)
    }

    pub fn data_range(&self, offset: u64, size: u64) -> Result<Blob> {
        let (cluster, blob) = self.location();
        self.inner.cluster(cluster)?.blob_range(blob, offset, size)
    }

    pub fn cluster_index(&self) -> u32 {
        self.location().0
    }

    pub fn blob_index(&self) -> u32 {
        self.location().1
    }

    fn location(&self) -> (u32, u32) {
        match &self.dirent.kind {
            DirentKind::Item { cluster, blob, .. } => (*cluster, *blob),
            _ => unreachable!("Item is only constructed for item dirents"),
        }
    }
}

/// Iterator over entries in URL or title order.
pub struct EntryRange {
    archive: Archive,
    by_title: bool,
    next: u32,
    end: u32,
}

impl Iterator for EntryRange {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let at = self.next;
        self.next += 1;
        Some(if self.by_title {
            self.archive.entry_by_title_index(at)
        } else {
            self.archive.entry_by_index(at)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.end - self.next) as usize;
        (left, Some(left))
    }
}
