//! # Reader-Side Clusters
//!
//! A cluster holds the bodies of many blobs behind a single (optionally
//! compressed) region of the archive. The reader wraps the raw region and
//! materializes the decompressed body lazily on first blob access:
//!
//! ```text
//! clusterInfo (1 byte, raw)
//! body (codec-wrapped):
//!   (N+1) offsets        u32 classic / u64 extended, relative to body start
//!   blob 0 .. blob N-1   contiguous, bounded by consecutive offsets
//! ```
//!
//! `offsets[0]` equals the size of the offset table itself and `offsets[N]`
//! equals the body length, so blob `i` spans `offsets[i]..offsets[i+1]`.
//!
//! ## Sharing
//!
//! Decompression happens at most once per cluster: the body sits behind a
//! `OnceLock` and a double-checked init mutex, so concurrent readers of the
//! same cluster block on one decompression instead of repeating it. Blobs
//! hold an `Arc` of the decompressed body, which therefore outlives cache
//! eviction of the cluster.

use std::sync::{Arc, OnceLock};

use eyre::{ensure, Result};
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::compression::{decompress_body, Compression};
use crate::error::ZimError;
use crate::format::{read_u32_le, read_u64_le};

#[derive(Debug)]
pub struct Cluster {
    compression: Compression,
    extended: bool,
    mmap: Arc<Mmap>,
    /// Region of the codec-wrapped body (the byte after clusterInfo).
    start: usize,
    end: usize,
    body: OnceLock<Arc<ClusterBody>>,
    init_lock: Mutex<()>,
}

#[derive(Debug)]
pub struct ClusterBody {
    data: Vec<u8>,
    /// N+1 boundaries; blob i spans `offsets[i]..offsets[i+1]`.
    offsets: Vec<u64>,
}

/// A contiguous byte range inside a decompressed cluster. Holding a blob
/// keeps the whole cluster body alive.
#[derive(Clone)]
pub struct Blob {
    body: Arc<ClusterBody>,
    start: usize,
    end: usize,
}

impl Cluster {
    /// Wraps the cluster starting at `offset`; `end` bounds the compressed
    /// region (the next cluster's offset, or the checksum offset for the
    /// last cluster).
    pub fn read(mmap: Arc<Mmap>, offset: u64, end: u64) -> Result<Self> {
        ensure!(
            offset < end && end <= mmap.len() as u64,
            ZimError::CorruptArchive(format!(
                "cluster region {}..{} out of range ({})",
                offset,
                end,
                mmap.len()
            ))
        );

        let info = mmap[offset as usize];
        let (compression, extended) = Compression::from_info_byte(info)?;

        Ok(Self {
            compression,
            extended,
            mmap,
            start: offset as usize + 1,
            end: end as usize,
            body: OnceLock::new(),
            init_lock: Mutex::new(()),
        })
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn blob_count(&self) -> Result<u32> {
        Ok(self.body()?.count())
    }

    pub fn blob_size(&self, blob: u32) -> Result<u64> {
        let body = self.body()?;
        let (start, end) = body.blob_bounds(blob)?;
        Ok((end - start) as u64)
    }

    pub fn blob(&self, blob: u32) -> Result<Blob> {
        let body = self.body()?;
        let (start, end) = body.blob_bounds(blob)?;
        Ok(Blob { body, start, end })
    }

    /// A sub-range of a blob, without copying.
    pub fn blob_range(&self, blob: u32, offset: u64, size: u64) -> Result<Blob> {
        let body = self.body()?;
        let (start, end) = body.blob_bounds(blob)?;
        let len = (end - start) as u64;
        ensure!(
            offset.checked_add(size).is_some_and(|e| e <= len),
            ZimError::CorruptArchive(format!(
                "blob range {}+{} past blob size {}",
                offset, size, len
            ))
        );
        Ok(Blob {
            body,
            start: start + offset as usize,
            end: start + (offset + size) as usize,
        })
    }

    fn body(&self) -> Result<Arc<ClusterBody>> {
        if let Some(body) = self.body.get() {
            return Ok(Arc::clone(body));
        }

        let _guard = self.init_lock.lock();
        if let Some(body) = self.body.get() {
            return Ok(Arc::clone(body));
        }

        let body = Arc::new(self.materialize()?);
        let _ = self.body.set(Arc::clone(&body));
        Ok(body)
    }

    fn materialize(&self) -> Result<ClusterBody> {
        let region = &self.mmap[self.start..self.end];
        let data = if self.compression.is_compressed() {
            decompress_body(self.compression, region)?
        } else {
            region.to_vec()
        };
        ClusterBody::parse(data, self.extended)
    }
}

impl ClusterBody {
    fn parse(mut data: Vec<u8>, extended: bool) -> Result<Self> {
        let width = if extended { 8usize } else { 4 };

        let first = read_offset(&data, 0, extended)?;
        ensure!(
            first as usize % width == 0 && first >= width as u64,
            ZimError::CorruptArchive(format!("bad leading cluster offset {}", first))
        );
        let slots = first as usize / width;

        let mut offsets = Vec::with_capacity(slots);
        offsets.push(first);
        for i in 1..slots {
            let offset = read_offset(&data, i * width, extended)?;
            ensure!(
                offset >= offsets[i - 1],
                ZimError::CorruptArchive(format!(
                    "cluster offsets not monotonic: {} after {}",
                    offset,
                    offsets[i - 1]
                ))
            );
            offsets.push(offset);
        }

        let body_len = *offsets.last().expect("at least one offset");
        ensure!(
            body_len as usize <= data.len(),
            ZimError::CorruptArchive(format!(
                "cluster body shorter than declared: {} < {}",
                data.len(),
                body_len
            ))
        );
        data.truncate(body_len as usize);

        Ok(Self { data, offsets })
    }

    fn count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    fn blob_bounds(&self, blob: u32) -> Result<(usize, usize)> {
        ensure!(
            blob < self.count(),
            ZimError::CorruptArchive(format!(
                "blob {} out of range (cluster has {})",
                blob,
                self.count()
            ))
        );
        Ok((
            self.offsets[blob as usize] as usize,
            self.offsets[blob as usize + 1] as usize,
        ))
    }
}

fn read_offset(buf: &[u8], at: usize, extended: bool) -> Result<u64> {
    if extended {
        read_u64_le(buf, at)
    } else {
        read_u32_le(buf, at).map(u64::from)
    }
}

impl Blob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.body.data[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
