//! # Writer-Side Clusters
//!
//! The creator accumulates blobs into an open cluster until the size target
//! is crossed, then closes it: the cluster is stamped with its final index
//! (on the producer thread, before it becomes visible to anyone else, so
//! dirents bound to it always observe the right number) and handed to the
//! compression workers and the writer thread.
//!
//! A closed cluster is a little state machine shared across three threads:
//!
//! ```text
//! Open ──(worker takes providers)──> Compressing ──> Done ──(writer)──> Taken
//!                                         │
//!                                       Failed  (error recorded separately)
//! ```
//!
//! The writer thread waits on the `Done` transition through a per-cluster
//! condvar, which is what keeps on-disk cluster order equal to close order
//! even though compression finishes out of order.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use eyre::{bail, Result};
use parking_lot::{Condvar, Mutex};

use crate::compression::{BodyEncoder, Compression};
use crate::format::{write_u32_le, write_u64_le};
use crate::writer::provider::ContentProvider;

pub(crate) struct Cluster {
    compression: Compression,
    index: AtomicU32,
    state: Mutex<ClusterState>,
    data_ready: Condvar,
}

enum ClusterState {
    Open {
        providers: Vec<ContentProvider>,
        size: u64,
    },
    Compressing,
    Done {
        data: Vec<u8>,
        extended: bool,
    },
    Failed,
    Taken,
}

impl Cluster {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            index: AtomicU32::new(u32::MAX),
            state: Mutex::new(ClusterState::Open {
                providers: Vec::new(),
                size: 0,
            }),
            data_ready: Condvar::new(),
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Number of blobs accumulated so far. Only meaningful while open.
    pub fn count(&self) -> u32 {
        match &*self.state.lock() {
            ClusterState::Open { providers, .. } => providers.len() as u32,
            _ => 0,
        }
    }

    /// Running total of uncompressed blob bytes. Only meaningful while open.
    pub fn estimated_size(&self) -> u64 {
        match &*self.state.lock() {
            ClusterState::Open { size, .. } => *size,
            _ => 0,
        }
    }

    /// Appends a blob source and returns its blob index.
    pub fn add_content(&self, provider: ContentProvider) -> u32 {
        let mut state = self.state.lock();
        match &mut *state {
            ClusterState::Open { providers, size } => {
                *size += provider.size();
                providers.push(provider);
                (providers.len() - 1) as u32
            }
            _ => unreachable!("add_content on a closed cluster"),
        }
    }

    /// Stamped by the producer when the cluster closes, before it enters
    /// any queue.
    pub fn set_index(&self, index: u32) {
        self.index.store(index, Ordering::Release);
    }

    pub fn index(&self) -> u32 {
        self.index.load(Ordering::Acquire)
    }

    /// Worker entry point: serializes the accumulated blobs through the
    /// codec into an in-memory buffer and publishes it.
    pub fn compress(&self) -> Result<()> {
        let providers = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ClusterState::Compressing) {
                ClusterState::Open { providers, .. } => providers,
                _ => unreachable!("compress on a cluster that is not open"),
            }
        };

        match serialize_blobs(self.compression, providers) {
            Ok((data, extended)) => {
                *self.state.lock() = ClusterState::Done { data, extended };
                self.data_ready.notify_all();
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = ClusterState::Failed;
                self.data_ready.notify_all();
                Err(err)
            }
        }
    }

    /// Writer entry point: waits for the compressed body and takes it.
    /// `should_abort` is polled while waiting so the writer can bail out
    /// when some other thread has already failed.
    pub fn take_data(&self, should_abort: &dyn Fn() -> bool) -> Result<(Vec<u8>, bool)> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                ClusterState::Done { .. } => break,
                ClusterState::Failed => bail!("cluster {} failed to compress", self.index()),
                _ => {}
            }
            if should_abort() {
                bail!("aborting wait for cluster {}", self.index());
            }
            let _ = self
                .data_ready
                .wait_for(&mut state, Duration::from_millis(100));
        }

        match std::mem::replace(&mut *state, ClusterState::Taken) {
            ClusterState::Done { data, extended } => Ok((data, extended)),
            _ => unreachable!("state checked above"),
        }
    }
}

/// Builds the on-disk cluster bytes: the raw info byte followed by the
/// codec-wrapped offset table and blob bodies. Decides extended mode before
/// writing anything.
fn serialize_blobs(
    compression: Compression,
    providers: Vec<ContentProvider>,
) -> Result<(Vec<u8>, bool)> {
    let sizes: Vec<u64> = providers.iter().map(ContentProvider::size).collect();
    let slots = sizes.len() as u64 + 1;

    let classic_total = slots * 4 + sizes.iter().sum::<u64>();
    let extended = classic_total > u32::MAX as u64;
    let width = if extended { 8 } else { 4 };

    let mut offsets = Vec::with_capacity(slots as usize);
    let mut offset = slots * width;
    offsets.push(offset);
    for size in &sizes {
        offset += size;
        offsets.push(offset);
    }

    let mut out = vec![compression.info_byte(extended)];
    let mut encoder = BodyEncoder::new(compression, &mut out)?;

    let mut table = Vec::with_capacity((slots * width) as usize);
    for off in &offsets {
        if extended {
            write_u64_le(&mut table, *off);
        } else {
            write_u32_le(&mut table, *off as u32);
        }
    }
    encoder.write_all(&table)?;

    for provider in providers {
        provider.write_into(&mut encoder)?;
    }
    encoder.finish()?;

    Ok((out, extended))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{read_u32_le, read_u8};

    #[test]
    fn uncompressed_layout() {
        let cluster = Cluster::new(Compression::None);
        assert_eq!(cluster.add_content("abc".into()), 0);
        assert_eq!(cluster.add_content("defgh".into()), 1);
        assert_eq!(cluster.count(), 2);
        assert_eq!(cluster.estimated_size(), 8);

        cluster.compress().unwrap();
        let (data, extended) = cluster.take_data(&|| false).unwrap();
        assert!(!extended);

        assert_eq!(read_u8(&data, 0).unwrap(), Compression::None as u8);
        // Three offsets of four bytes each, then the blob bytes.
        assert_eq!(read_u32_le(&data, 1).unwrap(), 12);
        assert_eq!(read_u32_le(&data, 5).unwrap(), 15);
        assert_eq!(read_u32_le(&data, 9).unwrap(), 20);
        assert_eq!(&data[13..16], b"abc");
        assert_eq!(&data[16..21], b"defgh");
    }

    #[test]
    fn compressed_body_round_trips() {
        let cluster = Cluster::new(Compression::Zstd);
        cluster.add_content("hello cluster".into());
        cluster.compress().unwrap();
        let (data, extended) = cluster.take_data(&|| false).unwrap();
        assert!(!extended);
        assert_eq!(read_u8(&data, 0).unwrap(), Compression::Zstd as u8);

        let body = crate::compression::decompress_body(Compression::Zstd, &data[1..]).unwrap();
        assert_eq!(read_u32_le(&body, 0).unwrap(), 8);
        assert_eq!(read_u32_le(&body, 4).unwrap(), 8 + 13);
        assert_eq!(&body[8..], b"hello cluster");
    }

    #[test]
    fn index_stamp_is_visible() {
        let cluster = Cluster::new(Compression::None);
        cluster.set_index(7);
        assert_eq!(cluster.index(), 7);
    }

    #[test]
    fn take_data_aborts_on_request() {
        let cluster = Cluster::new(Compression::None);
        cluster.add_content("x".into());
        // Never compressed; the abort predicate must get us out.
        assert!(cluster.take_data(&|| true).is_err());
    }
}
