//! # Configuration Constants
//!
//! This module centralizes the tunables of the archive engine. Constants
//! that depend on each other are co-located, and the load-bearing
//! relationships are enforced by compile-time assertions.
//!
//! ```text
//! CLUSTER_BASE_OFFSET (1024)
//!       │
//!       └─> Must leave room for the 80-byte header plus the mimetype
//!           list. The header is rewritten in place on close; the mimetype
//!           list is written at offset 80 and must end below 1024.
//!
//! DEFAULT_MIN_CLUSTER_SIZE (2048 KiB)
//!       │
//!       └─> A cluster closes once its accumulated blob bytes would cross
//!           this target. Larger clusters compress better but cost more
//!           per random read (the whole cluster is decompressed).
//!
//! TASK_QUEUE_CAPACITY (16)
//!       │
//!       └─> Soft bound on clusters awaiting compression. Determines how
//!           far the producer can run ahead of the workers, i.e. the peak
//!           number of cluster bodies held in memory at once.
//! ```

// ============================================================================
// FILE LAYOUT
// ============================================================================

/// Byte offset of the first cluster. The region below it holds the header
/// and the mimetype list, with headroom for the header rewrite on close.
pub const CLUSTER_BASE_OFFSET: u64 = 1024;

/// Byte offset of the mimetype list (immediately after the header).
pub const MIME_LIST_OFFSET: u64 = 80;

const _: () = assert!(
    MIME_LIST_OFFSET < CLUSTER_BASE_OFFSET,
    "mimetype list must start below the cluster base offset"
);

// ============================================================================
// CREATOR DEFAULTS
// ============================================================================

/// Default cluster size target in KiB.
pub const DEFAULT_MIN_CLUSTER_SIZE: u32 = 2048;

/// Default number of compression worker threads.
pub const DEFAULT_WORKERS: u32 = 4;

/// Soft capacity of the compression task queue; pushing past it blocks the
/// producer until a worker catches up.
pub const TASK_QUEUE_CAPACITY: usize = 16;

/// Progress line cadence when verbose: one line per this many entries.
pub const PROGRESS_INTERVAL: usize = 1000;

// ============================================================================
// COMPRESSION SETTINGS
// Fixed so identical input produces byte-identical archives (see the
// determinism requirement on the creator).
// ============================================================================

/// Zstandard compression level for cluster bodies.
pub const ZSTD_LEVEL: i32 = 5;

/// LZMA (xz) preset for cluster bodies.
pub const LZMA_PRESET: u32 = 6;

// ============================================================================
// READER CACHES
// ============================================================================

/// Capacity of the decoded-dirent LRU cache (entries).
pub const DIRENT_CACHE_CAPACITY: usize = 512;

/// Capacity of the decompressed-cluster LRU cache (clusters). Each resident
/// cluster holds its full decompressed body, so this bounds reader memory at
/// roughly `CLUSTER_CACHE_CAPACITY * DEFAULT_MIN_CLUSTER_SIZE` KiB.
pub const CLUSTER_CACHE_CAPACITY: usize = 16;

const _: () = assert!(DIRENT_CACHE_CAPACITY > 0);
const _: () = assert!(CLUSTER_CACHE_CAPACITY > 0);
