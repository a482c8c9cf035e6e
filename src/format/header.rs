//! # File Header
//!
//! The fixed 80-byte header at the start of every archive. It is written
//! twice: a zeroed skeleton is implied by reserving the region below the
//! cluster base offset, and the populated header is rewritten in place once
//! every table offset is known.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Magic 0x044D495A ("ZIM\x04")
//! 4       2     Major version (5 classic, 6 extended)
//! 6       2     Minor version
//! 8       16    UUID
//! 24      4     Entry count
//! 28      4     Cluster count
//! 32      8     URL pointer table offset
//! 40      8     Title index table offset
//! 48      8     Cluster pointer table offset
//! 56      8     Mimetype list offset
//! 64      4     Main page entry index (0xFFFFFFFF = none)
//! 68      4     Layout page entry index (always 0xFFFFFFFF)
//! 72      8     Checksum offset
//! ```
//!
//! The major version is 6 (extended) iff at least one cluster in the archive
//! uses 64-bit blob offsets.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::ZimError;
use crate::uuid::Uuid;

pub const ZIM_MAGIC: u32 = 0x044D_495A;
pub const MAJOR_VERSION_CLASSIC: u16 = 5;
pub const MAJOR_VERSION_EXTENDED: u16 = 6;
pub const MINOR_VERSION: u16 = 1;

/// Sentinel for "no main page" / "no layout page".
pub const ENTRY_INDEX_NONE: u32 = 0xFFFF_FFFF;

pub const FILE_HEADER_SIZE: usize = 80;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Fileheader {
    magic: U32,
    major_version: U16,
    minor_version: U16,
    uuid: [u8; 16],
    entry_count: U32,
    cluster_count: U32,
    url_ptr_pos: U64,
    title_idx_pos: U64,
    cluster_ptr_pos: U64,
    mime_list_pos: U64,
    main_page: U32,
    layout_page: U32,
    checksum_pos: U64,
}

const _: () = assert!(std::mem::size_of::<Fileheader>() == FILE_HEADER_SIZE);
const _: () = assert!(FILE_HEADER_SIZE as u64 == crate::config::MIME_LIST_OFFSET);

impl Fileheader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        extended: bool,
        uuid: Uuid,
        entry_count: u32,
        cluster_count: u32,
        url_ptr_pos: u64,
        title_idx_pos: u64,
        cluster_ptr_pos: u64,
        mime_list_pos: u64,
        main_page: u32,
        checksum_pos: u64,
    ) -> Self {
        let major = if extended {
            MAJOR_VERSION_EXTENDED
        } else {
            MAJOR_VERSION_CLASSIC
        };
        Self {
            magic: U32::new(ZIM_MAGIC),
            major_version: U16::new(major),
            minor_version: U16::new(MINOR_VERSION),
            uuid: uuid.into_bytes(),
            entry_count: U32::new(entry_count),
            cluster_count: U32::new(cluster_count),
            url_ptr_pos: U64::new(url_ptr_pos),
            title_idx_pos: U64::new(title_idx_pos),
            cluster_ptr_pos: U64::new(cluster_ptr_pos),
            mime_list_pos: U64::new(mime_list_pos),
            main_page: U32::new(main_page),
            layout_page: U32::new(ENTRY_INDEX_NONE),
            checksum_pos: U64::new(checksum_pos),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            ZimError::CorruptArchive(format!(
                "file too small for header: {} < {}",
                bytes.len(),
                FILE_HEADER_SIZE
            ))
        );

        let header = Self::read_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| ZimError::CorruptArchive(format!("failed to parse header: {:?}", e)))?;

        ensure!(
            header.magic.get() == ZIM_MAGIC,
            ZimError::CorruptArchive(format!("bad magic 0x{:08X}", header.magic.get()))
        );
        ensure!(
            matches!(
                header.major_version.get(),
                MAJOR_VERSION_CLASSIC | MAJOR_VERSION_EXTENDED
            ),
            ZimError::CorruptArchive(format!(
                "unsupported major version {}",
                header.major_version.get()
            ))
        );

        Ok(header)
    }

    pub fn major_version(&self) -> u16 {
        self.major_version.get()
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version.get()
    }

    pub fn is_extended(&self) -> bool {
        self.major_version.get() == MAJOR_VERSION_EXTENDED
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::from_bytes(self.uuid)
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count.get()
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count.get()
    }

    pub fn url_ptr_pos(&self) -> u64 {
        self.url_ptr_pos.get()
    }

    pub fn title_idx_pos(&self) -> u64 {
        self.title_idx_pos.get()
    }

    pub fn cluster_ptr_pos(&self) -> u64 {
        self.cluster_ptr_pos.get()
    }

    pub fn mime_list_pos(&self) -> u64 {
        self.mime_list_pos.get()
    }

    pub fn main_page(&self) -> u32 {
        self.main_page.get()
    }

    pub fn layout_page(&self) -> u32 {
        self.layout_page.get()
    }

    pub fn checksum_pos(&self) -> u64 {
        self.checksum_pos.get()
    }
}
