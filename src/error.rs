//! # Archive Error Kinds
//!
//! zimkit uses `eyre::Result` as the ambient result type; this module defines
//! the error kinds a caller may want to distinguish programmatically. They are
//! reported through `eyre::Report` and can be recovered with
//! `report.downcast_ref::<ZimError>()`.
//!
//! Plain I/O failures are carried as wrapped `std::io::Error` values and are
//! not duplicated here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZimError {
    /// Structural damage: an offset table points outside the file, a dirent
    /// string is unterminated, a cluster body is shorter than its offset
    /// table declares, and similar.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// A cluster or configuration names a compression algorithm this build
    /// does not support (for example Zlib or Bzip2).
    #[error("unsupported compression type {0}")]
    UnsupportedCompression(u8),

    /// A redirect names a target path that does not exist. Recovered by
    /// dropping the redirect; surfaces only in logs.
    #[error("invalid redirection {namespace}/{path} -> {target_namespace}/{target_path}")]
    InvalidRedirect {
        namespace: char,
        path: String,
        target_namespace: char,
        target_path: String,
    },

    /// Two entries share the same (namespace, path). Resolved by preferring
    /// the non-redirect entry; surfaces only in logs.
    #[error("duplicate entry {namespace}/{path}")]
    DuplicateDirent { namespace: char, path: String },

    /// More than 65534 distinct mimetypes were registered.
    #[error("too many distinct mime types")]
    MimeTableOverflow,

    /// The creator observed an error (its own or a worker's) and is in the
    /// terminal error state; every further call reports this.
    #[error("creator is in error state")]
    CreatorErrored,

    /// The trailing MD5 digest does not match the file contents.
    #[error("checksum mismatch: computed {computed}, stored {stored}")]
    ChecksumMismatch { computed: String, stored: String },
}
