//! # Content Providers and Items
//!
//! A [`ContentProvider`] is a byte source with a known length, consumed
//! exactly once while its cluster is serialized. The closed set of
//! variants covers in-memory bytes, files and arbitrary readers.
//!
//! An [`Item`] is what callers feed the creator: identity (path, title,
//! mimetype) plus a fresh content provider on demand. `content_provider`
//! may be called more than once (the full-text handler reads the content
//! independently of the cluster pipeline), so it hands out a new provider
//! each time.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

/// Lazy byte source with a known length.
pub enum ContentProvider {
    Bytes(Vec<u8>),
    File { path: PathBuf, size: u64 },
    Reader { reader: Box<dyn Read + Send>, size: u64 },
}

impl ContentProvider {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)
            .wrap_err_with(|| format!("failed to stat content file '{}'", path.display()))?
            .len();
        Ok(Self::File { path, size })
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R, size: u64) -> Self {
        Self::Reader {
            reader: Box::new(reader),
            size,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            ContentProvider::Bytes(bytes) => bytes.len() as u64,
            ContentProvider::File { size, .. } => *size,
            ContentProvider::Reader { size, .. } => *size,
        }
    }

    /// Streams the full content into `out`. Consumes the provider; the
    /// number of bytes produced must equal `size()`.
    pub fn write_into<W: Write>(self, out: &mut W) -> Result<()> {
        let expected = self.size();
        let written = match self {
            ContentProvider::Bytes(bytes) => {
                out.write_all(&bytes).wrap_err("failed to write blob")?;
                bytes.len() as u64
            }
            ContentProvider::File { path, .. } => {
                let mut file = File::open(&path)
                    .wrap_err_with(|| format!("failed to open content file '{}'", path.display()))?;
                std::io::copy(&mut file, out)
                    .wrap_err_with(|| format!("failed to stream '{}'", path.display()))?
            }
            ContentProvider::Reader { mut reader, .. } => {
                std::io::copy(&mut reader, out).wrap_err("failed to stream blob")?
            }
        };
        ensure!(
            written == expected,
            "content provider produced {} bytes, declared {}",
            written,
            expected
        );
        Ok(())
    }

    /// Reads the full content into memory (used by dirent handlers).
    pub fn read_all(self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size() as usize);
        self.write_into(&mut out)?;
        Ok(out)
    }
}

impl From<Vec<u8>> for ContentProvider {
    fn from(bytes: Vec<u8>) -> Self {
        ContentProvider::Bytes(bytes)
    }
}

impl From<&[u8]> for ContentProvider {
    fn from(bytes: &[u8]) -> Self {
        ContentProvider::Bytes(bytes.to_vec())
    }
}

impl From<String> for ContentProvider {
    fn from(text: String) -> Self {
        ContentProvider::Bytes(text.into_bytes())
    }
}

impl From<&str> for ContentProvider {
    fn from(text: &str) -> Self {
        ContentProvider::Bytes(text.as_bytes().to_vec())
    }
}

/// Per-item overrides for creator policy decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemHints {
    /// Force the blob into the compressed (`Some(true)`) or uncompressed
    /// (`Some(false)`) cluster, overriding the mimetype heuristic.
    pub compress: Option<bool>,
}

/// A unit of content submitted to the creator.
pub trait Item {
    fn path(&self) -> String;
    fn title(&self) -> String;
    fn mimetype(&self) -> String;
    fn content_provider(&self) -> Result<ContentProvider>;

    fn hints(&self) -> ItemHints {
        ItemHints::default()
    }
}

/// The simplest item: identity plus an in-memory body.
pub struct StringItem {
    pub path: String,
    pub title: String,
    pub mimetype: String,
    pub content: Vec<u8>,
    pub hints: ItemHints,
}

impl StringItem {
    pub fn new(
        path: impl Into<String>,
        mimetype: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            mimetype: mimetype.into(),
            content: content.into(),
            hints: ItemHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: ItemHints) -> Self {
        self.hints = hints;
        self
    }
}

impl Item for StringItem {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn mimetype(&self) -> String {
        self.mimetype.clone()
    }

    fn content_provider(&self) -> Result<ContentProvider> {
        Ok(ContentProvider::Bytes(self.content.clone()))
    }

    fn hints(&self) -> ItemHints {
        self.hints
    }
}

/// Whether content of this mimetype is worth routing through the
/// compressed cluster.
pub fn is_compressible_mimetype(mimetype: &str) -> bool {
    mimetype.starts_with("text/")
        || mimetype == "application/javascript"
        || mimetype == "application/json"
        || mimetype == "application/xml"
        || mimetype.ends_with("+xml")
        || mimetype.ends_with("+json")
}
