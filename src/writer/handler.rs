//! # Dirent Handlers
//!
//! The creator's only extension seam. A handler observes every entry as it
//! is submitted, may claim one virtual entry of its own, and delivers that
//! entry's content at finish time, after entry indexes are final. The
//! built-in handlers produce the search-data entries of the archive:
//!
//! - [`TitleListingHandler`] emits `X/listing/titleOrdered/v1`, the
//!   title-ordered list of content entry indexes used by suggestion
//!   front-ends;
//! - [`FullTextHandler`] adapts an opaque [`TextIndex`] backend and emits
//!   `X/fulltext/xapian`.
//!
//! Handler content is ingested through the regular cluster pipeline,
//! always uncompressed (index formats carry their own compression).

use eyre::Result;

use crate::format::{NS_SEARCH, write_u32_le};
use crate::writer::provider::Item;

/// Entry identity as shown to handlers during ingestion.
pub struct HandledDirent<'a> {
    pub namespace: u8,
    pub path: &'a str,
    pub title: &'a str,
    pub is_redirect: bool,
}

/// The virtual entry a handler wants the archive to carry.
pub struct HandlerDirent {
    pub namespace: u8,
    pub path: String,
    pub title: String,
    pub mimetype: String,
}

/// Finished-entry view handed to handlers when their content is collected.
pub struct FinishContext<'a> {
    /// Entry indexes of content entries, in title order.
    pub content_entries_by_title: &'a [u32],
    lookup: &'a dyn Fn(u8, &str) -> Option<u32>,
}

impl<'a> FinishContext<'a> {
    pub fn new(
        content_entries_by_title: &'a [u32],
        lookup: &'a dyn Fn(u8, &str) -> Option<u32>,
    ) -> Self {
        Self {
            content_entries_by_title,
            lookup,
        }
    }

    pub fn entry_index(&self, namespace: u8, path: &str) -> Option<u32> {
        (self.lookup)(namespace, path)
    }
}

pub trait DirentHandler: Send {
    fn start(&mut self) -> Result<()>;

    /// Called for every submitted entry; `item` is present for items and
    /// absent for redirects and metadata.
    fn handle(&mut self, dirent: &HandledDirent<'_>, item: Option<&dyn Item>) -> Result<()>;

    /// The virtual entry this handler contributes, if any. Requested before
    /// redirect resolution so the entry takes part in ordering and
    /// indexing.
    fn dirent(&self) -> Option<HandlerDirent>;

    fn stop(&mut self) -> Result<()>;

    /// The content of the virtual entry. Called once, after entry indexes
    /// are final.
    fn take_content(&mut self, ctx: &FinishContext<'_>) -> Result<Vec<u8>>;
}

/// Emits the title-ordered listing of content entries.
#[derive(Default)]
pub struct TitleListingHandler;

impl DirentHandler for TitleListingHandler {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn handle(&mut self, _dirent: &HandledDirent<'_>, _item: Option<&dyn Item>) -> Result<()> {
        // The listing is derived from the final entry set.
        Ok(())
    }

    fn dirent(&self) -> Option<HandlerDirent> {
        Some(HandlerDirent {
            namespace: NS_SEARCH,
            path: "listing/titleOrdered/v1".to_owned(),
            title: String::new(),
            mimetype: "application/octet-stream+zimlisting".to_owned(),
        })
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn take_content(&mut self, ctx: &FinishContext<'_>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(ctx.content_entries_by_title.len() * 4);
        for index in ctx.content_entries_by_title {
            write_u32_le(&mut out, *index);
        }
        Ok(out)
    }
}

/// Opaque full-text indexing backend.
pub trait TextIndex: Send {
    fn start(&mut self, language: &str) -> Result<()>;
    fn index_entry(&mut self, path: &str, title: &str, content: &[u8]) -> Result<()>;
    fn finish(&mut self) -> Result<Vec<u8>>;
}

/// Adapts a [`TextIndex`] backend into the handler seam.
pub struct FullTextHandler {
    backend: Box<dyn TextIndex>,
    language: String,
    content: Option<Vec<u8>>,
}

impl FullTextHandler {
    pub fn new(backend: Box<dyn TextIndex>, language: impl Into<String>) -> Self {
        Self {
            backend,
            language: language.into(),
            content: None,
        }
    }
}

impl DirentHandler for FullTextHandler {
    fn start(&mut self) -> Result<()> {
        self.backend.start(&self.language)
    }

    fn handle(&mut self, dirent: &HandledDirent<'_>, item: Option<&dyn Item>) -> Result<()> {
        if dirent.is_redirect {
            return Ok(());
        }
        let Some(item) = item else {
            return Ok(());
        };
        let content = item.content_provider()?.read_all()?;
        self.backend.index_entry(dirent.path, dirent.title, &content)
    }

    fn dirent(&self) -> Option<HandlerDirent> {
        Some(HandlerDirent {
            namespace: NS_SEARCH,
            path: "fulltext/xapian".to_owned(),
            title: String::new(),
            mimetype: "application/octet-stream".to_owned(),
        })
    }

    fn stop(&mut self) -> Result<()> {
        self.content = Some(self.backend.finish()?);
        Ok(())
    }

    fn take_content(&mut self, _ctx: &FinishContext<'_>) -> Result<Vec<u8>> {
        Ok(self.content.take().unwrap_or_default())
    }
}
