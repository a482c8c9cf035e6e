//! # Writer Module
//!
//! Everything behind [`Creator`], the streaming archive builder:
//!
//! - `provider`: content sources and the [`Item`] trait callers implement;
//! - `cluster`: writer-side cluster accumulation and serialization;
//! - `queue`: the bounded MPMC queue connecting producer, workers and the
//!   writer thread;
//! - `handler`: the dirent-handler extension seam and the built-in search
//!   data handlers;
//! - `creator`: the pipeline itself and the finish sequence.

mod cluster;
mod creator;
mod handler;
mod provider;
mod queue;

pub use creator::Creator;
pub use handler::{
    DirentHandler, FinishContext, FullTextHandler, HandledDirent, HandlerDirent, TextIndex,
    TitleListingHandler,
};
pub use provider::{is_compressible_mimetype, ContentProvider, Item, ItemHints, StringItem};
pub use queue::BoundedQueue;
