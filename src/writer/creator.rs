//! # Archive Creator
//!
//! Streams submitted items into a new archive with bounded memory. The
//! producer (the caller's thread) appends blobs to one of two open
//! clusters — compressible and non-compressible content fill up
//! independently — and every cluster that crosses the size target is closed
//! and handed to a pool of compression workers. A dedicated writer thread
//! appends compressed cluster bodies to the temp file strictly in close
//! order, waiting per cluster when compression finishes out of order.
//!
//! ```text
//! caller ──add_item──> open clusters ──close──> task queue ──> workers
//!                                        │                        │
//!                                        └──> write queue ──> writer thread
//! ```
//!
//! Backpressure: the task queue is bounded, so `add_item` stalls inside a
//! cluster close once the workers fall behind.
//!
//! ## Finish Sequence
//!
//! `finish()` performs the deferred layout fix-ups in a fixed order: inject
//! the main-page and favicon redirects, materialize handler entries,
//! resolve redirects (dropping broken ones), assign entry indexes in URL
//! order, renumber mimetypes against the sorted list, build the title
//! index, drain handler content, close the remaining open clusters, retire
//! the worker and writer threads, then write dirents, the three pointer
//! tables, the header and the MD5 trailer, and finally rename the temp
//! file into place.
//!
//! ## Error Model
//!
//! Worker and writer failures land in a shared error slot that the
//! producer checks on every public call. The first call to observe an
//! error reports it and moves the creator to a terminal state; every
//! later call fails with `CreatorErrored`. Calling `add_item` after
//! `finish` is the same terminal error.
//!
//! Given identical inputs, configuration and UUID, the produced file is
//! byte-identical across runs and worker counts.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use eyre::{bail, ensure, eyre, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::checksum::md5_stream;
use crate::compression::Compression;
use crate::config::{
    CLUSTER_BASE_OFFSET, DEFAULT_MIN_CLUSTER_SIZE, DEFAULT_WORKERS, MIME_LIST_OFFSET,
    PROGRESS_INTERVAL, TASK_QUEUE_CAPACITY,
};
use crate::error::ZimError;
use crate::format::{
    Dirent, Fileheader, ENTRY_INDEX_NONE, NS_CONTENT, NS_INTERNAL, NS_METADATA,
};
use crate::uuid::Uuid;
use crate::writer::cluster::Cluster;
use crate::writer::handler::{
    DirentHandler, FinishContext, FullTextHandler, HandledDirent, TextIndex, TitleListingHandler,
};
use crate::writer::provider::{is_compressible_mimetype, ContentProvider, Item};
use crate::writer::queue::BoundedQueue;

type EntryKey = (u8, String);

pub struct Creator {
    verbose: bool,
    compression: Compression,
    min_cluster_size: u32,
    nb_workers: u32,
    with_index: bool,
    index_language: String,
    main_path: Option<String>,
    favicon_path: Option<String>,
    uuid: Uuid,
    text_index: Option<Box<dyn TextIndex>>,
    extra_handlers: Vec<Box<dyn DirentHandler>>,
    phase: Phase,
}

enum Phase {
    Configured,
    Started(Box<CreatorData>),
    Finished,
    Errored,
}

impl Default for Creator {
    fn default() -> Self {
        Self::new()
    }
}

impl Creator {
    pub fn new() -> Self {
        Self {
            verbose: false,
            compression: Compression::Zstd,
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            nb_workers: DEFAULT_WORKERS,
            with_index: false,
            index_language: String::new(),
            main_path: None,
            favicon_path: None,
            uuid: Uuid::generate(),
            text_index: None,
            extra_handlers: Vec::new(),
            phase: Phase::Configured,
        }
    }

    pub fn config_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    pub fn config_compression(&mut self, compression: Compression) -> &mut Self {
        self.compression = compression;
        self
    }

    /// Cluster size target in KiB.
    pub fn config_min_cluster_size(&mut self, kib: u32) -> &mut Self {
        self.min_cluster_size = kib.max(1);
        self
    }

    pub fn config_nb_workers(&mut self, workers: u32) -> &mut Self {
        self.nb_workers = workers.max(1);
        self
    }

    /// Enables the full-text index handler; requires a backend installed
    /// with [`Creator::set_text_index`] before `start`.
    pub fn config_indexing(&mut self, enabled: bool, language: impl Into<String>) -> &mut Self {
        self.with_index = enabled;
        self.index_language = language.into();
        self
    }

    pub fn set_text_index(&mut self, backend: Box<dyn TextIndex>) -> &mut Self {
        self.text_index = Some(backend);
        self
    }

    /// Installs an additional dirent handler. Handlers observe every entry
    /// and may contribute one virtual entry of their own at finish.
    pub fn add_dirent_handler(&mut self, handler: Box<dyn DirentHandler>) -> &mut Self {
        self.extra_handlers.push(handler);
        self
    }

    pub fn set_main_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.main_path = Some(path.into());
        self
    }

    pub fn set_favicon_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.favicon_path = Some(path.into());
        self
    }

    pub fn set_uuid(&mut self, uuid: Uuid) -> &mut Self {
        self.uuid = uuid;
        self
    }

    /// Opens `<path>.zim.tmp` (a trailing `.zim` on `path` is normalized
    /// away) and launches the worker and writer threads.
    pub fn start<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        ensure!(
            matches!(self.phase, Phase::Configured),
            "creator already started"
        );

        let mut handlers: Vec<Box<dyn DirentHandler>> = Vec::new();
        if self.with_index {
            let backend = self.text_index.take().ok_or_else(|| {
                eyre!("indexing is enabled but no text index backend is installed")
            })?;
            handlers.push(Box::new(TitleListingHandler));
            handlers.push(Box::new(FullTextHandler::new(
                backend,
                self.index_language.clone(),
            )));
        }
        handlers.append(&mut self.extra_handlers);

        match CreatorData::start(
            path.as_ref(),
            self.verbose,
            self.compression,
            self.min_cluster_size,
            self.nb_workers,
            handlers,
        ) {
            Ok(data) => {
                self.phase = Phase::Started(Box::new(data));
                Ok(())
            }
            Err(err) => {
                self.phase = Phase::Errored;
                Err(err)
            }
        }
    }

    pub fn add_item(&mut self, item: &dyn Item) -> Result<()> {
        let data = self.checked_data()?;
        let result = data.add_item(item);
        self.absorb(result)
    }

    pub fn add_metadata(
        &mut self,
        name: &str,
        content: impl Into<ContentProvider>,
        mimetype: &str,
    ) -> Result<()> {
        let data = self.checked_data()?;
        let result = data.add_metadata(name, content.into(), mimetype);
        self.absorb(result)
    }

    pub fn add_redirection(&mut self, path: &str, title: &str, target_path: &str) -> Result<()> {
        let data = self.checked_data()?;
        let result = data.add_redirection(path, title, target_path);
        self.absorb(result)
    }

    /// Runs the finish sequence and renames the temp file into place.
    pub fn finish(&mut self) -> Result<()> {
        self.checked_data()?;
        let Phase::Started(mut data) = std::mem::replace(&mut self.phase, Phase::Finished) else {
            unreachable!("checked_data verified the phase");
        };

        let result = data.finish(
            self.uuid,
            self.main_path.as_deref(),
            self.favicon_path.as_deref(),
        );
        if result.is_err() {
            self.phase = Phase::Errored;
        }
        result
    }

    /// Phase check plus worker error pickup; runs at every public entry.
    fn checked_data(&mut self) -> Result<&mut CreatorData> {
        match &self.phase {
            Phase::Configured => bail!("creator is not started"),
            Phase::Finished | Phase::Errored => bail!(ZimError::CreatorErrored),
            Phase::Started(_) => {}
        }

        let pending_error = match &self.phase {
            Phase::Started(data) if data.errors.is_set() => Some(
                data.errors
                    .take()
                    .unwrap_or_else(|| eyre!(ZimError::CreatorErrored)),
            ),
            _ => None,
        };
        if let Some(err) = pending_error {
            self.phase = Phase::Errored;
            return Err(err);
        }

        match &mut self.phase {
            Phase::Started(data) => Ok(data),
            _ => unreachable!("checked above"),
        }
    }

    fn absorb(&mut self, result: Result<()>) -> Result<()> {
        if result.is_err() {
            self.phase = Phase::Errored;
        }
        result
    }
}

struct EntryRecord {
    title: String,
    kind: RecordKind,
    index: u32,
}

enum RecordKind {
    Item {
        mime: u16,
        cluster: Arc<Cluster>,
        blob: u32,
    },
    /// Item entry whose blob has not been routed yet (handler entries
    /// between materialization and content drain).
    PendingItem { mime: u16 },
    Redirect {
        target_ns: u8,
        target_path: String,
        target: Option<u32>,
    },
}

struct ErrorSlot {
    slot: Mutex<Option<eyre::Report>>,
    flagged: AtomicBool,
}

impl ErrorSlot {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            flagged: AtomicBool::new(false),
        }
    }

    fn record(&self, err: eyre::Report) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.flagged.store(true, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.flagged.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<eyre::Report> {
        self.slot.lock().take()
    }
}

struct WriterOutcome {
    file: File,
    cluster_offsets: Vec<u64>,
}

struct CreatorData {
    tmp_path: PathBuf,
    final_path: PathBuf,
    verbose: bool,
    compression: Compression,
    min_cluster_size: u32,
    start_time: Instant,

    entries: BTreeMap<EntryKey, EntryRecord>,
    mime_map: HashMap<String, u16>,
    mime_rev: Vec<String>,

    comp_cluster: Arc<Cluster>,
    uncomp_cluster: Arc<Cluster>,
    clusters: Vec<Arc<Cluster>>,

    task_queue: Arc<BoundedQueue<Arc<Cluster>>>,
    write_queue: Arc<BoundedQueue<Arc<Cluster>>>,
    workers: Vec<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<Result<WriterOutcome>>>,
    errors: Arc<ErrorSlot>,
    is_extended: Arc<AtomicBool>,

    handlers: Vec<Box<dyn DirentHandler>>,
    handler_keys: Vec<Option<EntryKey>>,
    main_page_key: Option<EntryKey>,
    title_index: Vec<u32>,
    content_titles: Vec<u32>,

    n_redirects: usize,
    n_comp_items: usize,
    n_uncomp_items: usize,
    n_comp_clusters: usize,
    n_uncomp_clusters: usize,
}

impl CreatorData {
    fn start(
        path: &Path,
        verbose: bool,
        compression: Compression,
        min_cluster_size: u32,
        nb_workers: u32,
        mut handlers: Vec<Box<dyn DirentHandler>>,
    ) -> Result<Self> {
        let raw = path.to_string_lossy();
        let base = raw.strip_suffix(".zim").unwrap_or(&raw).to_owned();
        let tmp_path = PathBuf::from(format!("{base}.zim.tmp"));
        let final_path = PathBuf::from(format!("{base}.zim"));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .wrap_err_with(|| format!("cannot create file '{}'", tmp_path.display()))?;

        let errors = Arc::new(ErrorSlot::new());
        let is_extended = Arc::new(AtomicBool::new(false));
        let task_queue = Arc::new(BoundedQueue::new(TASK_QUEUE_CAPACITY));
        let write_queue = Arc::new(BoundedQueue::new(usize::MAX));

        let mut workers = Vec::with_capacity(nb_workers as usize);
        for i in 0..nb_workers {
            let queue = Arc::clone(&task_queue);
            let errors = Arc::clone(&errors);
            let worker = std::thread::Builder::new()
                .name(format!("zim-worker-{i}"))
                .spawn(move || worker_loop(&queue, &errors))
                .wrap_err("failed to spawn compression worker")?;
            workers.push(worker);
        }

        let writer_thread = {
            let queue = Arc::clone(&write_queue);
            let errors = Arc::clone(&errors);
            let extended = Arc::clone(&is_extended);
            std::thread::Builder::new()
                .name("zim-writer".to_owned())
                .spawn(move || {
                    let result = writer_loop(&queue, file, &errors, &extended);
                    if let Err(err) = &result {
                        errors.record(eyre!("writer thread failed: {err:#}"));
                    }
                    result
                })
                .wrap_err("failed to spawn writer thread")?
        };

        for handler in &mut handlers {
            handler.start()?;
        }

        Ok(Self {
            tmp_path,
            final_path,
            verbose,
            compression,
            min_cluster_size,
            start_time: Instant::now(),
            entries: BTreeMap::new(),
            mime_map: HashMap::new(),
            mime_rev: Vec::new(),
            comp_cluster: Arc::new(Cluster::new(compression)),
            uncomp_cluster: Arc::new(Cluster::new(Compression::None)),
            clusters: Vec::new(),
            task_queue,
            write_queue,
            workers,
            writer_thread: Some(writer_thread),
            errors,
            is_extended,
            handlers,
            handler_keys: Vec::new(),
            main_page_key: None,
            title_index: Vec::new(),
            content_titles: Vec::new(),
            n_redirects: 0,
            n_comp_items: 0,
            n_uncomp_items: 0,
            n_comp_clusters: 0,
            n_uncomp_clusters: 0,
        })
    }

    fn add_item(&mut self, item: &dyn Item) -> Result<()> {
        let path = item.path();
        let title = item.title();
        let mut mimetype = item.mimetype();
        if mimetype.is_empty() {
            warn!(path = %path, "item has an empty mimetype, using application/octet-stream");
            mimetype = "application/octet-stream".to_owned();
        }

        let compress = item
            .hints()
            .compress
            .unwrap_or_else(|| is_compressible_mimetype(&mimetype));
        let mime = self.mime_index(&mimetype)?;

        let key = (NS_CONTENT, path.clone());
        if self.insert_entry(key.clone(), title.clone(), RecordKind::PendingItem { mime }) {
            let provider = item.content_provider()?;
            self.add_item_data(&key, provider, compress)?;
        }

        self.run_handlers(
            &HandledDirent {
                namespace: NS_CONTENT,
                path: &path,
                title: &title,
                is_redirect: false,
            },
            Some(item),
        )?;

        self.progress_tick();
        Ok(())
    }

    fn add_metadata(
        &mut self,
        name: &str,
        content: ContentProvider,
        mimetype: &str,
    ) -> Result<()> {
        let compress = is_compressible_mimetype(mimetype);
        let mime = self.mime_index(mimetype)?;

        let key = (NS_METADATA, name.to_owned());
        if self.insert_entry(key.clone(), String::new(), RecordKind::PendingItem { mime }) {
            self.add_item_data(&key, content, compress)?;
        }

        self.run_handlers(
            &HandledDirent {
                namespace: NS_METADATA,
                path: name,
                title: "",
                is_redirect: false,
            },
            None,
        )
    }

    fn add_redirection(&mut self, path: &str, title: &str, target_path: &str) -> Result<()> {
        self.insert_entry(
            (NS_CONTENT, path.to_owned()),
            title.to_owned(),
            RecordKind::Redirect {
                target_ns: NS_CONTENT,
                target_path: target_path.to_owned(),
                target: None,
            },
        );

        self.run_handlers(
            &HandledDirent {
                namespace: NS_CONTENT,
                path,
                title,
                is_redirect: true,
            },
            None,
        )?;

        self.progress_tick();
        Ok(())
    }

    /// Inserts with the duplicate policy: a non-redirect replaces an
    /// existing redirect; any other collision keeps the existing entry.
    /// Returns whether the new entry is now in the set.
    fn insert_entry(&mut self, key: EntryKey, title: String, kind: RecordKind) -> bool {
        use std::collections::btree_map::Entry as MapEntry;

        let is_redirect = matches!(kind, RecordKind::Redirect { .. });
        match self.entries.entry(key) {
            MapEntry::Vacant(vacant) => {
                vacant.insert(EntryRecord {
                    title,
                    kind,
                    index: 0,
                });
                if is_redirect {
                    self.n_redirects += 1;
                }
                true
            }
            MapEntry::Occupied(mut occupied) => {
                let existing_is_redirect =
                    matches!(occupied.get().kind, RecordKind::Redirect { .. });
                if existing_is_redirect && !is_redirect {
                    occupied.insert(EntryRecord {
                        title,
                        kind,
                        index: 0,
                    });
                    self.n_redirects -= 1;
                    true
                } else {
                    let (namespace, path) = occupied.key();
                    warn!(
                        "{}",
                        ZimError::DuplicateDirent {
                            namespace: *namespace as char,
                            path: path.clone(),
                        }
                    );
                    false
                }
            }
        }
    }

    /// Routes a blob to the open cluster for its compressibility class,
    /// closing the cluster first if this blob would cross the size target.
    fn add_item_data(
        &mut self,
        key: &EntryKey,
        provider: ContentProvider,
        compress: bool,
    ) -> Result<()> {
        let item_size = provider.size();
        let target = self.min_cluster_size as u64 * 1024;

        let open = if compress {
            &self.comp_cluster
        } else {
            &self.uncomp_cluster
        };
        if open.count() >= 1 && open.estimated_size() + item_size >= target {
            debug!(
                blobs = open.count(),
                bytes = open.estimated_size(),
                compress,
                "closing cluster"
            );
            self.close_cluster(compress);
        }

        let open = if compress {
            &self.comp_cluster
        } else {
            &self.uncomp_cluster
        };
        let blob = open.add_content(provider);
        let cluster = Arc::clone(open);

        let record = self
            .entries
            .get_mut(key)
            .expect("entry inserted before its data");
        let mime = match record.kind {
            RecordKind::PendingItem { mime } => mime,
            _ => unreachable!("add_item_data on a non-pending entry"),
        };
        record.kind = RecordKind::Item {
            mime,
            cluster,
            blob,
        };

        if compress {
            self.n_comp_items += 1;
        } else {
            self.n_uncomp_items += 1;
        }
        Ok(())
    }

    /// Stamps the open cluster with its final index and hands it to the
    /// workers and the writer. Pushing to the bounded task queue is the
    /// creator's backpressure point.
    fn close_cluster(&mut self, compressed: bool) {
        let replacement = Arc::new(Cluster::new(if compressed {
            self.compression
        } else {
            Compression::None
        }));
        let cluster = if compressed {
            self.n_comp_clusters += 1;
            std::mem::replace(&mut self.comp_cluster, replacement)
        } else {
            self.n_uncomp_clusters += 1;
            std::mem::replace(&mut self.uncomp_cluster, replacement)
        };

        cluster.set_index(self.clusters.len() as u32);
        self.clusters.push(Arc::clone(&cluster));
        self.write_queue.push(Arc::clone(&cluster));
        // The bounded push; this is where add_item blocks under backpressure.
        self.task_queue.push(cluster);
    }

    fn mime_index(&mut self, mimetype: &str) -> Result<u16> {
        if let Some(&index) = self.mime_map.get(mimetype) {
            return Ok(index);
        }
        ensure!(
            self.mime_rev.len() < u16::MAX as usize,
            ZimError::MimeTableOverflow
        );
        let index = self.mime_rev.len() as u16;
        self.mime_map.insert(mimetype.to_owned(), index);
        self.mime_rev.push(mimetype.to_owned());
        Ok(index)
    }

    fn run_handlers(&mut self, dirent: &HandledDirent<'_>, item: Option<&dyn Item>) -> Result<()> {
        for handler in &mut self.handlers {
            handler.handle(dirent, item)?;
        }
        Ok(())
    }

    fn finish(
        &mut self,
        uuid: Uuid,
        main_path: Option<&str>,
        favicon_path: Option<&str>,
    ) -> Result<()> {
        if let Some(favicon) = favicon_path {
            self.insert_entry(
                (NS_INTERNAL, "favicon".to_owned()),
                String::new(),
                RecordKind::Redirect {
                    target_ns: NS_CONTENT,
                    target_path: favicon.to_owned(),
                    target: None,
                },
            );
        }
        if let Some(main) = main_path {
            let key = (NS_INTERNAL, "mainPage".to_owned());
            if self.insert_entry(
                key.clone(),
                String::new(),
                RecordKind::Redirect {
                    target_ns: NS_CONTENT,
                    target_path: main.to_owned(),
                    target: None,
                },
            ) {
                self.main_page_key = Some(key);
            }
        }

        // Materialize handler entries so they take part in ordering and
        // indexing before anything is fixed up.
        let handler_dirents: Vec<_> = self.handlers.iter().map(|h| h.dirent()).collect();
        for spec in handler_dirents {
            let key = match spec {
                Some(spec) => {
                    let mime = self.mime_index(&spec.mimetype)?;
                    let key = (spec.namespace, spec.path);
                    if self.insert_entry(key.clone(), spec.title, RecordKind::PendingItem { mime })
                    {
                        Some(key)
                    } else {
                        None
                    }
                }
                None => None,
            };
            self.handler_keys.push(key);
        }

        self.info("resolve redirects");
        self.resolve_redirects();

        self.info("set entry indexes");
        self.assign_entry_indexes();

        self.info("resolve mimetypes");
        self.renumber_mime_types();

        self.info("create title index");
        self.build_title_index();

        self.link_redirect_targets();

        // Stop handlers and route their content through the ordinary
        // cluster pipeline, uncompressed.
        let mut contents: Vec<(EntryKey, Vec<u8>)> = Vec::new();
        {
            let entries = &self.entries;
            let lookup = |namespace: u8, path: &str| {
                entries
                    .get(&(namespace, path.to_owned()))
                    .map(|record| record.index)
            };
            let ctx = FinishContext::new(&self.content_titles, &lookup);
            for (handler, key) in self.handlers.iter_mut().zip(&self.handler_keys) {
                handler.stop()?;
                if let Some(key) = key {
                    contents.push((key.clone(), handler.take_content(&ctx)?));
                }
            }
        }
        for (key, content) in contents {
            self.add_item_data(&key, content.into(), false)?;
        }

        if self.comp_cluster.count() > 0 {
            self.close_cluster(true);
        }
        if self.uncomp_cluster.count() > 0 {
            self.close_cluster(false);
        }

        self.info("waiting for workers");
        self.task_queue.close();
        for worker in self.workers.drain(..) {
            worker.join().map_err(|_| eyre!("compression worker panicked"))?;
        }

        self.write_queue.close();
        let outcome = self
            .writer_thread
            .take()
            .expect("writer thread joined once")
            .join()
            .map_err(|_| eyre!("writer thread panicked"))??;

        if self.errors.is_set() {
            return Err(self
                .errors
                .take()
                .unwrap_or_else(|| eyre!(ZimError::CreatorErrored)));
        }

        self.info(&format!(
            "{} entries, {} clusters created",
            self.entries.len(),
            self.clusters.len()
        ));

        self.info("write archive");
        self.write_file(outcome, uuid)?;

        self.info("rename temp file");
        std::fs::rename(&self.tmp_path, &self.final_path).wrap_err_with(|| {
            format!(
                "failed to rename '{}' to '{}'",
                self.tmp_path.display(),
                self.final_path.display()
            )
        })?;

        self.info("finish");
        Ok(())
    }

    /// Drops redirects whose target path does not exist, repeating until a
    /// fixpoint so chains into dropped redirects die too.
    fn resolve_redirects(&mut self) {
        loop {
            let mut to_drop = Vec::new();
            for ((namespace, path), record) in &self.entries {
                if let RecordKind::Redirect {
                    target_ns,
                    target_path,
                    ..
                } = &record.kind
                {
                    if !self
                        .entries
                        .contains_key(&(*target_ns, target_path.clone()))
                    {
                        warn!(
                            "{}",
                            ZimError::InvalidRedirect {
                                namespace: *namespace as char,
                                path: path.clone(),
                                target_namespace: *target_ns as char,
                                target_path: target_path.clone(),
                            }
                        );
                        to_drop.push((*namespace, path.clone()));
                    }
                }
            }
            if to_drop.is_empty() {
                break;
            }
            for key in to_drop {
                self.entries.remove(&key);
                self.n_redirects -= 1;
                if self.main_page_key.as_ref() == Some(&key) {
                    self.main_page_key = None;
                }
            }
        }
    }

    fn assign_entry_indexes(&mut self) {
        for (index, record) in self.entries.values_mut().enumerate() {
            record.index = index as u32;
        }
    }

    /// Replaces first-seen mimetype numbering with indexes into the sorted
    /// list that is written to the file.
    fn renumber_mime_types(&mut self) {
        let mut sorted = self.mime_rev.clone();
        sorted.sort();

        let mapping: Vec<u16> = self
            .mime_rev
            .iter()
            .map(|mime| {
                sorted
                    .iter()
                    .position(|s| s == mime)
                    .expect("sorted list is a permutation") as u16
            })
            .collect();

        for record in self.entries.values_mut() {
            match &mut record.kind {
                RecordKind::Item { mime, .. } | RecordKind::PendingItem { mime } => {
                    *mime = mapping[*mime as usize];
                }
                RecordKind::Redirect { .. } => {}
            }
        }
        self.mime_rev = sorted;
    }

    fn build_title_index(&mut self) {
        let mut order: Vec<(u8, &str, &str, u32)> = self
            .entries
            .iter()
            .map(|((namespace, path), record)| {
                let title = if record.title.is_empty() {
                    path.as_str()
                } else {
                    record.title.as_str()
                };
                (*namespace, title, path.as_str(), record.index)
            })
            .collect();
        order.sort();

        self.title_index = order.iter().map(|&(_, _, _, index)| index).collect();
        self.content_titles = order
            .iter()
            .filter(|&&(namespace, ..)| namespace == NS_CONTENT)
            .map(|&(_, _, _, index)| index)
            .collect();
    }

    /// Rewrites each surviving redirect's target key into the target's
    /// final entry index.
    fn link_redirect_targets(&mut self) {
        let targets: Vec<(EntryKey, u32)> = self
            .entries
            .iter()
            .filter_map(|(key, record)| match &record.kind {
                RecordKind::Redirect {
                    target_ns,
                    target_path,
                    ..
                } => {
                    let target = self.entries[&(*target_ns, target_path.clone())].index;
                    Some((key.clone(), target))
                }
                _ => None,
            })
            .collect();

        for (key, index) in targets {
            if let Some(record) = self.entries.get_mut(&key) {
                if let RecordKind::Redirect { target, .. } = &mut record.kind {
                    *target = Some(index);
                }
            }
        }
    }

    /// Writes dirents, the three pointer tables, the header, the mimetype
    /// list and the MD5 trailer, in that order.
    fn write_file(&mut self, outcome: WriterOutcome, uuid: Uuid) -> Result<()> {
        let WriterOutcome {
            mut file,
            cluster_offsets,
        } = outcome;
        ensure!(
            cluster_offsets.len() == self.clusters.len(),
            "writer thread recorded {} cluster offsets, expected {}",
            cluster_offsets.len(),
            self.clusters.len()
        );

        let mut pos = file.seek(SeekFrom::End(0))?;
        if pos < CLUSTER_BASE_OFFSET {
            // No clusters were written; pad the reserved region with zeros.
            file.set_len(CLUSTER_BASE_OFFSET)?;
            pos = CLUSTER_BASE_OFFSET;
            file.seek(SeekFrom::Start(pos))?;
        }
        let mut out = BufWriter::new(file);

        let mut dirent_offsets = Vec::with_capacity(self.entries.len());
        for (key, record) in &self.entries {
            let dirent = record_to_dirent(key, record)?;
            let bytes = dirent.to_bytes();
            debug_assert_eq!(bytes.len(), dirent.disk_size());
            dirent_offsets.push(pos);
            out.write_all(&bytes)?;
            pos += bytes.len() as u64;
        }

        let url_ptr_pos = pos;
        for offset in &dirent_offsets {
            out.write_all(&offset.to_le_bytes())?;
        }
        pos += 8 * dirent_offsets.len() as u64;

        let title_idx_pos = pos;
        for index in &self.title_index {
            out.write_all(&index.to_le_bytes())?;
        }
        pos += 4 * self.title_index.len() as u64;

        let cluster_ptr_pos = pos;
        for offset in &cluster_offsets {
            out.write_all(&offset.to_le_bytes())?;
        }
        pos += 8 * cluster_offsets.len() as u64;

        let checksum_pos = pos;
        out.flush()?;
        let mut file = out.into_inner().map_err(|e| eyre!("flush failed: {e}"))?;

        let main_page = self
            .main_page_key
            .as_ref()
            .and_then(|key| self.entries.get(key))
            .map(|record| record.index)
            .unwrap_or(ENTRY_INDEX_NONE);

        let header = Fileheader::new(
            self.is_extended.load(Ordering::Acquire),
            uuid,
            self.entries.len() as u32,
            self.clusters.len() as u32,
            url_ptr_pos,
            title_idx_pos,
            cluster_ptr_pos,
            MIME_LIST_OFFSET,
            main_page,
            checksum_pos,
        );

        file.seek(SeekFrom::Start(0))?;
        file.write_all(zerocopy::IntoBytes::as_bytes(&header))?;

        for mime in &self.mime_rev {
            file.write_all(mime.as_bytes())?;
            file.write_all(&[0])?;
        }
        file.write_all(&[0])?;
        ensure!(
            file.stream_position()? < CLUSTER_BASE_OFFSET,
            "mimetype list overflows the reserved header region"
        );

        file.seek(SeekFrom::Start(0))?;
        let digest = md5_stream(&mut file, checksum_pos)?;
        file.write_all(&digest)?;
        file.sync_all().wrap_err("failed to sync archive")?;

        Ok(())
    }

    fn progress_tick(&self) {
        if self.verbose && self.entries.len() % PROGRESS_INTERVAL == 0 {
            eprintln!(
                "T:{}; A:{}; RA:{}; CA:{}; UA:{}; C:{}; CC:{}; UC:{}; WC:{}",
                self.start_time.elapsed().as_secs(),
                self.entries.len(),
                self.n_redirects,
                self.n_comp_items,
                self.n_uncomp_items,
                self.clusters.len(),
                self.n_comp_clusters,
                self.n_uncomp_clusters,
                self.task_queue.len(),
            );
        }
    }

    fn info(&self, message: &str) {
        debug!("{}", message);
        if self.verbose {
            eprintln!("T:{}; {}", self.start_time.elapsed().as_secs(), message);
        }
    }
}

impl Drop for CreatorData {
    fn drop(&mut self) {
        // Unblock and retire any threads still running (finish already
        // drained these in the normal path).
        self.task_queue.close();
        self.write_queue.close();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(writer) = self.writer_thread.take() {
            let _ = writer.join();
        }
    }
}

fn record_to_dirent(key: &EntryKey, record: &EntryRecord) -> Result<Dirent> {
    let (namespace, path) = key;
    match &record.kind {
        RecordKind::Item {
            mime,
            cluster,
            blob,
        } => Ok(Dirent::new_item(
            *namespace,
            path.clone(),
            record.title.clone(),
            *mime,
            cluster.index(),
            *blob,
        )),
        RecordKind::Redirect {
            target: Some(target),
            ..
        } => Ok(Dirent::new_redirect(
            *namespace,
            path.clone(),
            record.title.clone(),
            *target,
        )),
        RecordKind::Redirect { target: None, .. } => {
            bail!("unresolved redirect survived to write: {}/{}", *namespace as char, path)
        }
        RecordKind::PendingItem { .. } => {
            bail!("entry without content survived to write: {}/{}", *namespace as char, path)
        }
    }
}

fn worker_loop(queue: &BoundedQueue<Arc<Cluster>>, errors: &ErrorSlot) {
    while let Some(cluster) = queue.pop() {
        if let Err(err) = cluster.compress() {
            errors.record(err.wrap_err("cluster compression failed"));
        }
    }
}

/// Writes compressed cluster bodies in close order, starting at the
/// reserved base offset, and records each cluster's file offset.
fn writer_loop(
    queue: &BoundedQueue<Arc<Cluster>>,
    mut file: File,
    errors: &ErrorSlot,
    extended: &AtomicBool,
) -> Result<WriterOutcome> {
    let mut offset = CLUSTER_BASE_OFFSET;
    file.seek(SeekFrom::Start(offset))?;

    let mut cluster_offsets = Vec::new();
    while let Some(cluster) = queue.pop() {
        let (data, is_extended) = cluster.take_data(&|| errors.is_set())?;
        debug_assert_eq!(cluster.index() as usize, cluster_offsets.len());

        file.write_all(&data)
            .wrap_err_with(|| format!("failed to write cluster {}", cluster.index()))?;
        cluster_offsets.push(offset);
        offset += data.len() as u64;

        if is_extended {
            extended.store(true, Ordering::Release);
        }
    }

    Ok(WriterOutcome {
        file,
        cluster_offsets,
    })
}
