/// Collection ingestion
///
/// This module handles:
/// - Scanning a collection root for candidate images
/// - Fanning extraction out to a bounded pool of worker threads (worker.rs)
/// - Folding completions into the index and into weighted progress
///   batches (progress.rs)
pub mod progress;
pub mod worker;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{GalleryError, Result};
use crate::metadata::MetadataExtractor;
use crate::state::index::ImageIndex;
use crate::state::library::Library;
use progress::ProgressBatcher;
use worker::{run_unit, UnitReport};

/// How often a coordinator blocked on dispatch re-checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Ingestion tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Worker threads per run.
    pub workers: usize,
    /// Weight at which a progress batch is emitted.
    pub batch_threshold: u32,
    /// Weight of a freshly extracted file.
    pub fresh_weight: u32,
    /// Weight of a cache hit.
    pub reuse_weight: u32,
    /// Accepted file extensions, compared case-insensitively.
    pub extensions: Vec<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().clamp(2, 8),
            batch_threshold: 64,
            fresh_weight: 8,
            reuse_weight: 1,
            extensions: vec!["png".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Scanning,
    Dispatching,
    Aggregating,
    Complete,
    Cancelled,
}

impl IngestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, IngestState::Complete | IngestState::Cancelled)
    }
}

/// Totals for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub root: PathBuf,
    /// Candidate files found by the scan.
    pub total: usize,
    /// Files run through the extractor this time.
    pub extracted: usize,
    /// Files served from the cache.
    pub reused: usize,
    /// Files that could not be opened or decoded.
    pub failed: usize,
    /// Indexed records carrying an extraction diagnostic.
    pub extraction_errors: usize,
    /// Files whose cache row could not be read or written.
    pub store_warnings: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl IngestSummary {
    /// Files that reached the index.
    pub fn indexed(&self) -> usize {
        self.extracted + self.reused
    }
}

/// What an ingestion run reports to its consumer, in order: any number of
/// batches, then exactly one terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// Paths that landed in the index since the previous batch.
    Batch(Vec<PathBuf>),
    Complete(IngestSummary),
    Cancelled(IngestSummary),
}

impl IngestEvent {
    pub fn summary(&self) -> Option<&IngestSummary> {
        match self {
            IngestEvent::Batch(_) => None,
            IngestEvent::Complete(summary) | IngestEvent::Cancelled(summary) => Some(summary),
        }
    }
}

#[derive(Debug)]
struct Shared {
    cancelled: AtomicBool,
    state: Mutex<IngestState>,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn set_state(&self, state: IngestState) {
        let mut current = self.state.lock();
        if !current.is_terminal() {
            let from = *current;
            debug!(?from, to = ?state, "Ingestion state change");
            *current = state;
        }
    }
}

/// Runs ingestion over collection roots, one fresh index per run.
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    store: Arc<Library>,
    extractor: Arc<MetadataExtractor>,
    options: IngestOptions,
}

impl IngestionPipeline {
    pub fn new(store: Arc<Library>, extractor: Arc<MetadataExtractor>, options: IngestOptions) -> Self {
        Self {
            store,
            extractor,
            options,
        }
    }

    pub fn store(&self) -> &Arc<Library> {
        &self.store
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Start ingesting `root` on a background coordinator thread.
    ///
    /// Fails only when `root` is missing or not a directory. Everything
    /// else is reported through the returned handle's events.
    pub fn ingest(&self, root: &Path, force_refresh: bool) -> Result<IngestHandle> {
        let root = root
            .canonicalize()
            .map_err(|_| GalleryError::RootNotFound(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(GalleryError::NotADirectory(root));
        }

        let shared = Arc::new(Shared {
            cancelled: AtomicBool::new(false),
            state: Mutex::new(IngestState::Idle),
        });
        let index = Arc::new(ImageIndex::new());
        let (events_tx, events_rx) = unbounded();

        let coordinator = Coordinator {
            root: root.clone(),
            force_refresh,
            store: Arc::clone(&self.store),
            extractor: Arc::clone(&self.extractor),
            options: self.options.clone(),
            index: Arc::clone(&index),
            shared: Arc::clone(&shared),
            events: events_tx,
        };
        let handle = thread::Builder::new()
            .name("ingest-coordinator".to_string())
            .spawn(move || coordinator.run())?;

        Ok(IngestHandle {
            root,
            events: events_rx,
            shared,
            index,
            coordinator: Some(handle),
        })
    }
}

/// Consumer side of a running ingestion.
///
/// Dropping the handle before [`IngestHandle::wait`] cancels the run.
#[derive(Debug)]
pub struct IngestHandle {
    root: PathBuf,
    events: Receiver<IngestEvent>,
    shared: Arc<Shared>,
    index: Arc<ImageIndex>,
    coordinator: Option<JoinHandle<IngestSummary>>,
}

impl IngestHandle {
    /// Canonical collection root being ingested.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next event; `None` once the run has finished and every event was read.
    pub fn recv(&self) -> Option<IngestEvent> {
        self.events.recv().ok()
    }

    /// Blocking iterator over the remaining events.
    pub fn iter(&self) -> impl Iterator<Item = IngestEvent> + '_ {
        self.events.iter()
    }

    /// Raw receiver, for use in a caller's own `select!`.
    pub fn events(&self) -> &Receiver<IngestEvent> {
        &self.events
    }

    /// Stop dispatching new files. Units already running finish and persist.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn state(&self) -> IngestState {
        *self.shared.state.lock()
    }

    /// The index this run fills. Authoritative once the run is complete.
    pub fn index(&self) -> Arc<ImageIndex> {
        Arc::clone(&self.index)
    }

    /// Block until the coordinator finishes and return its summary.
    pub fn wait(mut self) -> Result<IngestSummary> {
        let handle = self.coordinator.take().ok_or(GalleryError::CoordinatorPanicked)?;
        handle.join().map_err(|_| GalleryError::CoordinatorPanicked)
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        if self.coordinator.is_some() {
            self.shared.cancel();
        }
    }
}

struct Coordinator {
    root: PathBuf,
    force_refresh: bool,
    store: Arc<Library>,
    extractor: Arc<MetadataExtractor>,
    options: IngestOptions,
    index: Arc<ImageIndex>,
    shared: Arc<Shared>,
    events: Sender<IngestEvent>,
}

impl Coordinator {
    fn run(self) -> IngestSummary {
        let started = Instant::now();
        let mut summary = IngestSummary {
            root: self.root.clone(),
            ..IngestSummary::default()
        };
        let mut batcher = ProgressBatcher::new(
            self.options.batch_threshold,
            self.options.fresh_weight,
            self.options.reuse_weight,
        );

        self.shared.set_state(IngestState::Scanning);
        let candidates = scan(&self.root, &self.options.extensions);
        summary.total = candidates.len();
        info!(
            root = %self.root.display(),
            candidates = summary.total,
            force_refresh = self.force_refresh,
            "Scanned collection"
        );

        self.shared.set_state(IngestState::Dispatching);
        if !candidates.is_empty() && !self.shared.is_cancelled() {
            self.dispatch(candidates, &mut summary, &mut batcher);
        }

        if let Some(batch) = batcher.flush() {
            self.emit(IngestEvent::Batch(batch));
        }

        summary.cancelled = self.shared.is_cancelled();
        summary.elapsed = started.elapsed();
        info!(
            root = %self.root.display(),
            total = summary.total,
            extracted = summary.extracted,
            reused = summary.reused,
            failed = summary.failed,
            extraction_errors = summary.extraction_errors,
            store_warnings = summary.store_warnings,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Ingestion finished"
        );

        if summary.cancelled {
            self.shared.set_state(IngestState::Cancelled);
            self.emit(IngestEvent::Cancelled(summary.clone()));
        } else {
            self.shared.set_state(IngestState::Complete);
            self.emit(IngestEvent::Complete(summary.clone()));
        }
        summary
    }

    fn dispatch(&self, candidates: Vec<PathBuf>, summary: &mut IngestSummary, batcher: &mut ProgressBatcher) {
        let worker_count = self.options.workers.max(1).min(candidates.len());
        let (job_tx, job_rx) = bounded::<PathBuf>(worker_count * 2);
        let (done_tx, done_rx) = unbounded::<UnitReport>();

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            match self.spawn_worker(id, job_rx.clone(), done_tx.clone()) {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(worker = id, error = %e, "Failed to spawn ingest worker"),
            }
        }
        drop(job_rx);
        drop(done_tx);

        let mut queue = candidates.into_iter().peekable();

        if workers.is_empty() {
            warn!("No ingest workers available, extracting on the coordinator");
            for path in queue {
                if self.shared.is_cancelled() {
                    break;
                }
                let report = run_unit(&self.store, &self.extractor, &path, self.force_refresh);
                self.absorb(report, summary, batcher);
            }
            return;
        }

        let mut job_tx = Some(job_tx);
        loop {
            if job_tx.is_some() && (self.shared.is_cancelled() || queue.peek().is_none()) {
                // closing the job channel lets idle workers exit
                job_tx = None;
                if !self.shared.is_cancelled() {
                    self.shared.set_state(IngestState::Aggregating);
                }
            }

            if let (Some(tx), Some(path)) = (&job_tx, queue.peek().cloned()) {
                select! {
                    send(tx, path) -> sent => {
                        if sent.is_ok() {
                            queue.next();
                        }
                    }
                    recv(done_rx) -> report => {
                        if let Ok(report) = report {
                            self.absorb(report, summary, batcher);
                        }
                    }
                    default(CANCEL_POLL) => {}
                }
            } else {
                match done_rx.recv() {
                    Ok(report) => self.absorb(report, summary, batcher),
                    Err(_) => break,
                }
            }
        }

        for handle in workers {
            if handle.join().is_err() {
                warn!("Ingest worker exited abnormally");
            }
        }
    }

    fn spawn_worker(
        &self,
        id: usize,
        jobs: Receiver<PathBuf>,
        done: Sender<UnitReport>,
    ) -> std::io::Result<JoinHandle<()>> {
        let store = Arc::clone(&self.store);
        let extractor = Arc::clone(&self.extractor);
        let shared = Arc::clone(&self.shared);
        let force_refresh = self.force_refresh;

        thread::Builder::new()
            .name(format!("ingest-worker-{}", id))
            .spawn(move || {
                for path in jobs.iter() {
                    // queued but not started: drop it
                    if shared.is_cancelled() {
                        continue;
                    }
                    let report = run_unit(&store, &extractor, &path, force_refresh);
                    if done.send(report).is_err() {
                        break;
                    }
                }
            })
    }

    fn absorb(&self, report: UnitReport, summary: &mut IngestSummary, batcher: &mut ProgressBatcher) {
        match report {
            UnitReport::Indexed {
                record,
                fresh,
                store_warning,
            } => {
                if fresh {
                    summary.extracted += 1;
                } else {
                    summary.reused += 1;
                }
                if record.has_error() {
                    summary.extraction_errors += 1;
                }
                if store_warning.is_some() {
                    summary.store_warnings += 1;
                }

                let path = record.image_path.clone();
                self.index.put(record);
                if let Some(batch) = batcher.record(path, fresh) {
                    self.emit(IngestEvent::Batch(batch));
                }
            }
            UnitReport::Unreadable { path, reason } => {
                debug!(path = %path.display(), reason = %reason, "Excluded from index");
                summary.failed += 1;
            }
        }
    }

    /// A consumer that hung up no longer wants the run.
    fn emit(&self, event: IngestEvent) {
        if self.events.send(event).is_err() && !self.shared.is_cancelled() {
            debug!(root = %self.root.display(), "Event receiver dropped, cancelling");
            self.shared.cancel();
        }
    }
}

/// Files under `root` with an accepted extension, sorted by path.
fn scan(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_extension(path, extensions))
        .collect();
    files.sort();
    files
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy())
        .map_or(false, |ext| extensions.iter().any(|accepted| accepted.eq_ignore_ascii_case(&ext)))
}
