//! Scoped pool of render worker threads
//!
//! Pages are split into contiguous chunks, chunk `i` goes to worker `i % N`.
//! Each worker owns a private job channel; all workers answer on one shared
//! response channel. Dropping the pool closes the job channels and joins the
//! workers that are idle.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use image::RgbaImage;
use log::{debug, warn};

use super::request::{BatchId, RenderError, RenderJob, RenderResponse};
use crate::note::{NoteDocument, PageStrokes, StrokeRasterizer};
use crate::panic_handler::RENDER_THREAD_PREFIX;

pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Worker count leaving one core to the caller, at least 1
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Split `indices` into at most `workers` contiguous chunks of
/// `ceil(len / workers)` pages
#[must_use]
pub fn partition(indices: &[usize], workers: usize) -> Vec<Vec<usize>> {
    if indices.is_empty() {
        return Vec::new();
    }
    let size = indices.len().div_ceil(workers.max(1));
    indices.chunks(size).map(<[usize]>::to_vec).collect()
}

/// Outcome of one batch. Every requested index is in exactly one map.
#[derive(Debug, Default)]
pub struct RenderBatch {
    pub images: BTreeMap<usize, RgbaImage>,
    pub failures: BTreeMap<usize, RenderError>,
}

impl RenderBatch {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Shared flag that stops workers between pages
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub workers: usize,
    /// Deadline for each chunk, measured from dispatch
    pub timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }
}

struct Worker {
    jobs: Option<Sender<RenderJob>>,
    handle: Option<JoinHandle<()>>,
    /// Missed a deadline and may still be running
    hung: bool,
}

pub struct RenderPool {
    workers: Vec<Worker>,
    responses: Receiver<RenderResponse>,
    cancel: CancelToken,
    timeout: Duration,
    next_batch: u64,
}

impl RenderPool {
    #[must_use]
    pub fn new(rasterizer: Arc<dyn StrokeRasterizer>, config: PoolConfig) -> Self {
        let cancel = CancelToken::default();
        let (response_tx, response_rx) = flume::unbounded();

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let (job_tx, job_rx) = flume::unbounded();
                let rasterizer = Arc::clone(&rasterizer);
                let responses = response_tx.clone();
                let cancel = cancel.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("{RENDER_THREAD_PREFIX}{id}"))
                    .spawn(move || render_worker(rasterizer.as_ref(), job_rx, responses, cancel));
                let handle = match handle {
                    Ok(h) => Some(h),
                    Err(e) => {
                        warn!("Failed to spawn render worker {id}: {e}");
                        None
                    }
                };
                Worker {
                    jobs: handle.as_ref().map(|_| job_tx),
                    handle,
                    hung: false,
                }
            })
            .collect();

        Self {
            workers,
            responses: response_rx,
            cancel,
            timeout: config.timeout,
            next_batch: 0,
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Render the given page indices of `document`
    pub fn render_pages(&mut self, document: &NoteDocument, indices: &[usize]) -> RenderBatch {
        let mut batch = RenderBatch::default();
        let mut pages = Vec::with_capacity(indices.len());
        for &index in indices {
            match document.page(index) {
                Some(page) => pages.push(page.strokes.clone()),
                None => {
                    batch.failures.insert(index, RenderError::NoSuchPage(index));
                }
            }
        }
        let rendered = self.render(pages);
        batch.images.extend(rendered.images);
        batch.failures.extend(rendered.failures);
        batch
    }

    /// Render already extracted page data
    pub fn render(&mut self, mut pages: Vec<PageStrokes>) -> RenderBatch {
        let mut batch = RenderBatch::default();
        if pages.is_empty() {
            return batch;
        }
        pages.sort_by_key(|p| p.index);

        if self.cancel.is_cancelled() {
            for page in pages {
                batch.failures.insert(page.index, RenderError::Cancelled);
            }
            return batch;
        }

        let id = BatchId(self.next_batch);
        self.next_batch += 1;

        let indices: Vec<usize> = pages.iter().map(|p| p.index).collect();
        let chunks = partition(&indices, self.workers.len());
        let mut pages = pages.into_iter();

        // chunk -> indices still unanswered
        let mut pending: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        let mut chunk_worker: BTreeMap<usize, usize> = BTreeMap::new();

        for (chunk, chunk_indices) in chunks.iter().enumerate() {
            let chunk_pages: Vec<PageStrokes> = pages.by_ref().take(chunk_indices.len()).collect();
            let worker_id = chunk % self.workers.len();
            let worker = &self.workers[worker_id];

            let sent = worker.jobs.as_ref().is_some_and(|jobs| {
                jobs.send(RenderJob {
                    batch: id,
                    chunk,
                    pages: chunk_pages,
                })
                .is_ok()
            });
            if sent {
                pending.insert(chunk, chunk_indices.iter().copied().collect());
                chunk_worker.insert(chunk, worker_id);
            } else {
                warn!("Render worker {worker_id} unavailable, failing chunk {chunk}");
                for &index in chunk_indices {
                    batch.failures.insert(index, RenderError::WorkerGone);
                }
            }
        }

        debug!(
            "Batch {}: {} pages in {} chunks across {} workers",
            id.0,
            indices.len(),
            chunks.len(),
            self.workers.len()
        );

        let deadline = Instant::now() + self.timeout;
        while !pending.is_empty() {
            match self.responses.recv_deadline(deadline) {
                Ok(RenderResponse::Page {
                    batch: b,
                    chunk,
                    index,
                    result,
                }) if b == id => {
                    if let Some(waiting) = pending.get_mut(&chunk) {
                        waiting.remove(&index);
                    }
                    match result {
                        Ok(image) => {
                            batch.images.insert(index, image);
                        }
                        Err(e) => {
                            warn!("Page {} failed to render: {e}", index + 1);
                            batch.failures.insert(index, e);
                        }
                    }
                }
                Ok(RenderResponse::ChunkDone { batch: b, chunk }) if b == id => {
                    if let Some(waiting) = pending.remove(&chunk) {
                        for index in waiting {
                            batch.failures.insert(index, RenderError::WorkerGone);
                        }
                    }
                }
                // Late answer from an earlier batch
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Render batch {} timed out after {:?} with {} chunks outstanding",
                        id.0,
                        self.timeout,
                        pending.len()
                    );
                    self.cancel.cancel();
                    for (chunk, waiting) in std::mem::take(&mut pending) {
                        if let Some(&worker_id) = chunk_worker.get(&chunk) {
                            self.workers[worker_id].hung = true;
                        }
                        for index in waiting {
                            batch.failures.insert(index, RenderError::Timeout(self.timeout));
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    for (_, waiting) in std::mem::take(&mut pending) {
                        for index in waiting {
                            batch.failures.insert(index, RenderError::WorkerGone);
                        }
                    }
                }
            }
        }

        batch
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.jobs.take();
        }
        for (id, worker) in self.workers.iter_mut().enumerate() {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            if worker.hung {
                debug!("Detaching render worker {id}");
                continue;
            }
            if handle.join().is_err() {
                warn!("Render worker {id} exited abnormally");
            }
        }
    }
}

fn render_worker(
    rasterizer: &dyn StrokeRasterizer,
    jobs: Receiver<RenderJob>,
    responses: Sender<RenderResponse>,
    cancel: CancelToken,
) {
    for job in jobs {
        for page in &job.pages {
            let result = if cancel.is_cancelled() {
                Err(RenderError::Cancelled)
            } else {
                render_page(rasterizer, page)
            };
            let sent = responses.send(RenderResponse::Page {
                batch: job.batch,
                chunk: job.chunk,
                index: page.index,
                result,
            });
            if sent.is_err() {
                return;
            }
        }
        let _ = responses.send(RenderResponse::ChunkDone {
            batch: job.batch,
            chunk: job.chunk,
        });
    }
}

fn render_page(
    rasterizer: &dyn StrokeRasterizer,
    page: &PageStrokes,
) -> Result<RgbaImage, RenderError> {
    match panic::catch_unwind(AssertUnwindSafe(|| rasterizer.rasterize(page))) {
        Ok(result) => result.map_err(RenderError::from),
        Err(payload) => Err(RenderError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
