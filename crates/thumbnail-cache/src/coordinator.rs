//! Request coordinator that owns the caches and the worker pool
//!
//! All cache state (the memory LRU and the in-flight table) lives on the
//! thread that owns the [`LoadCoordinator`]. Workers only decode and touch
//! the disk store; their results come back over a channel and are applied
//! when the owner calls [`LoadCoordinator::process_completions`]. Callbacks
//! therefore always run on the owning thread, each exactly once.
//!
//! Per key the lifecycle is: absent -> in flight -> resolved, after which
//! the in-flight record is gone and a successful result sits in the LRU.

use crate::disk::DiskStore;
use crate::error::{DecodeError, LoadError, StartError};
use crate::generate::decode_and_fit;
use crate::key::{make_key, CacheKey, ThumbnailSize};
use crate::lru::MemoryLru;
use crate::queue::{Job, JobQueue};
use crate::{CacheConfig, Thumbnail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Turns a source path into a fitted image. Runs on worker threads.
pub type Decoder = Arc<dyn Fn(&Path, ThumbnailSize) -> Result<RgbImage, DecodeError> + Send + Sync>;

type Wakeup = Arc<dyn Fn() + Send + Sync>;

/// What `request` did with the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Served from memory; the success callback has already run
    Hit,
    /// Attached to a job already in flight for the same key
    Joined,
    /// A new job was queued
    Queued,
    /// The coordinator is shut down; the error callback has already run
    Rejected,
}

/// Snapshot of cache occupancy and pending work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_items: usize,
    pub memory_bytes: usize,
    pub disk_files: usize,
    pub disk_bytes: u64,
    pub in_flight_count: usize,
    pub queue_depth: usize,
}

struct Waiter {
    on_success: Box<dyn FnOnce(&Thumbnail)>,
    on_error: Box<dyn FnOnce(&LoadError)>,
}

struct InFlight {
    source: PathBuf,
    waiters: Vec<Waiter>,
}

struct Completion {
    key: CacheKey,
    result: Result<Thumbnail, LoadError>,
}

/// Everything a worker thread needs, shared by all workers.
#[derive(Clone)]
struct WorkerContext {
    queue: JobQueue,
    disk: Arc<DiskStore>,
    decoder: Decoder,
    completions: Sender<Completion>,
    wakeup: Arc<Mutex<Option<Wakeup>>>,
    decode_count: Arc<AtomicUsize>,
}

pub struct LoadCoordinator {
    memory: MemoryLru,
    disk: Arc<DiskStore>,
    in_flight: HashMap<CacheKey, InFlight>,
    queue: JobQueue,
    completions: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    wakeup: Arc<Mutex<Option<Wakeup>>>,
    decode_count: Arc<AtomicUsize>,
    shut_down: bool,
}

impl LoadCoordinator {
    /// Start a coordinator that decodes with [`decode_and_fit`].
    pub fn new(config: CacheConfig) -> Result<Self, StartError> {
        let max_pixels = config.max_source_pixels;
        let decoder: Decoder =
            Arc::new(move |path: &Path, size: ThumbnailSize| decode_and_fit(path, size, max_pixels));
        Self::with_decoder(config, decoder)
    }

    /// Start a coordinator with a custom decode step.
    pub fn with_decoder(config: CacheConfig, decoder: Decoder) -> Result<Self, StartError> {
        let disk = Arc::new(DiskStore::open(&config.cache_dir, config.jpeg_quality)?);
        let queue = JobQueue::new();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let wakeup = Arc::new(Mutex::new(None));
        let decode_count = Arc::new(AtomicUsize::new(0));

        let context = WorkerContext {
            queue: queue.clone(),
            disk: Arc::clone(&disk),
            decoder,
            completions: sender,
            wakeup: Arc::clone(&wakeup),
            decode_count: Arc::clone(&decode_count),
        };

        let worker_count = config.worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let context = context.clone();
            let spawned = thread::Builder::new()
                .name(format!("thumbnail-worker-{}", index))
                .spawn(move || worker_loop(context));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(StartError::Spawn(e));
                }
            }
        }

        log::info!(
            "thumbnail cache at {} ({} workers, {} memory items)",
            disk.dir().display(),
            worker_count,
            config.max_memory_items
        );

        Ok(Self {
            memory: MemoryLru::new(config.max_memory_items),
            disk,
            in_flight: HashMap::new(),
            queue,
            completions: receiver,
            workers,
            wakeup,
            decode_count,
            shut_down: false,
        })
    }

    /// Install a hook that workers call after posting each result, so an
    /// event loop can schedule a [`process_completions`](Self::process_completions) pass.
    pub fn set_wakeup<F>(&self, wakeup: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.wakeup.lock() = Some(Arc::new(wakeup));
    }

    /// Ask for the thumbnail of `source` fitted into `size`.
    ///
    /// Never blocks. Exactly one of the callbacks runs exactly once: right
    /// away on a memory hit or after shutdown, otherwise from a later
    /// `process_completions` call on this thread. Callbacks must not call
    /// back into the coordinator.
    pub fn request<S, E>(
        &mut self,
        source: impl AsRef<Path>,
        size: ThumbnailSize,
        on_success: S,
        on_error: E,
    ) -> RequestOutcome
    where
        S: FnOnce(&Thumbnail) + 'static,
        E: FnOnce(&LoadError) + 'static,
    {
        let source = source.as_ref();
        let key = make_key(source, size);

        if let Some(thumbnail) = self.memory.get(&key) {
            on_success(&thumbnail);
            return RequestOutcome::Hit;
        }

        if self.shut_down {
            on_error(&LoadError::ShutDown);
            return RequestOutcome::Rejected;
        }

        let waiter = Waiter {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        };

        if let Some(record) = self.in_flight.get_mut(&key) {
            record.waiters.push(waiter);
            return RequestOutcome::Joined;
        }

        if !self.enqueue(key, source, size, false, vec![waiter]) {
            return RequestOutcome::Rejected;
        }
        RequestOutcome::Queued
    }

    /// Like [`request`](Self::request), but bound to a consumer that may go
    /// away. Only a weak reference is kept; if the consumer has been dropped
    /// by the time the result arrives, nothing is called.
    pub fn request_for<C, S, E>(
        &mut self,
        consumer: &Rc<C>,
        source: impl AsRef<Path>,
        size: ThumbnailSize,
        on_success: S,
        on_error: E,
    ) -> RequestOutcome
    where
        C: 'static,
        S: FnOnce(&C, &Thumbnail) + 'static,
        E: FnOnce(&C, &LoadError) + 'static,
    {
        let success_target = Rc::downgrade(consumer);
        let error_target = success_target.clone();
        self.request(
            source,
            size,
            move |thumbnail| {
                if let Some(consumer) = success_target.upgrade() {
                    on_success(&consumer, thumbnail);
                }
            },
            move |error| {
                if let Some(consumer) = error_target.upgrade() {
                    on_error(&consumer, error);
                }
            },
        )
    }

    /// Warm the caches for `paths` without any callbacks.
    ///
    /// Keys already in memory or in flight are skipped, except that a
    /// priority preload promotes a matching job still waiting in the normal
    /// tier. Returns the number of jobs queued or promoted.
    pub fn preload<I, P>(&mut self, paths: I, size: ThumbnailSize, priority: bool) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut scheduled = 0;
        for path in paths {
            if self.shut_down {
                break;
            }
            let source = path.as_ref();
            let key = make_key(source, size);

            if self.memory.contains(&key) {
                continue;
            }
            if self.in_flight.contains_key(&key) {
                if priority && self.queue.promote(&key) {
                    scheduled += 1;
                }
                continue;
            }
            if self.enqueue(key, source, size, priority, Vec::new()) {
                scheduled += 1;
            }
        }
        log::debug!("preload scheduled {} jobs (priority: {})", scheduled, priority);
        scheduled
    }

    /// Memory-only lookup; never schedules work.
    pub fn cached(&mut self, source: impl AsRef<Path>, size: ThumbnailSize) -> Option<Thumbnail> {
        self.memory.get(&make_key(source.as_ref(), size))
    }

    pub fn is_in_memory(&self, source: impl AsRef<Path>, size: ThumbnailSize) -> bool {
        self.memory.contains(&make_key(source.as_ref(), size))
    }

    /// Apply every result the workers have posted so far. Never blocks.
    /// Returns the number of jobs resolved.
    pub fn process_completions(&mut self) -> usize {
        let mut resolved = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.resolve(completion);
            resolved += 1;
        }
        resolved
    }

    /// Block up to `timeout` for at least one result, then apply everything
    /// available.
    pub fn wait_for_completions(&mut self, timeout: Duration) -> usize {
        if self.in_flight.is_empty() {
            return self.process_completions();
        }
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.resolve(completion);
                1 + self.process_completions()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Keep applying results until nothing is in flight or `timeout` passes.
    /// Returns `true` if the coordinator went idle.
    pub fn wait_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_for_completions(deadline - now);
        }
        true
    }

    pub fn cache_stats(&self) -> CacheStats {
        let disk = self.disk.stats().unwrap_or_else(|e| {
            log::warn!("{}", e);
            Default::default()
        });
        CacheStats {
            memory_items: self.memory.len(),
            memory_bytes: self.memory.total_bytes(),
            disk_files: disk.files,
            disk_bytes: disk.bytes,
            in_flight_count: self.in_flight.len(),
            queue_depth: self.queue.len(),
        }
    }

    pub fn clear_memory_cache(&mut self) {
        self.memory.clear();
    }

    /// Delete every disk entry. Returns how many files were removed.
    pub fn clear_disk_cache(&self) -> Result<usize, crate::StorageError> {
        let removed = self.disk.clear()?;
        log::info!("cleared {} disk cache entries", removed);
        Ok(removed)
    }

    /// Delete disk entries unused for more than `days` days.
    ///
    /// Entries still held in memory count as used now, since memory hits
    /// never reach the disk store.
    pub fn evict_older_than(&self, days: u64) -> Result<usize, crate::StorageError> {
        let touched = self.memory.keys().filter(|key| self.disk.touch(key)).count();
        log::debug!("refreshed {} disk entries held in memory", touched);
        let removed = self
            .disk
            .evict_older_than(Duration::from_secs(days.saturating_mul(24 * 60 * 60)))?;
        log::info!("evicted {} disk cache entries older than {} days", removed, days);
        Ok(removed)
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    /// How many times a worker has run the decoder (disk hits excluded).
    pub fn decode_count(&self) -> usize {
        self.decode_count.load(Ordering::SeqCst)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Stop the worker pool.
    ///
    /// Queued jobs are discarded, running ones are allowed to finish and
    /// every pending callback is dropped without being called. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let discarded = self.queue.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("thumbnail worker exited abnormally");
            }
        }

        let dropped: usize = self.in_flight.values().map(|r| r.waiters.len()).sum();
        self.in_flight.clear();
        while self.completions.try_recv().is_ok() {}

        log::info!(
            "thumbnail loader shut down ({} queued jobs discarded, {} callbacks dropped)",
            discarded,
            dropped
        );
    }

    fn enqueue(
        &mut self,
        key: CacheKey,
        source: &Path,
        size: ThumbnailSize,
        priority: bool,
        waiters: Vec<Waiter>,
    ) -> bool {
        let job = Job {
            key: key.clone(),
            source: source.to_path_buf(),
            size,
        };
        if !self.queue.push(job, priority) {
            for waiter in waiters {
                (waiter.on_error)(&LoadError::ShutDown);
            }
            return false;
        }

        log::debug!("queued {} for {} at {}", key, source.display(), size);
        self.in_flight.insert(
            key,
            InFlight {
                source: source.to_path_buf(),
                waiters,
            },
        );
        true
    }

    fn resolve(&mut self, completion: Completion) {
        let Completion { key, result } = completion;
        let Some(record) = self.in_flight.remove(&key) else {
            log::debug!("dropping result for {} with no in-flight record", key);
            return;
        };

        match result {
            Ok(thumbnail) => {
                self.memory.put(key, thumbnail.clone());
                for waiter in record.waiters {
                    (waiter.on_success)(&thumbnail);
                }
            }
            Err(error) => {
                log::warn!("failed to load {}: {}", record.source.display(), error);
                for waiter in record.waiters {
                    (waiter.on_error)(&error);
                }
            }
        }
    }
}

impl Drop for LoadCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(context: WorkerContext) {
    while let Some(job) = context.queue.pop() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| load(&context, &job)))
            .unwrap_or_else(|_| {
                Err(LoadError::WorkerPanicked {
                    path: job.source.clone(),
                })
            });

        let completion = Completion {
            key: job.key,
            result,
        };
        if context.completions.send(completion).is_err() {
            break;
        }

        let wakeup = context.wakeup.lock().clone();
        if let Some(wakeup) = wakeup {
            wakeup();
        }
    }
}

fn load(context: &WorkerContext, job: &Job) -> Result<Thumbnail, LoadError> {
    if let Some(image) = context.disk.get(&job.key) {
        return Ok(Thumbnail::new(image));
    }

    context.decode_count.fetch_add(1, Ordering::SeqCst);
    let image = (context.decoder)(&job.source, job.size)?;
    context.disk.put(&job.key, &image);
    Ok(Thumbnail::new(image))
}
