//! Two-tier FIFO feeding the worker pool
//!
//! Priority jobs are served before normal ones; within a tier order is
//! first-in first-out. Closing the queue discards whatever is still waiting
//! and wakes every blocked worker.

use crate::key::{CacheKey, ThumbnailSize};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// One decode request for a worker.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub key: CacheKey,
    pub source: PathBuf,
    pub size: ThumbnailSize,
}

#[derive(Clone, Debug)]
pub(crate) struct JobQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    priority: VecDeque<Job>,
    normal: VecDeque<Job>,
    closed: bool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Enqueue a job. Returns `false` once the queue is closed.
    pub fn push(&self, job: Job, priority: bool) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        if priority {
            state.priority.push_back(job);
        } else {
            state.normal.push_back(job);
        }
        self.inner.condvar.notify_one();
        true
    }

    /// Move a waiting normal job for `key` to the back of the priority tier.
    pub fn promote(&self, key: &CacheKey) -> bool {
        let mut state = self.inner.state.lock();
        let Some(index) = state.normal.iter().position(|job| &job.key == key) else {
            return false;
        };
        if let Some(job) = state.normal.remove(index) {
            state.priority.push_back(job);
        }
        true
    }

    /// Block until a job is available. `None` means the queue was closed.
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.priority.pop_front() {
                return Some(job);
            }
            if let Some(job) = state.normal.pop_front() {
                return Some(job);
            }
            self.inner.condvar.wait(&mut state);
        }
    }

    /// Stop accepting work and drop waiting jobs. Returns how many were dropped.
    pub fn close(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let discarded = state.priority.len() + state.normal.len();
        state.priority.clear();
        state.normal.clear();
        self.inner.condvar.notify_all();
        discarded
    }

    pub fn len(&self) -> usize {
        let state = self.inner.state.lock();
        state.priority.len() + state.normal.len()
    }
}
