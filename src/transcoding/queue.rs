//! Bounded FIFO of pending job ids plus the running-slot counter

use super::error::TranscodingError;
use serde::Serialize;
use std::collections::VecDeque;

/// Admission and concurrency bookkeeping for transcoding jobs.
/// `running ≤ max_concurrent` and `pending ≤ max_size` always hold.
#[derive(Debug)]
pub struct TranscodingQueue {
    pending: VecDeque<String>,
    running: usize,
    max_size: usize,
    max_concurrent: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscodingQueueStats {
    pub pending: usize,
    pub running: usize,
    pub max_size: usize,
    pub max_concurrent: usize,
}

impl TranscodingQueue {
    pub fn new(max_size: usize, max_concurrent: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_size),
            running: 0,
            max_size,
            max_concurrent,
        }
    }

    pub fn has_capacity_for(&self, count: usize) -> bool {
        self.pending.len() + count <= self.max_size
    }

    pub fn push(&mut self, job_id: String) -> Result<(), TranscodingError> {
        if !self.has_capacity_for(1) {
            return Err(TranscodingError::QueueFull {
                capacity: self.max_size,
                pending: self.pending.len(),
                requested: 1,
            });
        }
        self.pending.push_back(job_id);
        Ok(())
    }

    /// Pop the next job if a running slot is free; the slot is taken
    pub fn try_start(&mut self) -> Option<String> {
        if self.running >= self.max_concurrent {
            return None;
        }
        let job_id = self.pending.pop_front()?;
        self.running += 1;
        Some(job_id)
    }

    /// Release a running slot
    pub fn finish(&mut self) {
        self.running = self.running.saturating_sub(1);
    }

    /// Drop a pending job (e.g. cancelled before it started)
    pub fn remove(&mut self, job_id: &str) -> bool {
        match self.pending.iter().position(|id| id == job_id) {
            Some(idx) => {
                self.pending.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn stats(&self) -> TranscodingQueueStats {
        TranscodingQueueStats {
            pending: self.pending.len(),
            running: self.running,
            max_size: self.max_size,
            max_concurrent: self.max_concurrent,
        }
    }
}
