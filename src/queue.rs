//! Bounded work queue shared by the delivery workers
//!
//! Producers submit with [`TaskQueue::try_enqueue`], which never waits:
//! a full queue is reported straight back to the caller. Any number of
//! workers may call [`TaskQueue::dequeue`]; each gets its own stream and
//! items are handed to exactly one of them. Closing the queue stops new
//! submissions while letting the workers drain what is already queued.

use crate::error::ErrorClass;
use async_stream::stream;
use futures_util::stream::BoxStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Notify};

/// Error types for queue operations
#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Queue has been closed
    QueueClosed,
    /// Queue is at capacity
    QueueFull,
    /// Receiving side is gone
    ChannelDisconnected,
}

impl QueueError {
    pub fn class(&self) -> ErrorClass {
        match self {
            QueueError::QueueFull => ErrorClass::Admission,
            QueueError::QueueClosed | QueueError::ChannelDisconnected => ErrorClass::Closed,
        }
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::QueueClosed => write!(f, "Queue is closed"),
            QueueError::QueueFull => write!(f, "Queue is full"),
            QueueError::ChannelDisconnected => write!(f, "Queue channel disconnected"),
        }
    }
}

impl std::error::Error for QueueError {}

struct QueueState<T> {
    sender: mpsc::Sender<T>,
    capacity: usize,
    closed: AtomicBool,
    /// Held shared by submitters and exclusively by `close`, so every
    /// accepted send lands before the closed flag is visible
    close_gate: RwLock<()>,
    item_count: AtomicUsize,
    close_notify: Notify,
}

/// Bounded multi-consumer queue with a `Stream` dequeue side
pub struct TaskQueue<T> {
    state: Arc<QueueState<T>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            receiver: Arc::clone(&self.receiver),
        }
    }
}

impl<T> TaskQueue<T>
where
    T: Send + 'static,
{
    /// Create a queue holding at most `capacity` items
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            state: Arc::new(QueueState {
                sender,
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                close_gate: RwLock::new(()),
                item_count: AtomicUsize::new(0),
                close_notify: Notify::new(),
            }),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }

    /// Submit an item without waiting for space
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        let _gate = self.state.close_gate.read().unwrap_or_else(|e| e.into_inner());
        if self.state.closed.load(Ordering::Acquire) {
            return Err(QueueError::QueueClosed);
        }

        // Count first so a consumer can never decrement below zero
        self.state.item_count.fetch_add(1, Ordering::Relaxed);
        match self.state.sender.try_send(item) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.state.item_count.fetch_sub(1, Ordering::Relaxed);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(QueueError::QueueFull),
                    mpsc::error::TrySendError::Closed(_) => Err(QueueError::ChannelDisconnected),
                }
            }
        }
    }

    /// Stream of items for one consumer. Ends once the queue is closed and
    /// every remaining item has been handed out.
    pub fn dequeue(&self) -> BoxStream<'static, T> {
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::clone(&self.state);

        let stream = stream! {
            loop {
                let item = {
                    let mut rx = receiver.lock().await;
                    // Register for the close signal before reading the flag so
                    // a close in between cannot be missed.
                    let closed = state.close_notify.notified();
                    tokio::pin!(closed);
                    closed.as_mut().enable();

                    if state.closed.load(Ordering::Acquire) {
                        rx.try_recv().ok()
                    } else {
                        tokio::select! {
                            item = rx.recv() => item,
                            _ = &mut closed => rx.try_recv().ok(),
                        }
                    }
                };

                match item {
                    Some(item) => {
                        state.item_count.fetch_sub(1, Ordering::Relaxed);
                        yield item;
                    }
                    None => break,
                }
            }
        };

        Box::pin(stream)
    }

    /// Refuse further submissions; consumers drain and then finish
    pub fn close(&self) {
        {
            let _gate = self.state.close_gate.write().unwrap_or_else(|e| e.into_inner());
            self.state.closed.store(true, Ordering::Release);
        }
        self.state.close_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Number of queued items (may lag by one under contention)
    pub fn len(&self) -> usize {
        self.state.item_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let length = self.len();
        QueueStats {
            length,
            capacity: self.state.capacity,
            utilization: length as f64 / self.state.capacity as f64,
            is_closed: self.is_closed(),
        }
    }
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub length: usize,
    pub capacity: usize,
    pub utilization: f64, // 0.0 to 1.0
    pub is_closed: bool,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Queue({}/{}, {:.1}%{})",
            self.length,
            self.capacity,
            self.utilization * 100.0,
            if self.is_closed { ", closed" } else { "" }
        )
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("capacity", &self.state.capacity)
            .field("length", &self.state.item_count.load(Ordering::Relaxed))
            .field("is_closed", &self.state.closed.load(Ordering::Acquire))
            .finish()
    }
}
