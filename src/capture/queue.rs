//! Bounded frame queue
//!
//! Decouples capture threads from the encoder worker. When the queue is full
//! the newest frame is dropped; older frames are never evicted and `offer`
//! never blocks. Closing the queue wakes a blocked consumer with
//! [`QueueClosed`] instead of a frame.

use super::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Frames held before new ones are dropped
pub const FRAME_QUEUE_CAPACITY: usize = 80;

/// Returned by [`FrameQueue::take`] once the queue has been closed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("frame queue closed")]
pub struct QueueClosed;

struct QueueInner {
    frames: VecDeque<Frame>,
    closed: bool,
    dropped: u64,
}

/// Fixed-capacity FIFO of raw frames
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue with the standard capacity
    pub fn new() -> Self {
        Self::with_capacity(FRAME_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a frame; returns false (and drops it) when full or closed
    pub fn offer(&self, frame: Frame) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed || inner.frames.len() >= self.capacity {
            inner.dropped += 1;
            return false;
        }
        inner.frames.push_back(frame);
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Block until a frame is available or the queue is closed
    pub fn take(&self) -> Result<Frame, QueueClosed> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(QueueClosed);
            }
            if let Some(frame) = inner.frames.pop_front() {
                return Ok(frame);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Non-blocking take; `Ok(None)` when empty
    pub fn try_take(&self) -> Result<Option<Frame>, QueueClosed> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueClosed);
        }
        Ok(inner.frames.pop_front())
    }

    /// Discard queued frames and wake every blocked consumer
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.frames.clear();
        drop(inner);
        self.available.notify_all();
    }

    /// Empty the queue and reopen it for a new session
    pub fn renew(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.closed = false;
        inner.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames rejected since the last renew
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer-side handle to a pump's queue
///
/// Frames are only accepted while the owning pump is running, so nothing
/// captured between sessions leaks into the next one.
#[derive(Clone)]
pub struct FrameProducer {
    tag: &'static str,
    queue: Arc<FrameQueue>,
    running: Arc<AtomicBool>,
}

impl FrameProducer {
    pub(crate) fn new(tag: &'static str, queue: Arc<FrameQueue>, running: Arc<AtomicBool>) -> Self {
        Self {
            tag,
            queue,
            running,
        }
    }

    /// Hand a frame to the encoder; false if it was discarded
    pub fn offer(&self, frame: Frame) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let accepted = self.queue.offer(frame);
        if !accepted {
            tracing::debug!("{} frame discarded, queue full", self.tag);
        }
        accepted
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
