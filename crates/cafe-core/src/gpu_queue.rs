//! GPU command queue - hand-off of finished command buffers to the GPU thread
//!
//! Guest execution fills command buffers and submits them here; the GPU thread
//! unqueues them, runs them to completion and retires them back so the
//! producer can recycle the memory. This is the only structure shared between
//! the two sides.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Default number of command buffers that may be queued ahead of the GPU
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// A finished command buffer: PM4 words in host byte order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    /// Submission id, monotonically increasing per queue
    pub id: u64,
    /// Packet words
    pub words: Vec<u32>,
}

/// Outcome of running a command buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferStatus {
    /// Every packet was processed
    Completed,
    /// Processing stopped at a fatal decode error
    Aborted { reason: String },
}

/// A command buffer handed back by the GPU thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredBuffer {
    pub buffer: CommandBuffer,
    pub status: BufferStatus,
}

/// The queue was closed while waiting
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("command queue closed")]
pub struct QueueClosed;

struct Shared {
    pending: Mutex<VecDeque<CommandBuffer>>,
    /// Signalled on submit, unqueue and close
    pending_changed: Condvar,
    retired: Mutex<VecDeque<RetiredBuffer>>,
    /// Signalled on retire and close
    retired_changed: Condvar,
    closed: AtomicBool,
    capacity: usize,
    next_id: AtomicU64,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);

        // Take each lock before notifying so a waiter can't miss the flag
        let _pending = self.pending.lock();
        self.pending_changed.notify_all();
        drop(_pending);

        let _retired = self.retired.lock();
        self.retired_changed.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The producer side of the queue (guest execution)
#[derive(Clone)]
pub struct CommandQueueSender {
    shared: Arc<Shared>,
}

impl CommandQueueSender {
    /// Submit a command buffer, blocking while the queue is full.
    ///
    /// Returns the id assigned to the buffer.
    pub fn submit(&self, words: Vec<u32>) -> Result<u64, QueueClosed> {
        let mut pending = self.shared.pending.lock();

        while pending.len() >= self.shared.capacity && !self.shared.is_closed() {
            self.shared.pending_changed.wait(&mut pending);
        }

        if self.shared.is_closed() {
            return Err(QueueClosed);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        pending.push_back(CommandBuffer { id, words });
        self.shared.pending_changed.notify_all();
        Ok(id)
    }

    /// Take a retired buffer if one is available (non-blocking)
    pub fn try_retired(&self) -> Option<RetiredBuffer> {
        self.shared.retired.lock().pop_front()
    }

    /// Wait for the next retired buffer. Returns `None` once the queue is closed
    /// and nothing is left to collect.
    pub fn wait_retired(&self) -> Option<RetiredBuffer> {
        let mut retired = self.shared.retired.lock();

        loop {
            if let Some(buffer) = retired.pop_front() {
                return Some(buffer);
            }
            if self.shared.is_closed() {
                return None;
            }
            self.shared.retired_changed.wait(&mut retired);
        }
    }

    /// Number of buffers waiting for the GPU thread
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Close the queue, waking every waiter on both sides
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// The consumer side of the queue (GPU thread)
#[derive(Clone)]
pub struct CommandQueueReceiver {
    shared: Arc<Shared>,
}

impl CommandQueueReceiver {
    /// Block until a command buffer is available.
    ///
    /// Returns `None` as soon as the queue is closed; buffers still pending at
    /// that point are not handed out.
    pub fn unqueue(&self) -> Option<CommandBuffer> {
        let mut pending = self.shared.pending.lock();

        loop {
            if self.shared.is_closed() {
                return None;
            }
            if let Some(buffer) = pending.pop_front() {
                // Room for a blocked producer
                self.shared.pending_changed.notify_all();
                return Some(buffer);
            }
            self.shared.pending_changed.wait(&mut pending);
        }
    }

    /// Hand a finished buffer back to the producer
    pub fn retire(&self, buffer: CommandBuffer, status: BufferStatus) {
        if let BufferStatus::Aborted { reason } = &status {
            tracing::debug!("Retiring aborted command buffer {}: {}", buffer.id, reason);
        }

        let mut retired = self.shared.retired.lock();
        retired.push_back(RetiredBuffer { buffer, status });
        self.shared.retired_changed.notify_all();
    }

    /// Close the queue, waking every waiter on both sides
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Create a new command queue pair (sender, receiver)
pub fn create_command_queue(capacity: usize) -> (CommandQueueSender, CommandQueueReceiver) {
    let shared = Arc::new(Shared {
        pending: Mutex::new(VecDeque::with_capacity(capacity)),
        pending_changed: Condvar::new(),
        retired: Mutex::new(VecDeque::new()),
        retired_changed: Condvar::new(),
        closed: AtomicBool::new(false),
        capacity: capacity.max(1),
        next_id: AtomicU64::new(0),
    });

    let sender = CommandQueueSender {
        shared: Arc::clone(&shared),
    };
    let receiver = CommandQueueReceiver { shared };

    (sender, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_submit_and_unqueue_in_order() {
        let (sender, receiver) = create_command_queue(4);

        assert_eq!(sender.submit(vec![1, 2]).unwrap(), 0);
        assert_eq!(sender.submit(vec![3]).unwrap(), 1);
        assert_eq!(sender.pending_len(), 2);

        let first = receiver.unqueue().unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(first.words, vec![1, 2]);

        let second = receiver.unqueue().unwrap();
        assert_eq!(second.id, 1);
        assert_eq!(sender.pending_len(), 0);
    }

    #[test]
    fn test_retire_round_trip() {
        let (sender, receiver) = create_command_queue(4);
        sender.submit(vec![0xC000_1000]).unwrap();

        let buffer = receiver.unqueue().unwrap();
        receiver.retire(
            buffer,
            BufferStatus::Aborted {
                reason: "bad packet".to_string(),
            },
        );

        let retired = sender.try_retired().unwrap();
        assert_eq!(retired.buffer.words, vec![0xC000_1000]);
        assert!(matches!(retired.status, BufferStatus::Aborted { .. }));
        assert!(sender.try_retired().is_none());
    }

    #[test]
    fn test_close_wakes_blocked_receiver() {
        let (sender, receiver) = create_command_queue(4);

        let handle = thread::spawn(move || receiver.unqueue());

        thread::sleep(Duration::from_millis(20));
        sender.close();

        assert!(handle.join().unwrap().is_none());
        assert!(sender.submit(vec![1]).is_err());
    }

    #[test]
    fn test_full_queue_blocks_until_unqueued() {
        let (sender, receiver) = create_command_queue(1);
        sender.submit(vec![1]).unwrap();

        let producer = sender.clone();
        let handle = thread::spawn(move || producer.submit(vec![2]));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(sender.pending_len(), 1);

        assert_eq!(receiver.unqueue().unwrap().words, vec![1]);
        assert_eq!(handle.join().unwrap().unwrap(), 1);
        assert_eq!(receiver.unqueue().unwrap().words, vec![2]);
    }

    #[test]
    fn test_wait_retired_returns_none_after_close() {
        let (sender, receiver) = create_command_queue(2);
        receiver.close();
        assert!(sender.wait_retired().is_none());
        assert!(receiver.is_closed());
    }
}
