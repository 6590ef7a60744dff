//! Bounded single-consumer queue with lossy overflow: a push into a full queue fails and
//! empties the queue, so a stalled consumer resumes on fresh data instead of a stale backlog.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue was full; it has been reset to empty.
    #[error("queue overflowed and was reset")]
    Overflow,
}

pub struct DropQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    ready: Notify,
}

impl<T> DropQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            ready: Notify::new(),
        }
    }

    /// Non-blocking push.
    pub fn try_push(&self, item: T) -> Result<(), QueueError> {
        {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            if items.len() >= self.capacity {
                items.clear();
                return Err(QueueError::Overflow);
            }
            items.push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Wait for the next item.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.ready.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Wait up to `timeout` for the next item.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }
}
