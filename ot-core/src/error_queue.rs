//! Process-wide error queue.
//!
//! Any component may record an error at any time through [`add_error`]; the
//! health heartbeat is the only reader and drains the whole queue atomically
//! on each report. The queue is unbounded by construction and bounded in
//! practice by the heartbeat cadence.

use crate::Error;
use crate::payload::{ErrorDetail, ErrorEntry};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Thread-safe FIFO of error records.
pub struct ErrorQueue {
    inner: Mutex<VecDeque<ErrorEntry>>,
}

impl ErrorQueue {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, name: &str, message: &str, stacktrace: &str) {
        let entry = ErrorEntry {
            data: ErrorDetail {
                name: name.to_string(),
                message: message.to_string(),
                stacktrace: stacktrace.to_string(),
            },
            timestamp: Utc::now(),
        };
        self.inner
            .lock()
            .expect("error queue poisoned")
            .push_back(entry);
    }

    /// Read-then-clear in a single lock acquisition. Returns the entire
    /// FIFO contents in arrival order and leaves the queue empty.
    pub fn drain_all(&self) -> Vec<ErrorEntry> {
        let mut queue = self.inner.lock().expect("error queue poisoned");
        queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("error queue poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("error queue poisoned").len()
    }
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: ErrorQueue = ErrorQueue::new();

/// The queue shared by every component of the process.
pub fn global() -> &'static ErrorQueue {
    &GLOBAL
}

/// Record an error on the global queue. The only writer API.
pub fn add_error(error: &Error, stacktrace: &str) {
    tracing::debug!(kind = error.kind_name(), "enqueueing error for heartbeat");
    GLOBAL.push(error.kind_name(), &error.to_string(), stacktrace);
}

/// Capture the current backtrace as a string for an error record.
pub fn capture_stacktrace() -> String {
    std::backtrace::Backtrace::force_capture().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drain_returns_everything_and_empties_queue() {
        let queue = ErrorQueue::new();
        queue.push("MysqlCollectorError", "first", "");
        queue.push("NetworkError", "second", "");
        queue.push("S3ClientError", "third", "");

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 3);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = ErrorQueue::new();
        for i in 0..10 {
            queue.push("NetworkError", &format!("error {i}"), "");
        }
        let drained = queue.drain_all();
        let messages: Vec<_> = drained.iter().map(|e| e.data.message.as_str()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("error {i}")).collect();
        assert_eq!(messages, expected);
    }

    #[test]
    fn concurrent_pushes_are_all_observed() {
        let queue = Arc::new(ErrorQueue::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    queue.push("DbCollectorError", "concurrent", "");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 800);
        assert_eq!(queue.drain_all().len(), 800);
    }

    #[test]
    fn entry_carries_name_message_and_timestamp() {
        let queue = ErrorQueue::new();
        let err = Error::ComputeServerClient("Failed to post the observation".into());
        queue.push(err.kind_name(), &err.to_string(), "stack");
        let drained = queue.drain_all();
        assert_eq!(drained[0].data.name, "ComputeServerClientError");
        assert!(drained[0].data.message.contains("Failed to post"));
        assert_eq!(drained[0].data.stacktrace, "stack");
    }
}
