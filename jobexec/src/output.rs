//! Append-only output logs with replay to any number of readers.
//!
//! Each log keeps the full chunk history for the life of its job, so a
//! reader attached at any moment observes every byte from the start of
//! execution, then the live tail, then end-of-stream once the log closes.

use crate::types::OutputBlob;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

struct LogState {
    chunks: Vec<OutputBlob>,
    len: u64,
    closed: bool,
    readers: usize,
}

struct Shared {
    state: Mutex<LogState>,
    readable: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().expect("output log lock poisoned")
    }
}

/// The write side of one output stream of a job.
#[derive(Clone)]
pub struct OutputLog {
    shared: Arc<Shared>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LogState {
                    chunks: Vec::new(),
                    len: 0,
                    closed: false,
                    readers: 0,
                }),
                readable: Notify::new(),
            }),
        }
    }

    /// Append a chunk and wake waiting readers. Appends after close are
    /// dropped; a closed log's length is final.
    pub fn append(&self, blob: OutputBlob) {
        if blob.is_empty() {
            return;
        }
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.len += blob.len() as u64;
            state.chunks.push(blob);
        }
        self.shared.readable.notify_waiters();
    }

    /// Close the log. Idempotent. Readers that have drained the history
    /// observe end-of-stream.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.readable.notify_waiters();
    }

    pub fn len(&self) -> u64 {
        self.shared.lock().len
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Whether any reader cursor is currently attached.
    pub fn has_readers(&self) -> bool {
        self.shared.lock().readers > 0
    }

    /// A new cursor positioned at the start of the history.
    pub fn reader(&self) -> OutputReader {
        self.shared.lock().readers += 1;
        OutputReader {
            shared: self.shared.clone(),
            cursor: 0,
        }
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        let state = self.shared.lock();
        let mut buf = Vec::with_capacity(state.len as usize);
        for chunk in &state.chunks {
            buf.extend_from_slice(chunk);
        }
        buf
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new()
    }
}

/// An independent cursor over one output log.
pub struct OutputReader {
    shared: Arc<Shared>,
    cursor: usize,
}

impl OutputReader {
    /// The next chunk past this cursor, suspending while the log is open
    /// and drained. `None` means the log closed and the cursor has
    /// observed the full history.
    pub async fn next_chunk(&mut self) -> Option<OutputBlob> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            {
                let state = self.shared.lock();
                if let Some(chunk) = state.chunks.get(self.cursor) {
                    self.cursor += 1;
                    return Some(chunk.clone());
                }
                if state.closed {
                    return None;
                }
                // register for the next notify before releasing the lock,
                // otherwise an append between unlock and await is missed
                notified.as_mut().enable();
            }
            notified.await;
        }
    }
}

impl Drop for OutputReader {
    fn drop(&mut self) {
        self.shared.lock().readers -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    async fn drain(mut reader: OutputReader) -> Vec<u8> {
        let mut buf = Vec::new();
        while let Some(chunk) = reader.next_chunk().await {
            buf.extend_from_slice(&chunk);
        }
        buf
    }

    #[tokio::test]
    async fn replays_history_in_write_order() {
        let log = OutputLog::new();
        log.append(Bytes::from_static(b"one "));
        log.append(Bytes::from_static(b"two "));
        log.append(Bytes::from_static(b"three"));
        log.close();

        assert_eq!(drain(log.reader()).await, b"one two three");
        // a second reader starts from zero again
        assert_eq!(drain(log.reader()).await, b"one two three");
        assert_eq!(log.len(), 13);
        assert!(log.is_closed());
    }

    #[tokio::test]
    async fn reader_suspends_until_append_or_close() {
        let log = OutputLog::new();
        let mut reader = log.reader();

        let waiter = tokio::spawn(async move { reader.next_chunk().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        log.append(Bytes::from_static(b"late"));
        let chunk = waiter.await.expect("reader task panicked");
        assert_eq!(chunk.as_deref(), Some(&b"late"[..]));

        let mut reader = log.reader();
        // skip the chunk already appended
        reader.next_chunk().await;
        let waiter = tokio::spawn(async move { reader.next_chunk().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        log.close();
        assert_eq!(waiter.await.expect("reader task panicked"), None);
    }

    #[tokio::test]
    async fn late_reader_sees_everything_then_eos() {
        let log = OutputLog::new();
        log.append(Bytes::from_static(b"all "));
        log.append(Bytes::from_static(b"of it"));
        log.close();

        assert_eq!(drain(log.reader()).await, b"all of it");
    }

    #[tokio::test]
    async fn appends_after_close_are_dropped() {
        let log = OutputLog::new();
        log.append(Bytes::from_static(b"kept"));
        log.close();
        log.append(Bytes::from_static(b"dropped"));

        assert_eq!(log.len(), 4);
        assert_eq!(drain(log.reader()).await, b"kept");
    }

    #[tokio::test]
    async fn tracks_attached_readers() {
        let log = OutputLog::new();
        assert!(!log.has_readers());
        let first = log.reader();
        let second = log.reader();
        assert!(log.has_readers());
        drop(first);
        assert!(log.has_readers());
        drop(second);
        assert!(!log.has_readers());
    }
}
