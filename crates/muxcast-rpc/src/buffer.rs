//! Per-channel receive buffers.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use muxcast_muc::MessageSink;

/// Append-only in-memory log of received payloads.
///
/// The sequence number of a buffer is simply its length; long-polling
/// readers resume from the sequence number returned by their previous
/// call. There is no truncation — the log lives as long as the process.
#[derive(Default)]
pub struct ReceiveBuffer {
    messages: Mutex<Vec<Vec<u8>>>,
    grew: Notify,
}

impl ReceiveBuffer {
    /// Default server-side wait used by [`receive`](Self::receive).
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3_000);

    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a payload and wakes all pending receivers.
    pub fn add(&self, payload: Vec<u8>) {
        self.messages.lock().unwrap().push(payload);
        self.grew.notify_waiters();
    }

    /// The current sequence number: the count of payloads received so far.
    pub fn sequence_number(&self) -> u64 {
        self.messages.lock().unwrap().len() as u64
    }

    /// Returns all payloads with index in `[from_seq, len)` together with
    /// the new sequence number.
    ///
    /// When nothing new is available yet, waits up to `timeout` for an
    /// append, once. A `from_seq` beyond the end yields an empty batch at
    /// the current sequence number. Spurious wakeups simply produce an
    /// empty result.
    pub async fn receive(&self, from_seq: u64, timeout: Duration) -> (Vec<Vec<u8>>, u64) {
        let notified = self.grew.notified();
        tokio::pin!(notified);

        let must_wait = {
            let messages = self.messages.lock().unwrap();
            if (messages.len() as u64) <= from_seq {
                // Arm the wakeup while still holding the lock, so an append
                // between this check and the await cannot be missed.
                notified.as_mut().enable();
                true
            } else {
                false
            }
        };
        if must_wait {
            let _ = tokio::time::timeout(timeout, notified).await;
        }

        let messages = self.messages.lock().unwrap();
        let seq = messages.len() as u64;
        let start = from_seq.min(seq) as usize;
        (messages[start..].to_vec(), seq)
    }
}

impl MessageSink for ReceiveBuffer {
    fn deliver(&self, payload: Vec<u8>) {
        self.add(payload);
    }
}
