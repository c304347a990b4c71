//! Protocol debug trace
//!
//! Backends write protocol chatter into a [`DebugTrace`]; each flush hands
//! one trimmed, non-empty record to the consumer. The buffer is shared by
//! clones, so flush and reset happen under one lock.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

type Consumer = Box<dyn FnMut(&str) + Send>;

struct TraceBuffer {
    pending: String,
    consumer: Consumer,
}

/// Serialized debug sink
#[derive(Clone)]
pub struct DebugTrace {
    inner: Arc<Mutex<TraceBuffer>>,
}

impl DebugTrace {
    /// Wrap a record consumer
    pub fn new(consumer: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceBuffer {
                pending: String::new(),
                consumer: Box::new(consumer),
            })),
        }
    }

    /// Trace that forwards records to `tracing` at debug level
    pub fn to_tracing() -> Self {
        Self::new(|record| tracing::debug!(target: "mail_receive::wire", "{record}"))
    }

    /// Append text to the pending record
    pub fn write(&self, text: &str) {
        self.lock().pending.push_str(text);
    }

    /// Emit the pending record (if any) and reset the buffer
    pub fn flush(&self) {
        self.lock().emit();
    }

    /// Write one full record and flush it
    pub fn record(&self, text: &str) {
        let mut buffer = self.lock();
        buffer.pending.push_str(text);
        buffer.emit();
    }

    fn lock(&self) -> MutexGuard<'_, TraceBuffer> {
        // poisoning is ignored, the buffer is always left consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TraceBuffer {
    fn emit(&mut self) {
        let record = self.pending.trim().to_owned();
        self.pending.clear();
        if !record.is_empty() {
            (self.consumer)(&record);
        }
    }
}

impl fmt::Debug for DebugTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugTrace").finish_non_exhaustive()
    }
}
