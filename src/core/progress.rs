// Byte-granular progress reporting shared by indexing threads.
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_PROGRESS_BYTES: u64 = 1024 * 1024;

/// Receives the number of bytes indexed since the previous call.
///
/// Called from indexing worker threads, possibly concurrently.
pub trait ProgressSink: Send + Sync {
    fn advance(&self, bytes: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn advance(&self, bytes: u64) {
        self(bytes)
    }
}

#[derive(Clone, Default)]
pub struct Progress {
    sink: Option<Arc<dyn ProgressSink>>,
    cadence: u64,
}

impl Progress {
    pub fn none() -> Self {
        Self::default()
    }

    /// Reports roughly every `cadence` bytes; zero falls back to the default cadence.
    pub fn new(sink: Arc<dyn ProgressSink>, cadence: u64) -> Self {
        let cadence = if cadence == 0 {
            DEFAULT_PROGRESS_BYTES
        } else {
            cadence
        };
        Self {
            sink: Some(sink),
            cadence,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Largest slice a scanner should process between reports.
    pub fn block_size(&self) -> usize {
        match self.sink {
            Some(_) => usize::try_from(self.cadence).unwrap_or(usize::MAX),
            None => usize::MAX,
        }
    }

    pub fn advance(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.advance(bytes);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.sink.is_some())
            .field("cadence", &self.cadence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_PROGRESS_BYTES, Progress};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn disabled_progress_has_unbounded_blocks() {
        let progress = Progress::none();
        assert!(!progress.is_enabled());
        assert_eq!(progress.block_size(), usize::MAX);
        progress.advance(10);
    }

    #[test]
    fn closure_sink_accumulates_bytes() {
        let total = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&total);
        let progress = Progress::new(
            Arc::new(move |bytes: u64| {
                seen.fetch_add(bytes, Ordering::Relaxed);
            }),
            0,
        );
        assert_eq!(progress.block_size() as u64, DEFAULT_PROGRESS_BYTES);
        progress.advance(7);
        progress.advance(0);
        progress.advance(5);
        assert_eq!(total.load(Ordering::Relaxed), 12);
    }
}
