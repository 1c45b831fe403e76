use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostics for debugging a capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureDiagnostics {
    pub chunks: u64,
    pub frames: u64,
    pub silent_chunks: u64,
    pub transient_errors: u64,
    pub recorded_chunks: u64,
}

/// Lock-free counters updated by the capture thread.
#[derive(Debug, Default)]
pub(crate) struct CaptureCounters {
    chunks: AtomicU64,
    frames: AtomicU64,
    silent_chunks: AtomicU64,
    transient_errors: AtomicU64,
    recorded_chunks: AtomicU64,
}

impl CaptureCounters {
    pub(crate) fn chunk(&self, frames: u32, silent: bool) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        if silent {
            self.silent_chunks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recorded_chunk(&self) {
        self.recorded_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CaptureDiagnostics {
        CaptureDiagnostics {
            chunks: self.chunks.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            silent_chunks: self.silent_chunks.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            recorded_chunks: self.recorded_chunks.load(Ordering::Relaxed),
        }
    }
}
