use parking_lot::Mutex;

/// Fixed-capacity circular store of normalized mono samples.
///
/// New writes overwrite the oldest sample once full. `total_written` never
/// wraps, so exactly `min(total_written, capacity)` slots hold history and
/// any window up to that size is the most recently written samples.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<f32>,
    write_pos: usize,
    total_written: u64,
}

impl RingBuffer {
    /// Allocate a buffer of `capacity` samples. A zero capacity is rounded
    /// up to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_pos: 0,
            total_written: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        self.total_written += 1;
    }

    /// Append `samples` in order.
    ///
    /// If `samples` is longer than the capacity only its tail lands in the
    /// buffer, but every sample still counts towards `total_written`.
    pub fn extend(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        let mut src = samples;
        if src.len() > capacity {
            let skip = src.len() - capacity;
            self.write_pos = (self.write_pos + skip) % capacity;
            src = &src[skip..];
        }

        let first = (capacity - self.write_pos).min(src.len());
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&src[..first]);
        let rest = src.len() - first;
        self.buffer[..rest].copy_from_slice(&src[first..]);

        self.write_pos = (self.write_pos + src.len()) % capacity;
        self.total_written += samples.len() as u64;
    }

    /// Append `count` zero samples.
    pub fn extend_silence(&mut self, count: usize) {
        let capacity = self.buffer.len();
        let skip = count.saturating_sub(capacity);
        let mut pos = (self.write_pos + skip) % capacity;
        for _ in skip..count {
            self.buffer[pos] = 0.0;
            pos = (pos + 1) % capacity;
        }
        self.write_pos = pos;
        self.total_written += count as u64;
    }

    /// Root-mean-square of the last `min(window, len)` samples; 0 when
    /// nothing has been written yet.
    pub fn level_rms(&self, window: usize) -> f32 {
        let n = window.min(self.len());
        if n == 0 {
            return 0.0;
        }
        let capacity = self.buffer.len();
        let sum: f64 = (0..n)
            .map(|i| {
                let idx = (self.write_pos + capacity - 1 - i) % capacity;
                let s = self.buffer[idx] as f64;
                s * s
            })
            .sum();
        (sum / n as f64).sqrt() as f32
    }

    /// Append up to `max` most recent samples, oldest first, to `out`.
    pub fn copy_recent_into(&self, max: usize, out: &mut Vec<f32>) {
        let n = max.min(self.len());
        if n == 0 {
            return;
        }
        let capacity = self.buffer.len();
        let start = (self.write_pos + capacity - n) % capacity;
        if start + n <= capacity {
            out.extend_from_slice(&self.buffer[start..start + n]);
        } else {
            out.extend_from_slice(&self.buffer[start..]);
            out.extend_from_slice(&self.buffer[..n - (capacity - start)]);
        }
    }

    /// Number of valid history samples.
    pub fn len(&self) -> usize {
        self.total_written.min(self.buffer.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total_written == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}

/// The process-lifetime waveform history shared between the capture thread
/// and readers.
///
/// One lock guards the ring. Writers take it once per chunk; readers copy
/// out and release it before doing any work of their own.
#[derive(Debug)]
pub struct WaveformBuffer {
    ring: Mutex<RingBuffer>,
}

impl WaveformBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    /// Append one chunk's worth of samples under a single lock acquisition.
    pub fn push_samples(&self, samples: &[f32]) {
        self.ring.lock().extend(samples);
    }

    pub fn push_silence(&self, count: usize) {
        self.ring.lock().extend_silence(count);
    }

    pub fn level_rms(&self, window: usize) -> f32 {
        self.ring.lock().level_rms(window)
    }

    /// Copy of up to `max_samples` most recent samples, oldest first.
    pub fn snapshot(&self, max_samples: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(max_samples.min(self.capacity()));
        self.ring.lock().copy_recent_into(max_samples, &mut out);
        out
    }

    /// Total samples ever written; never wraps.
    pub fn sample_count(&self) -> u64 {
        self.ring.lock().total_written()
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }
}
