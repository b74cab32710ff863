use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window capacity must be positive, got {0}")]
    InvalidCapacity(usize),
}

/// Which extremum the window tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

/// Fixed-capacity rolling window over a numeric stream
///
/// Keeps the last `capacity` pushed values (FIFO eviction) and answers
/// `extremum()` in O(1). A monotonic deque of candidate extrema keeps
/// pushes O(1) amortized: each value enters and leaves the candidate
/// deque at most once, so no eviction ever rescans the buffer.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    kind: Extremum,
    buffer: VecDeque<f64>,
    candidates: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize, kind: Extremum) -> Result<Self, WindowError> {
        if capacity == 0 {
            return Err(WindowError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            kind,
            buffer: VecDeque::with_capacity(capacity),
            candidates: VecDeque::with_capacity(capacity),
        })
    }

    /// Append a value, evicting the oldest one once at capacity
    pub fn push(&mut self, value: f64) {
        if self.buffer.len() == self.capacity {
            if let Some(evicted) = self.buffer.pop_front() {
                // The evicted value can only be the front candidate
                if self.candidates.front() == Some(&evicted) {
                    self.candidates.pop_front();
                }
            }
        }

        // Values beaten by the newcomer can never be the extremum again.
        // Strict comparison keeps duplicates in the deque so eviction of
        // one copy does not lose the other.
        while let Some(&back) = self.candidates.back() {
            if self.beats(value, back) {
                self.candidates.pop_back();
            } else {
                break;
            }
        }

        self.candidates.push_back(value);
        self.buffer.push_back(value);
    }

    fn beats(&self, new: f64, old: f64) -> bool {
        match self.kind {
            Extremum::Max => new > old,
            Extremum::Min => new < old,
        }
    }

    /// Current min/max of the buffered values, `None` while empty
    pub fn extremum(&self) -> Option<f64> {
        self.candidates.front().copied()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
