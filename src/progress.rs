//! Shared progress state between the monitor loop and the log harvester.
//!
//! The sample sum and the unit cursor live behind a single lock. The
//! harvester adds samples and reads the cursor for tagging; the monitor
//! drains the sum and advances the cursor. The lock is only held for the
//! arithmetic itself, never across I/O.

use parking_lot::Mutex;

#[derive(Debug)]
struct ProgressInner {
    sample_sum: f64,
    cursor: u32,
}

/// Sample accumulator plus the unit it currently belongs to.
///
/// Shared between tasks through an `Arc`.
///
/// # Example
///
/// ```
/// use eni_watch::SharedProgress;
///
/// let progress = SharedProgress::new();
/// assert_eq!(progress.observe(Some(1.5)), 1);
/// assert_eq!(progress.drain(), 1.5);
/// assert_eq!(progress.drain(), 0.0);
/// ```
#[derive(Debug)]
pub struct SharedProgress {
    inner: Mutex<ProgressInner>,
}

impl SharedProgress {
    /// Create progress state positioned at unit 1 with an empty sum.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProgressInner {
                sample_sum: 0.0,
                cursor: 1,
            }),
        }
    }

    /// Record a harvested line.
    ///
    /// Adds `sample` (if any) to the sum and returns the cursor the line
    /// belongs to, both under the same lock so the tag and the sample are
    /// always attributed to the same unit.
    pub fn observe(&self, sample: Option<f64>) -> u32 {
        let mut inner = self.inner.lock();
        if let Some(value) = sample {
            inner.sample_sum += value;
        }
        inner.cursor
    }

    /// Atomically read the sample sum and reset it to zero.
    pub fn drain(&self) -> f64 {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.sample_sum, 0.0)
    }

    /// The unit currently being awaited.
    pub fn cursor(&self) -> u32 {
        self.inner.lock().cursor
    }

    /// Drain the sample sum and move the cursor to `next` in one step.
    ///
    /// A line harvested concurrently lands either entirely in the drained
    /// unit or entirely in `next`, tag included.
    pub fn drain_and_advance(&self, next: u32) -> f64 {
        let mut inner = self.inner.lock();
        inner.cursor = next;
        std::mem::replace(&mut inner.sample_sum, 0.0)
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_progress_starts_at_unit_one() {
        let progress = SharedProgress::new();
        assert_eq!(progress.cursor(), 1);
        assert_eq!(progress.drain(), 0.0);
    }

    #[test]
    fn test_drain_resets_sum() {
        let progress = SharedProgress::new();
        progress.observe(Some(0.5));
        progress.observe(Some(1.25));

        assert_eq!(progress.drain(), 1.75);
        assert_eq!(progress.drain(), 0.0);
    }

    #[test]
    fn test_observe_without_sample_only_tags() {
        let progress = SharedProgress::new();
        progress.drain_and_advance(4);

        assert_eq!(progress.observe(None), 4);
        assert_eq!(progress.drain(), 0.0);
    }

    #[test]
    fn test_drain_and_advance_moves_cursor() {
        let progress = SharedProgress::new();
        assert_eq!(progress.observe(Some(2.0)), 1);

        assert_eq!(progress.drain_and_advance(2), 2.0);
        assert_eq!(progress.cursor(), 2);
        assert_eq!(progress.observe(Some(1.25)), 2);
        assert_eq!(progress.drain(), 1.25);
    }

    #[test]
    fn test_concurrent_increments_and_drains_lose_nothing() {
        // 0.25 is exact in binary, so every partial sum is exact too.
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;
        const VALUE: f64 = 0.25;

        let progress = Arc::new(SharedProgress::new());

        let writers: Vec<_> = (0..THREADS)
            .map(|_| {
                let progress = Arc::clone(&progress);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        progress.observe(Some(VALUE));
                    }
                })
            })
            .collect();

        let drainer = {
            let progress = Arc::clone(&progress);
            thread::spawn(move || {
                let mut drained = Vec::new();
                for _ in 0..200 {
                    drained.push(progress.drain());
                    thread::yield_now();
                }
                drained
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        let drained = drainer.join().unwrap();

        let total: f64 = drained.iter().sum::<f64>() + progress.drain();
        assert_eq!(total, (THREADS * PER_THREAD) as f64 * VALUE);
        assert!(drained.iter().all(|d| *d >= 0.0));
    }
}
