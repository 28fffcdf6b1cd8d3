// SPDX-License-Identifier: Apache-2.0

//! Capture buffers for filtered samples

use crate::error::Error;

/// Monotonic counter indicating the position of samples in the acquisition stream.
#[derive(Default, Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleCounter(u32);

impl SampleCounter {
    /// Counter starting at `value`
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get current counter value
    pub fn get_counter(&self) -> u32 {
        self.0
    }

    /// Increment counter. Wraps to 0 with a warning once [`u32::MAX`] is reached (about 2.3 hours
    /// at 500 ksamples/s); consumers only ever compare nearby positions.
    pub fn increment(&mut self) {
        match self.0.checked_add(1) {
            None => {
                warn!("sample counter overflow, wrapping to 0");
                self.0 = 0;
            }
            Some(new_counter) => self.0 = new_counter,
        }
    }

    /// Counter advanced by `rhs` positions, wrapping like [`increment`](Self::increment)
    pub fn offset(&self, rhs: usize) -> Self {
        Self(self.0.wrapping_add(rhs as u32))
    }

    /// Add with defined wrapping. Result will be within range \[0, `limit` - 1\].
    pub fn wrapping_index_add(index: usize, rhs: usize, limit: usize) -> usize {
        if index + rhs >= limit {
            (index + rhs) % limit
        } else {
            index + rhs
        }
    }
}

/// How a [`CaptureBuffer`] treats a push once full.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferMode {
    /// Sliding window: the oldest sample is evicted (continuous mode)
    Ring,
    /// One-shot block: further samples are rejected until reset (burst mode)
    Block,
}

/// Fixed-capacity ordered sequence of filtered samples.
///
/// Storage is allocated once for `N` samples; the active `capacity` may be smaller. The buffer is
/// cleared, never reallocated, between captures.
pub struct CaptureBuffer<const N: usize> {
    /// Sample storage. In ring mode the oldest sample sits at `head`.
    samples: [f32; N],
    /// Index of the oldest sample
    head: usize,
    /// Number of valid samples
    len: usize,
    /// Active capacity, at most `N`
    capacity: usize,
    /// Overflow behaviour
    mode: BufferMode,
}

impl<const N: usize> CaptureBuffer<N> {
    /// Create a buffer holding `capacity` (`1..=N`) samples
    pub fn new(mode: BufferMode, capacity: usize) -> Result<Self, Error> {
        if capacity == 0 || capacity > N {
            return Err(Error::InvalidConfig);
        }
        Ok(Self {
            samples: [0.0; N],
            head: 0,
            len: 0,
            capacity,
            mode,
        })
    }

    /// Overflow behaviour
    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Active capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid samples
    pub fn len(&self) -> usize {
        self.len
    }

    /// No valid samples
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer holds `capacity` samples
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Append a sample. Returns `false` if a full block rejected it.
    pub fn push(&mut self, sample: f32) -> bool {
        if self.is_full() {
            match self.mode {
                BufferMode::Block => return false,
                BufferMode::Ring => {
                    self.samples[self.head] = sample;
                    self.head = SampleCounter::wrapping_index_add(self.head, 1, self.capacity);
                    return true;
                }
            }
        }
        let tail = SampleCounter::wrapping_index_add(self.head, self.len, self.capacity);
        self.samples[tail] = sample;
        self.len += 1;
        true
    }

    /// Samples in insertion order, oldest first.
    ///
    /// Rotates the storage in place so the contents are contiguous.
    pub fn as_slice(&mut self) -> &[f32] {
        if self.head != 0 {
            self.samples[..self.capacity].rotate_left(self.head);
            self.head = 0;
        }
        &self.samples[..self.len]
    }

    /// Most recent sample
    pub fn last(&self) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let newest = SampleCounter::wrapping_index_add(self.head, self.len - 1, self.capacity);
        Some(self.samples[newest])
    }

    /// Drop all samples, keeping the storage
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Log the full contents at trace level
    #[cfg(feature = "trace_capture")]
    pub fn trace_samples(&mut self) {
        let samples = self.as_slice();
        trace!("captured {} samples:\n{:?}", samples.len(), samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_on_overflow() {
        let mut counter = SampleCounter::new(u32::MAX - 1);
        counter.increment();
        assert_eq!(counter.get_counter(), u32::MAX);
        counter.increment();
        assert_eq!(counter.get_counter(), 0);
        assert_eq!(SampleCounter::new(u32::MAX).offset(2).get_counter(), 1);
    }

    #[test]
    fn ring_evicts_oldest_in_order() {
        let mut ring = CaptureBuffer::<8>::new(BufferMode::Ring, 4).unwrap();
        for v in 0..6 {
            assert!(ring.push(v as f32));
        }
        assert!(ring.is_full());
        assert_eq!(ring.last(), Some(5.0));
        assert_eq!(ring.as_slice(), &[2.0, 3.0, 4.0, 5.0]);
        ring.push(6.0);
        assert_eq!(ring.as_slice(), &[3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn partially_filled_ring_after_rotation() {
        let mut ring = CaptureBuffer::<4>::new(BufferMode::Ring, 4).unwrap();
        for v in 0..5 {
            ring.push(v as f32);
        }
        ring.as_slice();
        ring.clear();
        ring.push(9.0);
        ring.push(10.0);
        assert_eq!(ring.as_slice(), &[9.0, 10.0]);
    }

    #[test]
    fn block_rejects_when_full() {
        let mut block = CaptureBuffer::<4>::new(BufferMode::Block, 3).unwrap();
        assert!(block.push(1.0));
        assert!(block.push(2.0));
        assert!(block.push(3.0));
        assert!(!block.push(4.0));
        assert_eq!(block.as_slice(), &[1.0, 2.0, 3.0]);
        block.clear();
        assert!(block.is_empty());
        assert_eq!(block.last(), None);
    }

    #[test]
    fn capacity_must_fit_storage() {
        assert!(CaptureBuffer::<4>::new(BufferMode::Ring, 5).is_err());
        assert!(CaptureBuffer::<4>::new(BufferMode::Block, 0).is_err());
    }
}
