// SPDX-License-Identifier: Apache-2.0

//! Moving-average smoothing of raw samples

use heapless::Deque;

use crate::error::Error;

/// Largest supported averaging window
pub const MAX_WINDOW: usize = 32;

/// Fixed-window running mean.
///
/// Before the window has filled, the output is the mean of however many samples have arrived so
/// far.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    /// Most recent inputs, oldest at the front
    window: Deque<f32, MAX_WINDOW>,
    /// Number of inputs averaged once warmed up
    size: usize,
}

impl MovingAverage {
    /// Create a filter averaging the last `size` inputs (`1..=MAX_WINDOW`)
    pub fn new(size: usize) -> Result<Self, Error> {
        if size == 0 || size > MAX_WINDOW {
            return Err(Error::InvalidConfig);
        }
        Ok(Self {
            window: Deque::new(),
            size,
        })
    }

    /// Window size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Insert a value, evicting the oldest once full, and return the current mean
    pub fn push(&mut self, value: f32) -> f32 {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        // `size` never exceeds the deque capacity, so a slot is always free here
        let pushed = self.window.push_back(value);
        debug_assert!(pushed.is_ok(), "moving average window overflowed");
        self.mean()
    }

    /// Mean of the current contents, 0 when empty
    pub fn mean(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    /// Forget all history
    pub fn clear(&mut self) {
        self.window.clear();
    }
}
