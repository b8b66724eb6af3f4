//! # History Buffer
//!
//! Time-bounded sequence of samples for one device. Samples are kept in
//! arrival order; the buffer is trimmed from the front after every insert.

use std::collections::VecDeque;

use crate::analytics::Window;
use crate::sample::Sample;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<Sample>,
    retention_ms: f64,
}

impl HistoryBuffer {
    pub fn new(retention_ms: f64) -> Self {
        Self {
            samples: VecDeque::new(),
            retention_ms,
        }
    }

    /// Append `sample` and drop everything older than `retention_ms` before
    /// the sample's own timestamp. Returns how many samples were dropped.
    pub fn push(&mut self, sample: Sample) -> usize {
        let now = sample.timestamp;
        self.samples.push_back(sample);
        self.trim(now)
    }

    /// Prefix trim: pops from the front while the oldest sample is before
    /// `now - retention_ms`.
    pub fn trim(&mut self, now: f64) -> usize {
        let cut = now - self.retention_ms;
        let mut dropped = 0;
        while self.samples.front().is_some_and(|s| s.timestamp < cut) {
            self.samples.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Samples inside the closed interval `[now - ms, now]`.
    pub fn window(&self, now: f64, ms: f64) -> Window<'_> {
        let start = now - ms;
        Window::new(
            self.samples
                .iter()
                .filter(|s| s.timestamp >= start && s.timestamp <= now)
                .collect(),
        )
    }

    /// Most recently appended sample.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn retention_ms(&self) -> f64 {
        self.retention_ms
    }
}
