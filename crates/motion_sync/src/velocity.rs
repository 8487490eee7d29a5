//! Rolling velocity estimate from consecutive snapshots.

use std::collections::VecDeque;

use bevy::math::Vec3;

use crate::snapshot::Snapshot;

/// Keeps the last `window` finite-difference velocities and averages them on read.
#[derive(Debug, Clone)]
pub struct VelocityEstimator {
    samples: VecDeque<Vec3>,
    window: usize,
}

impl VelocityEstimator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Records `(newer - older) / dt`. Does nothing unless `dt > 0`.
    pub fn record_velocity(&mut self, older: &Snapshot, newer: &Snapshot) {
        let dt = newer.timestamp - older.timestamp;
        if dt <= 0.0 {
            return;
        }

        self.push_sample((newer.position - older.position) / dt as f32);
    }

    pub fn push_sample(&mut self, velocity: Vec3) {
        self.samples.push_back(velocity);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the current samples, or zero when there are none.
    ///
    /// Accumulated as a running mean so a window of identical samples returns that sample
    /// bit for bit.
    pub fn average_velocity(&self) -> Vec3 {
        self.samples
            .iter()
            .enumerate()
            .fold(Vec3::ZERO, |mean, (i, v)| mean + (*v - mean) / (i + 1) as f32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Changes the window size, dropping the oldest samples that no longer fit.
    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(1);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }
}
