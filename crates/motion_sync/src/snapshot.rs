//! Bounded history of timestamped positions.
//!
//! The buffer is a receive-side jitter buffer: timestamps are the local clock at admission, not
//! anything the sender embedded. Storage is allocated once at construction and used as a ring
//! (head index + length), so pushing and evicting never reallocate.

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single position sample stamped with local time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub position: Vec3,
    pub timestamp: f64,
}

impl Snapshot {
    pub fn new(position: Vec3, timestamp: f64) -> Self {
        Self {
            position,
            timestamp,
        }
    }
}

/// How [`SnapshotBuffer::admit`] treats snapshots that arrive out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdmissionPolicy {
    /// Append everything in arrival order, even when timestamps go backwards.
    AcceptAll,
    /// Drop snapshots older than the newest entry and fold equal timestamps into it.
    #[default]
    RejectStale,
}

/// How the cutoff phase of pruning treats entries older than the render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PruneMode {
    /// Drop every entry older than the cutoff, keeping at least one entry.
    #[default]
    Strict,
    /// Keep the newest entry older than the cutoff so the render time stays bracketed.
    KeepBracket,
}

/// Outcome of [`SnapshotBuffer::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Appended,
    /// Same timestamp as the newest entry; its position was replaced.
    Coalesced,
    Rejected,
}

/// Fixed-capacity FIFO of [`Snapshot`]s, oldest first.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    slots: Vec<Snapshot>,
    head: usize,
    len: usize,
}

impl SnapshotBuffer {
    /// Creates an empty buffer holding at most `capacity` snapshots.
    ///
    /// A capacity of zero is raised to one so the buffer can always hold the latest sample.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Snapshot::default(); capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a snapshot, evicting the oldest one when the buffer is full.
    pub fn push(&mut self, position: Vec3, timestamp: f64) {
        let snapshot = Snapshot::new(position, timestamp);
        if self.len == self.capacity() {
            // Full: the slot at `head` holds the oldest entry, overwrite it.
            self.slots[self.head] = snapshot;
            self.head = self.wrap(self.head + 1);
        } else {
            let tail = self.wrap(self.head + self.len);
            self.slots[tail] = snapshot;
            self.len += 1;
        }
    }

    /// Pushes a snapshot subject to `policy`.
    pub fn admit(&mut self, position: Vec3, timestamp: f64, policy: AdmissionPolicy) -> Admission {
        if policy == AdmissionPolicy::RejectStale {
            if let Some(newest) = self.newest() {
                if timestamp < newest.timestamp {
                    debug!(
                        "Rejected stale snapshot at t={:.4} (newest t={:.4})",
                        timestamp, newest.timestamp
                    );
                    return Admission::Rejected;
                }
                if timestamp == newest.timestamp {
                    let idx = self.wrap(self.head + self.len - 1);
                    self.slots[idx].position = position;
                    return Admission::Coalesced;
                }
            }
        }

        self.push(position, timestamp);
        Admission::Appended
    }

    /// Two-phase eviction.
    ///
    /// Phase 1 drops entries older than `cutoff` but always keeps at least one. Phase 2 drops
    /// entries more than `max_age` seconds older than `now` and may empty the buffer.
    pub fn prune(&mut self, cutoff: f64, now: f64, max_age: f64) {
        self.prune_with(PruneMode::Strict, cutoff, now, max_age);
    }

    /// [`prune`](Self::prune) with a choice of cutoff behaviour.
    pub fn prune_with(&mut self, mode: PruneMode, cutoff: f64, now: f64, max_age: f64) {
        match mode {
            PruneMode::Strict => {
                while self.len >= 2 && self.slots[self.head].timestamp < cutoff {
                    self.evict_oldest();
                }
            }
            PruneMode::KeepBracket => {
                while self.len >= 2 && self.slots[self.wrap(self.head + 1)].timestamp <= cutoff {
                    self.evict_oldest();
                }
            }
        }

        while self.len > 0 && now - self.slots[self.head].timestamp > max_age {
            self.evict_oldest();
        }
    }

    /// Current contents, oldest first.
    pub fn snapshot_array(&self) -> Vec<Snapshot> {
        self.iter().collect()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Snapshot> + '_ {
        (0..self.len).map(move |i| self.slots[self.wrap(self.head + i)])
    }

    /// Entry `index` positions after the oldest.
    pub fn get(&self, index: usize) -> Option<Snapshot> {
        (index < self.len).then(|| self.slots[self.wrap(self.head + index)])
    }

    pub fn oldest(&self) -> Option<Snapshot> {
        self.get(0)
    }

    pub fn newest(&self) -> Option<Snapshot> {
        self.len.checked_sub(1).and_then(|last| self.get(last))
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Reallocates the ring to `capacity`, keeping the newest entries that fit.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.capacity() {
            return;
        }

        let keep = self.len.min(capacity);
        let skip = self.len - keep;
        let mut slots = vec![Snapshot::default(); capacity];
        for (slot, snapshot) in slots.iter_mut().zip(self.iter().skip(skip)) {
            *slot = snapshot;
        }

        self.slots = slots;
        self.head = 0;
        self.len = keep;
    }

    fn evict_oldest(&mut self) {
        self.head = self.wrap(self.head + 1);
        self.len -= 1;
    }

    fn wrap(&self, index: usize) -> usize {
        index % self.slots.len()
    }
}
