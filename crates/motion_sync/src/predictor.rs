//! Owner-side prediction.
//!
//! The owner is authoritative and renders straight from its local simulation. It still records
//! where it expects to be one tick ahead so the history stays populated if ownership moves.

use bevy::math::Vec3;
use tracing::trace;

use crate::clock::Clock;
use crate::snapshot::{Snapshot, SnapshotBuffer};

/// Source of the owner's simulated velocity.
pub trait LocalSimulation {
    fn local_velocity(&self) -> Vec3;
}

impl LocalSimulation for Vec3 {
    fn local_velocity(&self) -> Vec3 {
        *self
    }
}

#[derive(Debug, Clone, Default)]
pub struct OwnerPredictor {
    last_prediction: Option<Snapshot>,
}

impl OwnerPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `current_position + velocity * frame_delta` stamped with `now`.
    pub fn tick<C: Clock, S: LocalSimulation + ?Sized>(
        &mut self,
        buffer: &mut SnapshotBuffer,
        current_position: Vec3,
        simulation: &S,
        clock: &C,
    ) -> Snapshot {
        let velocity = simulation.local_velocity();
        let predicted = current_position + velocity * clock.frame_delta();
        let snapshot = Snapshot::new(predicted, clock.now());

        buffer.push(snapshot.position, snapshot.timestamp);
        trace!("Owner predicted {:?} at t={:.4}", predicted, snapshot.timestamp);

        self.last_prediction = Some(snapshot);
        snapshot
    }

    pub fn last_prediction(&self) -> Option<Snapshot> {
        self.last_prediction
    }
}
