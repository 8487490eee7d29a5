//! Bevy integration.
//!
//! The replication layer writes authoritative positions into [`ServerPosition`]. Every frame the
//! plugin admits changed server positions into each entity's [`NetworkedMotion`], resolves remote
//! entities into their `Transform`, and runs the predictor for the locally owned entity.

use bevy::ecs::schedule::SystemSet;
use bevy::prelude::*;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::SyncSettings;
use crate::motion::ReplicatedMotion;
use crate::snapshot::Admission;

/// Plugin that adds client-side reconciliation for replicated entities.
pub struct MotionSyncPlugin;

impl Plugin for MotionSyncPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SyncSettings>()
            .configure_sets(
                Update,
                (MotionSyncSet::Receive, MotionSyncSet::Resolve).chain(),
            )
            .add_systems(Update, capture_remote_updates.in_set(MotionSyncSet::Receive))
            .add_systems(
                Update,
                (resolve_remote_motion, predict_owner_motion).in_set(MotionSyncSet::Resolve),
            );
    }
}

#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionSyncSet {
    /// Admit server positions that changed since the last frame.
    Receive,
    /// Write rendered positions.
    Resolve,
}

/// Authoritative position as last received from the server.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct ServerPosition {
    pub translation: Vec3,
    /// Send-order number of the packet that carried `translation`, when the transport has one.
    pub sequence: Option<u64>,
}

/// Velocity of the locally simulated (owned) entity.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalVelocity {
    pub linear: Vec3,
}

/// Reconciliation state of one replicated entity.
#[derive(Component, Debug, Clone, Deref, DerefMut)]
pub struct NetworkedMotion(pub ReplicatedMotion);

impl NetworkedMotion {
    pub fn remote(position: Vec3, settings: SyncSettings, time: &Time) -> Self {
        Self(ReplicatedMotion::remote(position, settings, time))
    }

    pub fn owner(position: Vec3, settings: SyncSettings, time: &Time) -> Self {
        Self(ReplicatedMotion::owner(position, settings, time))
    }
}

impl<T: Default> Clock for Time<T> {
    fn now(&self) -> f64 {
        self.elapsed_secs_f64()
    }

    fn frame_delta(&self) -> f32 {
        self.delta_secs()
    }
}

/// Admits changed server positions.
///
/// Entities seen for the first time get a remote [`NetworkedMotion`] spawned at the received
/// position.
pub fn capture_remote_updates(
    mut commands: Commands,
    settings: Res<SyncSettings>,
    time: Res<Time>,
    mut updated: Query<
        (Entity, &ServerPosition, Option<&mut NetworkedMotion>),
        Changed<ServerPosition>,
    >,
) {
    for (entity, server_position, maybe_motion) in &mut updated {
        match maybe_motion {
            Some(mut motion) => {
                let admission = match server_position.sequence {
                    Some(sequence) => motion.on_sequenced_update(
                        server_position.translation,
                        sequence,
                        &*time,
                    ),
                    None => motion.on_remote_update(server_position.translation, &*time),
                };
                if admission == Admission::Rejected {
                    debug!("Dropped server position for {:?}", entity);
                }
            }
            None => {
                let mut motion =
                    NetworkedMotion::remote(server_position.translation, settings.clone(), &time);
                if let Some(sequence) = server_position.sequence {
                    motion.on_sequenced_update(server_position.translation, sequence, &*time);
                }
                commands.entity(entity).insert(motion);
                info!(
                    "Initialized motion sync for {:?} at {:?}",
                    entity, server_position.translation
                );
            }
        }
    }
}

/// Resolves every remote entity and writes the result into its `Transform`.
pub fn resolve_remote_motion(
    time: Res<Time>,
    mut remotes: Query<(&mut Transform, &mut NetworkedMotion)>,
) {
    for (mut transform, mut motion) in &mut remotes {
        if motion.is_owner() {
            continue;
        }
        transform.translation = motion.resolve(&*time);
    }
}

/// Feeds the owner's simulated position and velocity to its predictor.
pub fn predict_owner_motion(
    time: Res<Time>,
    mut owners: Query<(&Transform, &LocalVelocity, &mut NetworkedMotion)>,
) {
    for (transform, velocity, mut motion) in &mut owners {
        motion.owner_tick(transform.translation, &velocity.linear, &*time);
    }
}
