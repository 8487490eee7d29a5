//! Client-side position reconciliation for network-replicated entities.
//!
//! Remote entities are rendered a fixed delay behind real time from a bounded history of
//! received positions: interpolated when the history brackets the render time, extrapolated
//! from an averaged velocity when it does not, and smoothed toward the result with a hard snap
//! for large divergences. The owning peer renders its local simulation and records predictions.
//!
//! The engine ([`ReplicatedMotion`]) is independent of the ECS and only needs a [`Clock`].
//! [`MotionSyncPlugin`] wires it into a Bevy app.

pub mod clock;
pub mod config;
pub mod error;
pub mod motion;
pub mod plugin;
pub mod predictor;
pub mod resolver;
pub mod smoother;
pub mod snapshot;
pub mod velocity;

pub use clock::{Clock, FrameClock};
pub use config::{
    load_section, parse_section, write_section, Settings, SyncSettings, MAX_HISTORY_LEN,
};
pub use error::SettingsError;
pub use motion::{ReplicatedMotion, Role, TransportAdapter};
pub use plugin::{LocalVelocity, MotionSyncPlugin, MotionSyncSet, NetworkedMotion, ServerPosition};
pub use predictor::{LocalSimulation, OwnerPredictor};
pub use resolver::{PositionResolver, Resolution, Strategy};
pub use smoother::{Correction, MotionSmoother};
pub use snapshot::{Admission, AdmissionPolicy, PruneMode, Snapshot, SnapshotBuffer};
pub use velocity::VelocityEstimator;
