//! Per-entity reconciliation engine.
//!
//! [`ReplicatedMotion`] owns the snapshot history, the velocity estimate and a role chosen at
//! spawn. Remote entities resolve and smooth toward the delayed history every tick; the owner
//! renders from its local simulation and only runs the predictor.

use bevy::math::Vec3;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{Settings, SyncSettings};
use crate::error::SettingsError;
use crate::predictor::{LocalSimulation, OwnerPredictor};
use crate::resolver::{PositionResolver, Strategy};
use crate::smoother::{Correction, MotionSmoother};
use crate::snapshot::{Admission, AdmissionPolicy, Snapshot, SnapshotBuffer};
use crate::velocity::VelocityEstimator;

/// Capability the transport layer drives: admit updates as they arrive, resolve once per tick.
pub trait TransportAdapter {
    fn on_remote_update(&mut self, position: Vec3, clock: &dyn Clock) -> Admission;

    /// Like [`on_remote_update`](Self::on_remote_update), for transports that number their
    /// packets in send order.
    fn on_sequenced_update(
        &mut self,
        position: Vec3,
        sequence: u64,
        clock: &dyn Clock,
    ) -> Admission;

    /// Advances the rendered position by one tick and returns it.
    fn resolve(&mut self, clock: &dyn Clock) -> Vec3;
}

/// Which side of the replication an entity is on.
#[derive(Debug, Clone)]
pub enum Role {
    /// Authoritative peer: renders from local simulation.
    Owner(OwnerPredictor),
    /// Everyone else: renders a smoothed, delayed reconstruction.
    Remote {
        resolver: PositionResolver,
        smoother: MotionSmoother,
    },
}

impl Role {
    fn owner() -> Self {
        Role::Owner(OwnerPredictor::new())
    }

    fn remote(settings: &SyncSettings) -> Self {
        Role::Remote {
            resolver: PositionResolver::new(settings),
            smoother: MotionSmoother::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplicatedMotion {
    settings: SyncSettings,
    buffer: SnapshotBuffer,
    velocity: VelocityEstimator,
    role: Role,
    render_position: Vec3,
    last_strategy: Option<Strategy>,
    snap_count: u64,
    /// Highest sender sequence number admitted so far.
    last_sequence: Option<u64>,
}

impl ReplicatedMotion {
    /// Spawns an entity rendered from received updates.
    pub fn remote<C: Clock>(position: Vec3, settings: SyncSettings, clock: &C) -> Self {
        let role = Role::remote(&settings);
        Self::spawn(role, position, settings, clock)
    }

    /// Spawns an entity driven by the local simulation.
    pub fn owner<C: Clock>(position: Vec3, settings: SyncSettings, clock: &C) -> Self {
        Self::spawn(Role::owner(), position, settings, clock)
    }

    fn spawn<C: Clock>(role: Role, position: Vec3, settings: SyncSettings, clock: &C) -> Self {
        let mut motion = Self {
            buffer: SnapshotBuffer::with_capacity(settings.max_buffer_size),
            velocity: VelocityEstimator::new(settings.velocity_buffer_size),
            settings,
            role,
            render_position: position,
            last_strategy: None,
            snap_count: 0,
            last_sequence: None,
        };
        motion.buffer.push(position, clock.now());
        motion
    }

    /// Drops all history and restarts from `position` as if freshly spawned.
    pub fn reinitialize<C: Clock>(&mut self, position: Vec3, clock: &C) {
        self.buffer.clear();
        self.velocity.clear();
        self.buffer.push(position, clock.now());
        self.render_position = position;
        self.last_strategy = None;
        self.last_sequence = None;
        if let Role::Remote { resolver, smoother } = &mut self.role {
            resolver.reset();
            smoother.reset();
        }
        debug!("Reinitialized motion at {:?}", position);
    }

    /// Stamps `position` with the local receipt time and admits it.
    ///
    /// Owners are their own authority and ignore remote updates. Packets reordered in transit are
    /// admitted as new; use [`on_sequenced_update`](Self::on_sequenced_update) when the transport
    /// numbers its packets.
    pub fn on_remote_update<C: Clock>(&mut self, position: Vec3, clock: &C) -> Admission {
        if self.is_owner() {
            debug!("Owner ignored remote update {:?}", position);
            return Admission::Rejected;
        }
        self.buffer
            .admit(position, clock.now(), self.settings.admission_policy)
    }

    /// Admits `position` tagged with the sender's sequence number.
    ///
    /// Receipt timestamps cannot reveal network reordering, so under
    /// [`AdmissionPolicy::RejectStale`] any sequence number at or below the highest one admitted
    /// so far is rejected, whether it arrives in a later tick or in the same tick as a newer
    /// packet. `AcceptAll` admits everything.
    pub fn on_sequenced_update<C: Clock>(
        &mut self,
        position: Vec3,
        sequence: u64,
        clock: &C,
    ) -> Admission {
        if self.is_owner() {
            debug!("Owner ignored remote update #{}", sequence);
            return Admission::Rejected;
        }

        let policy = self.settings.admission_policy;
        if let Some(last) = self.last_sequence {
            if policy == AdmissionPolicy::RejectStale && sequence <= last {
                debug!("Rejected out-of-order update #{} (last #{})", sequence, last);
                return Admission::Rejected;
            }
        }

        let admission = self.buffer.admit(position, clock.now(), policy);
        if admission != Admission::Rejected {
            self.last_sequence = self.last_sequence.max(Some(sequence));
        }
        admission
    }

    /// Runs one remote tick: prune, resolve the delayed target, smooth toward it.
    ///
    /// Owners return their current position unchanged.
    pub fn resolve<C: Clock>(&mut self, clock: &C) -> Vec3 {
        let Role::Remote { resolver, smoother } = &mut self.role else {
            return self.render_position;
        };

        let now = clock.now();
        let render_time = now - self.settings.interpolation_delay;
        self.buffer.prune_with(
            self.settings.prune_mode,
            render_time,
            now,
            self.settings.max_state_age,
        );

        let resolution = resolver.resolve(
            &self.buffer,
            &mut self.velocity,
            self.render_position,
            clock,
            &self.settings,
        );
        self.last_strategy = Some(resolution.strategy);

        let correction = smoother.apply(
            self.render_position,
            resolution.target,
            clock.frame_delta(),
            self.settings.smoothing_rate,
            self.settings.snap_distance,
        );
        if let Correction::Snapped(_) = correction {
            // A teleport must not leak into later velocity averages.
            self.velocity.clear();
            self.buffer.clear();
            self.snap_count += 1;
        }

        self.render_position = correction.position();
        self.render_position
    }

    /// Runs one owner tick from the simulated `position` and velocity.
    ///
    /// Returns the predicted snapshot, or `None` on remote entities.
    pub fn owner_tick<C: Clock, S: LocalSimulation + ?Sized>(
        &mut self,
        position: Vec3,
        simulation: &S,
        clock: &C,
    ) -> Option<Snapshot> {
        let Role::Owner(predictor) = &mut self.role else {
            return None;
        };

        self.render_position = position;
        Some(predictor.tick(&mut self.buffer, position, simulation, clock))
    }

    /// Switches a remote entity to the owner role. History is kept.
    pub fn take_ownership(&mut self) {
        if !self.is_owner() {
            info!("Took ownership at {:?}", self.render_position);
            self.role = Role::owner();
            self.last_strategy = None;
        }
    }

    /// Switches an owned entity to the remote role. History is kept.
    pub fn release_ownership(&mut self) {
        if self.is_owner() {
            info!("Released ownership at {:?}", self.render_position);
            self.role = Role::remote(&self.settings);
        }
    }

    /// Replaces the settings, resizing the history buffers to the new bounds.
    pub fn retune(&mut self, settings: SyncSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        self.buffer.resize(settings.max_buffer_size);
        self.velocity.set_window(settings.velocity_buffer_size);
        if let Role::Remote { resolver, .. } = &mut self.role {
            resolver.set_hysteresis_ticks(settings.spline_hysteresis_ticks);
        }
        self.settings = settings;
        Ok(())
    }

    pub fn current_render_position(&self) -> Vec3 {
        self.render_position
    }

    pub fn is_owner(&self) -> bool {
        matches!(self.role, Role::Owner(_))
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn velocity(&self) -> &VelocityEstimator {
        &self.velocity
    }

    /// Strategy used by the most recent remote resolve.
    pub fn last_strategy(&self) -> Option<Strategy> {
        self.last_strategy
    }

    /// Highest sender sequence number admitted, if any sequenced update arrived.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Hard-snaps since spawn.
    pub fn snap_count(&self) -> u64 {
        self.snap_count
    }
}

impl TransportAdapter for ReplicatedMotion {
    fn on_remote_update(&mut self, position: Vec3, clock: &dyn Clock) -> Admission {
        ReplicatedMotion::on_remote_update(self, position, &clock)
    }

    fn on_sequenced_update(
        &mut self,
        position: Vec3,
        sequence: u64,
        clock: &dyn Clock,
    ) -> Admission {
        ReplicatedMotion::on_sequenced_update(self, position, sequence, &clock)
    }

    fn resolve(&mut self, clock: &dyn Clock) -> Vec3 {
        ReplicatedMotion::resolve(self, &clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrameClock;

    fn settings() -> SyncSettings {
        SyncSettings::default()
    }

    #[test]
    fn test_spawn_seeds_history() {
        let clock = FrameClock::new(2.0, 0.016);
        let motion = ReplicatedMotion::remote(Vec3::Y, settings(), &clock);

        assert_eq!(motion.buffer().len(), 1);
        assert_eq!(motion.buffer().newest(), Some(Snapshot::new(Vec3::Y, 2.0)));
        assert_eq!(motion.current_render_position(), Vec3::Y);
    }

    #[test]
    fn test_owner_ignores_remote_updates() {
        let clock = FrameClock::new(0.0, 0.016);
        let mut motion = ReplicatedMotion::owner(Vec3::ZERO, settings(), &clock);

        assert_eq!(
            motion.on_remote_update(Vec3::X, &clock),
            Admission::Rejected
        );
        assert_eq!(motion.buffer().len(), 1);
    }

    #[test]
    fn test_owner_tick_renders_local_position() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::owner(Vec3::ZERO, settings(), &clock);
        clock.advance(0.5);

        let predicted = motion
            .owner_tick(Vec3::new(1.0, 0.0, 0.0), &Vec3::new(2.0, 0.0, 0.0), &clock)
            .unwrap();

        assert_eq!(predicted.position, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(motion.current_render_position(), Vec3::new(1.0, 0.0, 0.0));
        // Resolving an owner is a no-op.
        assert_eq!(motion.resolve(&clock), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_remote_tick_without_updates_holds_position() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::remote(Vec3::new(3.0, 0.0, 0.0), settings(), &clock);

        for _ in 0..120 {
            clock.advance(1.0 / 60.0);
            let position = motion.resolve(&clock);
            assert!(position.abs_diff_eq(Vec3::new(3.0, 0.0, 0.0), 1e-5));
        }
        // The spawn snapshot aged out, leaving only extrapolation from the render position.
        assert_eq!(motion.last_strategy(), Some(Strategy::ExtrapolateRendered));
    }

    #[test]
    fn test_large_divergence_snaps_and_clears_history() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::remote(Vec3::ZERO, settings(), &clock);

        clock.advance(0.05);
        motion.on_remote_update(Vec3::new(20.0, 0.0, 0.0), &clock);
        clock.advance(0.05);
        motion.on_remote_update(Vec3::new(20.0, 0.0, 0.0), &clock);

        // Step past the interpolation delay so the teleported entries are all that remain.
        clock.advance(0.25);
        let position = motion.resolve(&clock);

        assert_eq!(position, Vec3::new(20.0, 0.0, 0.0));
        assert_eq!(motion.snap_count(), 1);
        assert!(motion.velocity().is_empty());
        assert!(motion.buffer().is_empty());
    }

    #[test]
    fn test_late_sequence_in_later_tick_is_rejected() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::remote(Vec3::ZERO, settings(), &clock);

        clock.advance(0.05);
        assert_eq!(
            motion.on_sequenced_update(Vec3::splat(1.0), 1, &clock),
            Admission::Appended
        );
        clock.advance(0.05);
        assert_eq!(
            motion.on_sequenced_update(Vec3::splat(3.0), 3, &clock),
            Admission::Appended
        );
        // Packet 2 was overtaken on the wire and shows up one tick later.
        clock.advance(0.05);
        assert_eq!(
            motion.on_sequenced_update(Vec3::splat(2.0), 2, &clock),
            Admission::Rejected
        );
        assert_eq!(
            motion.on_sequenced_update(Vec3::splat(3.0), 3, &clock),
            Admission::Rejected
        );

        assert_eq!(motion.buffer().len(), 3);
        assert_eq!(motion.buffer().newest().unwrap().position, Vec3::splat(3.0));
        assert_eq!(motion.last_sequence(), Some(3));
    }

    #[test]
    fn test_late_sequence_in_same_tick_keeps_newer_position() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::remote(Vec3::ZERO, settings(), &clock);
        clock.advance(0.05);

        // Delivered newest first within one tick.
        motion.on_sequenced_update(Vec3::splat(5.0), 5, &clock);
        assert_eq!(
            motion.on_sequenced_update(Vec3::splat(4.0), 4, &clock),
            Admission::Rejected
        );
        assert_eq!(motion.buffer().newest().unwrap().position, Vec3::splat(5.0));

        // In order within one tick, the newer one replaces the older.
        clock.advance(0.05);
        motion.on_sequenced_update(Vec3::splat(6.0), 6, &clock);
        assert_eq!(
            motion.on_sequenced_update(Vec3::splat(7.0), 7, &clock),
            Admission::Coalesced
        );
        assert_eq!(motion.buffer().newest().unwrap().position, Vec3::splat(7.0));
    }

    #[test]
    fn test_accept_all_ignores_sequence_order() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let accept_all = SyncSettings {
            admission_policy: AdmissionPolicy::AcceptAll,
            ..settings()
        };
        let mut motion = ReplicatedMotion::remote(Vec3::ZERO, accept_all, &clock);

        clock.advance(0.05);
        motion.on_sequenced_update(Vec3::X, 9, &clock);
        clock.advance(0.05);
        assert_eq!(
            motion.on_sequenced_update(Vec3::Y, 8, &clock),
            Admission::Appended
        );
        assert_eq!(motion.last_sequence(), Some(9));
    }

    #[test]
    fn test_role_handoff_keeps_history() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::owner(Vec3::ZERO, settings(), &clock);
        for _ in 0..3 {
            clock.advance(0.1);
            motion.owner_tick(Vec3::ZERO, &Vec3::X, &clock);
        }

        motion.release_ownership();
        assert!(!motion.is_owner());
        assert_eq!(motion.buffer().len(), 4);

        motion.take_ownership();
        assert!(motion.is_owner());
        assert_eq!(motion.buffer().len(), 4);
    }

    #[test]
    fn test_retune_resizes_buffers() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::remote(Vec3::ZERO, settings(), &clock);
        for i in 1..=10 {
            clock.advance(0.01);
            motion.on_remote_update(Vec3::splat(i as f32), &clock);
        }

        let tuned = SyncSettings {
            max_buffer_size: 4,
            velocity_buffer_size: 2,
            ..settings()
        };
        motion.retune(tuned).unwrap();
        assert_eq!(motion.buffer().len(), 4);
        assert_eq!(motion.buffer().newest().unwrap().position, Vec3::splat(10.0));

        let invalid = SyncSettings {
            smoothing_rate: -1.0,
            ..settings()
        };
        assert!(motion.retune(invalid).is_err());
        assert_eq!(motion.settings().max_buffer_size, 4);
    }

    #[test]
    fn test_reinitialize_resets_history() {
        let mut clock = FrameClock::new(0.0, 0.0);
        let mut motion = ReplicatedMotion::remote(Vec3::ZERO, settings(), &clock);
        clock.advance(0.1);
        motion.on_remote_update(Vec3::X, &clock);

        motion.reinitialize(Vec3::Z, &clock);
        assert_eq!(
            motion.buffer().snapshot_array(),
            vec![Snapshot::new(Vec3::Z, clock.now)]
        );
        assert_eq!(motion.current_render_position(), Vec3::Z);
    }
}
