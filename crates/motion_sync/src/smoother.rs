//! Blends the rendered position toward the resolver's target.
//!
//! Small errors are smoothed with a critically damped spring (no overshoot, time constant
//! `1 / smoothing_rate`). Errors of at least `snap_distance` are corrected instantly.

use bevy::math::Vec3;
use tracing::info;

/// What [`MotionSmoother::apply`] did this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    Smoothed(Vec3),
    /// Hard-snapped to the target. Callers must drop their velocity history.
    Snapped(Vec3),
}

impl Correction {
    pub fn position(&self) -> Vec3 {
        match *self {
            Correction::Smoothed(p) | Correction::Snapped(p) => p,
        }
    }

    pub fn is_snap(&self) -> bool {
        matches!(self, Correction::Snapped(_))
    }
}

/// Critically damped follower with a snap threshold.
#[derive(Debug, Clone, Default)]
pub struct MotionSmoother {
    /// Spring velocity carried between ticks.
    velocity: Vec3,
}

impl MotionSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether moving from `current` to `target` exceeds the snap threshold.
    pub fn should_snap(current: Vec3, target: Vec3, snap_distance: f32) -> bool {
        current.distance_squared(target) >= snap_distance * snap_distance
    }

    /// Moves `current` toward `target` for one tick of length `dt`.
    pub fn apply(
        &mut self,
        current: Vec3,
        target: Vec3,
        dt: f32,
        smoothing_rate: f32,
        snap_distance: f32,
    ) -> Correction {
        if Self::should_snap(current, target, snap_distance) {
            info!(
                "Snapping {:.3} units from {:?} to {:?}",
                current.distance(target),
                current,
                target
            );
            self.velocity = Vec3::ZERO;
            return Correction::Snapped(target);
        }

        Correction::Smoothed(self.smooth_damp(current, target, dt, 1.0 / smoothing_rate))
    }

    /// Closed-form critically damped step toward `target` with time constant `smooth_time`.
    ///
    /// Never passes the target: if a step would overshoot, the result is clamped to the target
    /// and the spring comes to rest.
    pub fn smooth_damp(&mut self, current: Vec3, target: Vec3, dt: f32, smooth_time: f32) -> Vec3 {
        if dt <= 0.0 {
            return current;
        }

        let smooth_time = smooth_time.max(1e-4);
        let omega = 2.0 / smooth_time;
        let x = omega * dt;
        let decay = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);

        let change = current - target;
        let temp = (self.velocity + omega * change) * dt;
        self.velocity = (self.velocity - omega * temp) * decay;

        let output = target + (change + temp) * decay;
        if (target - current).dot(output - target) > 0.0 {
            self.velocity = Vec3::ZERO;
            return target;
        }
        output
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn reset(&mut self) {
        self.velocity = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_threshold_is_inclusive() {
        let origin = Vec3::ZERO;
        assert!(MotionSmoother::should_snap(origin, Vec3::new(5.0, 0.0, 0.0), 5.0));
        assert!(!MotionSmoother::should_snap(origin, Vec3::new(4.999, 0.0, 0.0), 5.0));
        assert!(MotionSmoother::should_snap(origin, Vec3::new(3.0, 4.0, 0.0), 5.0));
    }

    #[test]
    fn test_snap_resets_spring() {
        let mut smoother = MotionSmoother::new();
        smoother.apply(Vec3::ZERO, Vec3::X, 0.016, 10.0, 5.0);
        assert_ne!(smoother.velocity(), Vec3::ZERO);

        let correction = smoother.apply(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 0.016, 10.0, 5.0);
        assert_eq!(correction, Correction::Snapped(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(smoother.velocity(), Vec3::ZERO);
    }

    #[test]
    fn test_converges_without_overshoot() {
        let mut smoother = MotionSmoother::new();
        let target = Vec3::new(2.0, 0.0, -1.0);
        let mut position = Vec3::ZERO;

        for _ in 0..240 {
            let next = smoother.apply(position, target, 1.0 / 60.0, 10.0, 5.0).position();
            // Each component approaches monotonically from its starting side.
            assert!(next.x <= target.x + 1e-6);
            assert!(next.z >= target.z - 1e-6);
            position = next;
        }

        assert!(position.abs_diff_eq(target, 1e-3));
    }

    #[test]
    fn test_faster_rate_closes_more_distance() {
        let target = Vec3::new(1.0, 0.0, 0.0);
        let slow = MotionSmoother::new()
            .apply(Vec3::ZERO, target, 0.05, 2.0, 5.0)
            .position();
        let fast = MotionSmoother::new()
            .apply(Vec3::ZERO, target, 0.05, 20.0, 5.0)
            .position();

        assert!(fast.x > slow.x);
        assert!(slow.x > 0.0);
    }

    #[test]
    fn test_zero_dt_holds_position() {
        let mut smoother = MotionSmoother::new();
        let current = Vec3::new(0.5, 0.5, 0.5);
        let correction = smoother.apply(current, Vec3::ZERO, 0.0, 10.0, 5.0);
        assert_eq!(correction, Correction::Smoothed(current));
    }
}
