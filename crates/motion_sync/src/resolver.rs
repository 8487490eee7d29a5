//! Picks an interpolation or extrapolation strategy from the available history and computes the
//! position an entity should be rendered at.
//!
//! The strategy ladder, from most to least history:
//! - four or more snapshots: Catmull-Rom spline through the first four
//! - two or three: linear interpolation between the two oldest
//! - one: projection from that snapshot along the average velocity
//! - none: projection from the currently rendered position
//!
//! Interpolating branches record a velocity sample from the pair they interpolate between, so
//! the estimator is fed whenever there is history to learn from.

use bevy::math::Vec3;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::SyncSettings;
use crate::snapshot::{Snapshot, SnapshotBuffer};
use crate::velocity::VelocityEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Spline,
    Linear,
    /// Projection from the single remaining snapshot.
    ExtrapolateSnapshot,
    /// Projection from the rendered position; the buffer is empty.
    ExtrapolateRendered,
}

/// Output of one resolve step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub target: Vec3,
    pub strategy: Strategy,
    /// The render time the target was computed for.
    pub render_time: f64,
}

/// Uniform Catmull-Rom segment between `p1` (`u = 0`) and `p2` (`u = 1`).
pub fn catmull_rom(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, u: f32) -> Vec3 {
    let u2 = u * u;
    let u3 = u2 * u;

    0.5 * (2.0 * p1
        + (-p0 + p2) * u
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * u2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * u3)
}

/// Position of `value` between `from` and `to`, clamped to `[0, 1]`.
///
/// An empty interval maps to 0.
pub fn inverse_lerp(from: f64, to: f64, value: f64) -> f32 {
    if from == to {
        return 0.0;
    }
    ((value - from) / (to - from)).clamp(0.0, 1.0) as f32
}

/// Weighted blend that returns `a` at `u = 0` and `b` at `u = 1` without rounding drift.
fn lerp_exact(a: Vec3, b: Vec3, u: f32) -> Vec3 {
    a * (1.0 - u) + b * u
}

/// Debounces the linear -> spline upgrade.
///
/// The spline only becomes active after enough history has been available for `required`
/// consecutive ticks. Losing that history drops back immediately.
#[derive(Debug, Clone, Default)]
pub struct StrategyHysteresis {
    required: u32,
    streak: u32,
    spline_active: bool,
}

impl StrategyHysteresis {
    pub fn new(required: u32) -> Self {
        Self {
            required,
            streak: 0,
            spline_active: false,
        }
    }

    /// Chooses a strategy for `len` snapshots and advances the debounce state.
    pub fn select(&mut self, len: usize) -> Strategy {
        if len < 4 {
            self.streak = 0;
            self.spline_active = false;
            return match len {
                0 => Strategy::ExtrapolateRendered,
                1 => Strategy::ExtrapolateSnapshot,
                _ => Strategy::Linear,
            };
        }

        if !self.spline_active {
            self.streak += 1;
            if self.streak >= self.required {
                self.spline_active = true;
                self.streak = 0;
            }
        }

        if self.spline_active {
            Strategy::Spline
        } else {
            Strategy::Linear
        }
    }

    pub fn reset(&mut self) {
        self.streak = 0;
        self.spline_active = false;
    }

    pub fn set_required(&mut self, required: u32) {
        self.required = required;
    }
}

/// Stateful wrapper around [`compute_target`] that tracks strategy changes.
#[derive(Debug, Clone, Default)]
pub struct PositionResolver {
    hysteresis: StrategyHysteresis,
    last_strategy: Option<Strategy>,
}

impl PositionResolver {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            hysteresis: StrategyHysteresis::new(settings.spline_hysteresis_ticks),
            last_strategy: None,
        }
    }

    /// Resolves the target for `now - interpolation_delay` from `buffer`.
    ///
    /// The buffer should already be pruned against the same render time.
    pub fn resolve<C: Clock>(
        &mut self,
        buffer: &SnapshotBuffer,
        velocity: &mut VelocityEstimator,
        current_position: Vec3,
        clock: &C,
        settings: &SyncSettings,
    ) -> Resolution {
        let render_time = clock.now() - settings.interpolation_delay;
        let strategy = self.hysteresis.select(buffer.len());

        if self.last_strategy != Some(strategy) {
            debug!(
                "Strategy {:?} -> {:?} ({} snapshots)",
                self.last_strategy,
                strategy,
                buffer.len()
            );
            self.last_strategy = Some(strategy);
        }

        let target = compute_target(
            strategy,
            buffer,
            velocity,
            current_position,
            render_time,
            clock.frame_delta(),
            settings,
        );
        trace!("Resolved {:?} at t={:.4}: {:?}", strategy, render_time, target);

        Resolution {
            target,
            strategy,
            render_time,
        }
    }

    pub fn last_strategy(&self) -> Option<Strategy> {
        self.last_strategy
    }

    pub fn reset(&mut self) {
        self.hysteresis.reset();
        self.last_strategy = None;
    }

    pub fn set_hysteresis_ticks(&mut self, ticks: u32) {
        self.hysteresis.set_required(ticks);
    }
}

/// Computes the target position for `strategy`.
///
/// `strategy` must be admissible for the buffer length (see [`StrategyHysteresis::select`]).
/// Spline and linear record one velocity sample from their interpolation pair.
pub fn compute_target(
    strategy: Strategy,
    buffer: &SnapshotBuffer,
    velocity: &mut VelocityEstimator,
    current_position: Vec3,
    render_time: f64,
    frame_delta: f32,
    settings: &SyncSettings,
) -> Vec3 {
    let multiplier = settings.extrapolation_multiplier;

    match (strategy, buffer.len()) {
        (Strategy::Spline, n) if n >= 4 => {
            let s: [Snapshot; 4] = std::array::from_fn(|i| buffer.get(i).unwrap_or_default());
            let u = inverse_lerp(s[1].timestamp, s[2].timestamp, render_time);
            velocity.record_velocity(&s[1], &s[2]);
            catmull_rom(s[0].position, s[1].position, s[2].position, s[3].position, u)
        }
        (Strategy::Spline | Strategy::Linear, n) if n >= 2 => {
            let (Some(older), Some(newer)) = (buffer.get(0), buffer.get(1)) else {
                return current_position;
            };
            let u = inverse_lerp(older.timestamp, newer.timestamp, render_time);
            velocity.record_velocity(&older, &newer);
            lerp_exact(older.position, newer.position, u)
        }
        (_, 0) => current_position + velocity.average_velocity() * frame_delta * multiplier,
        (_, _) => {
            // One snapshot, or a caller asked for extrapolation with history available.
            let Some(last) = buffer.newest() else {
                return current_position;
            };
            let delta = settings.interpolation_delay.min(render_time - last.timestamp);
            last.position + velocity.average_velocity() * delta as f32 * multiplier
        }
    }
}
