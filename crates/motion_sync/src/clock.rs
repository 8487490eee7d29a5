//! Time source injected into every engine call.

/// Local monotonic time plus the duration of the current tick.
pub trait Clock {
    /// Seconds since an arbitrary, fixed origin.
    fn now(&self) -> f64;

    /// Seconds elapsed since the previous tick.
    fn frame_delta(&self) -> f32;
}

/// Plain clock value for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameClock {
    pub now: f64,
    pub delta: f32,
}

impl FrameClock {
    pub fn new(now: f64, delta: f32) -> Self {
        Self { now, delta }
    }

    /// Moves the clock forward by `delta` seconds and records it as the tick length.
    pub fn advance(&mut self, delta: f32) {
        self.now += delta as f64;
        self.delta = delta;
    }
}

impl Clock for FrameClock {
    fn now(&self) -> f64 {
        self.now
    }

    fn frame_delta(&self) -> f32 {
        self.delta
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn frame_delta(&self) -> f32 {
        (**self).frame_delta()
    }
}
